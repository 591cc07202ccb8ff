//! The target document: header, configuration block and generated entries.
//!
//! A document moves through `Init → Read → Parsed → Loaded`; each step
//! requires the previous one and may be repeated with the same result.

use std::fmt;
use std::path::{Path, PathBuf};

use bibscope_core::bibfile::write_entries;
use bibscope_core::{CacheStore, Entries};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::dedup::DuplicateRecord;
use crate::error::{EngineError, LineSpan, Result};
use crate::filter::FilterContext;
use crate::lexer::split_words;
use crate::sources::{SourceFetcher, load_sources};

pub const BEGIN_CONFIG: &str = "%%%-BIBSCOPE-BEGIN-CONFIG-%%%";
pub const END_CONFIG: &str = "%%%-BIBSCOPE-END-CONFIG-%%%";

const COMMENT: char = '%';

static SRC_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*src:(.*)$").expect("valid regex"));

static FILTER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*filter:(.*)$").expect("valid regex"));

static FILTER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*(?::[A-Za-z_]\w*)?)(?:\s+(.*))?$").expect("valid regex")
});

// ─── Commands ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Source,
    Filter { name: String },
}

/// One `src:` or `filter:` command with its accumulated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub text: String,
    pub lines: LineSpan,
}

/// Tokenize configuration lines into commands. `first_line` is the 1-based
/// line number of `lines[0]` within `file`.
pub fn parse_commands(lines: &[&str], file: &str, first_line: usize) -> Result<Vec<Command>> {
    let mut commands: Vec<Command> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let lineno = first_line + idx;
        let line = raw.trim_start();
        let line = line.strip_prefix(COMMENT).unwrap_or(line);
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim_start().starts_with(COMMENT) {
            continue;
        }

        if let Some(caps) = SRC_LINE.captures(line) {
            commands.push(Command {
                kind: CommandKind::Source,
                text: caps[1].trim().to_string(),
                lines: (lineno, lineno),
            });
            continue;
        }

        if let Some(caps) = FILTER_LINE.captures(line) {
            let Some(named) = FILTER_NAME.captures(&caps[1]) else {
                return Err(EngineError::ConfigParse {
                    file: file.to_string(),
                    line: lineno,
                    message: "`filter:` must be followed by a filter name".to_string(),
                });
            };
            commands.push(Command {
                kind: CommandKind::Filter {
                    name: named[1].to_string(),
                },
                text: named.get(2).map_or("", |m| m.as_str()).trim_end().to_string(),
                lines: (lineno, lineno),
            });
            continue;
        }

        let blank = line.trim().is_empty();
        let Some(current) = commands.last_mut() else {
            if blank {
                continue;
            }
            return Err(EngineError::ConfigParse {
                file: file.to_string(),
                line: lineno,
                message: format!("expected `src:` or `filter:`, found {:?}", line.trim()),
            });
        };

        if blank {
            if matches!(current.kind, CommandKind::Filter { .. }) {
                current.text.push('\n');
            }
            continue;
        }
        if !current.text.is_empty() {
            current.text.push('\n');
        }
        current.text.push_str(line.trim_end());
        current.lines.1 = lineno;
    }

    for command in &mut commands {
        let trimmed = command.text.trim_end().len();
        command.text.truncate(trimmed);
    }
    Ok(commands)
}

/// One `src:` declaration: alternative locations, the first readable wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDecl {
    pub alternatives: Vec<String>,
    pub lines: LineSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecl {
    pub name: String,
    /// Raw option text, parsed when the filter is instantiated.
    pub options: String,
    pub lines: LineSpan,
}

// ─── Document ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentState {
    Init,
    Read,
    Parsed,
    Loaded,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Read => "read",
            Self::Parsed => "parsed",
            Self::Loaded => "loaded",
        })
    }
}

#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    state: DocumentState,
    header: String,
    /// Begin sentinel through end sentinel, verbatim.
    config_block: String,
    config_first_line: usize,
    commands: Vec<Command>,
    pub sources: Vec<SourceDecl>,
    pub filter_decls: Vec<FilterDecl>,
    pub entries: Entries,
    pub cache: CacheStore,
    pub duplicates: Vec<DuplicateRecord>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: DocumentState::Init,
            header: String::new(),
            config_block: String::new(),
            config_first_line: 1,
            commands: Vec::new(),
            sources: Vec::new(),
            filter_decls: Vec::new(),
            entries: Entries::new(),
            cache: CacheStore::new(),
            duplicates: Vec::new(),
        }
    }

    /// Read and split the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut document = Self::new(path);
        let text = std::fs::read_to_string(&document.path)?;
        document.read_text(&text)?;
        Ok(document)
    }

    /// Split `text` into header, configuration block and generated output.
    /// The generated output is dropped; it is rebuilt on write.
    pub fn read_text(&mut self, text: &str) -> Result<()> {
        let file = self.display_name();
        let lines: Vec<&str> = text.split_inclusive('\n').collect();

        let Some(begin) = lines.iter().position(|l| l.trim() == BEGIN_CONFIG) else {
            return Err(EngineError::ConfigParse {
                file,
                line: 1,
                message: format!("missing `{BEGIN_CONFIG}` line"),
            });
        };
        let Some(end) = lines[begin + 1..]
            .iter()
            .position(|l| l.trim() == END_CONFIG)
            .map(|offset| begin + 1 + offset)
        else {
            return Err(EngineError::ConfigParse {
                file,
                line: lines.len().max(1),
                message: format!("missing `{END_CONFIG}` line"),
            });
        };

        self.header = lines[..begin].concat();
        self.config_block = lines[begin..=end].concat();
        if !self.config_block.ends_with('\n') {
            self.config_block.push('\n');
        }
        self.config_first_line = begin + 2;
        self.state = DocumentState::Read;
        debug!(file = %self.path.display(), header_lines = begin, config_lines = end - begin - 1, "read document");
        Ok(())
    }

    /// Decode the configuration block into source and filter declarations.
    pub fn parse_config(&mut self) -> Result<()> {
        self.require_at_least(DocumentState::Read)?;
        let file = self.display_name();

        let body: Vec<&str> = self.config_block.lines().collect();
        let inner = &body[1..body.len().saturating_sub(1).max(1)];
        let commands = parse_commands(inner, &file, self.config_first_line)?;

        let mut sources = Vec::new();
        let mut filters = Vec::new();
        for command in &commands {
            match &command.kind {
                CommandKind::Source => {
                    let alternatives =
                        split_words(&command.text).map_err(|message| EngineError::ConfigParse {
                            file: file.clone(),
                            line: command.lines.0,
                            message,
                        })?;
                    if alternatives.is_empty() {
                        return Err(EngineError::ConfigParse {
                            file,
                            line: command.lines.0,
                            message: "`src:` needs at least one location".to_string(),
                        });
                    }
                    sources.push(SourceDecl {
                        alternatives,
                        lines: command.lines,
                    });
                }
                CommandKind::Filter { name } => filters.push(FilterDecl {
                    name: name.clone(),
                    options: command.text.clone(),
                    lines: command.lines,
                }),
            }
        }

        self.commands = commands;
        self.sources = sources;
        self.filter_decls = filters;
        self.state = self.state.max(DocumentState::Parsed);
        Ok(())
    }

    /// Fetch and merge all sources, and load the cache from `cache_path`.
    pub fn load(&mut self, fetcher: &dyn SourceFetcher, cache_path: Option<&Path>) -> Result<()> {
        self.require_at_least(DocumentState::Parsed)?;
        let base_dir = self.base_dir();
        self.entries = load_sources(&self.sources, fetcher, &base_dir)?;
        self.cache = cache_path.map(CacheStore::load).unwrap_or_default();
        self.duplicates.clear();
        self.state = DocumentState::Loaded;
        info!(file = %self.path.display(), entries = self.entries.len(), "loaded sources");
        Ok(())
    }

    fn require_at_least(&self, expected: DocumentState) -> Result<()> {
        if self.state < expected {
            return Err(EngineError::InvalidState {
                expected: expected.to_string(),
                found: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn config_block(&self) -> &str {
        &self.config_block
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Directory relative source paths and side files resolve against.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Split borrow for database and entry filters.
    pub fn filter_parts(&mut self) -> (&mut Entries, FilterContext<'_>) {
        (
            &mut self.entries,
            FilterContext {
                document_path: &self.path,
                cache: &mut self.cache,
            },
        )
    }

    /// Full output text: header and configuration verbatim, a disclaimer,
    /// then the entries.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(self.header.len() + self.config_block.len() + 4096);
        out.push_str(&self.header);
        out.push_str(&self.config_block);
        out.push('\n');
        out.push_str(&disclaimer(now));
        out.push('\n');
        out.push_str(&write_entries(self.entries.iter()));
        out
    }

    pub fn write(&self) -> Result<()> {
        self.require_at_least(DocumentState::Loaded)?;
        std::fs::write(&self.path, self.render(Utc::now()))?;
        info!(file = %self.path.display(), entries = self.entries.len(), "wrote document");
        Ok(())
    }

    /// Skeleton of a new target document reading from `sources`.
    pub fn new_template(sources: &[String]) -> String {
        let src = if sources.is_empty() {
            "%% src: references.bib".to_string()
        } else {
            let quoted: Vec<String> = sources.iter().map(|s| quote_word(s)).collect();
            format!("% src: {}", quoted.join(" "))
        };
        format!(
            "% Bibliography maintained by bibscope. Edit the configuration below and\n\
             % run `bibscope` on this file; everything after the configuration block\n\
             % is regenerated on each run.\n\
             \n\
             {BEGIN_CONFIG}\n\
             %\n\
             {src}\n\
             %\n\
             %% Add filters here, one per line, for example:\n\
             %% filter: duplicates -dWarn\n\
             %% filter: orderentries -sOrder=key\n\
             %\n\
             {END_CONFIG}\n"
        )
    }
}

fn disclaimer(now: DateTime<Utc>) -> String {
    let rule = "%".repeat(72);
    format!(
        "{rule}\n\
         % Generated by bibscope {} on {}.\n\
         % Do not edit below this line: changes are overwritten on the next run.\n\
         {rule}\n",
        env!("CARGO_PKG_VERSION"),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn quote_word(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || "'\"\\".contains(c)) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
