use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bibscope_core::AppConfig;
use bibscope_engine::{Document, FilterRegistry, Pipeline, builtin_package};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "bibscope",
    about = "Keep a BibTeX file generated from other bibliographies through a filter pipeline",
    version,
    long_about = None
)]
struct Cli {
    /// Target documents to regenerate.
    #[arg(required_unless_present_any = ["init", "list_filters", "help_filter"])]
    files: Vec<PathBuf>,

    /// Create a new target document with an empty filter list.
    #[arg(long, value_name = "FILE", conflicts_with = "files")]
    init: Option<PathBuf>,

    /// Source locations written into the `--init` template.
    #[arg(long = "src", value_name = "LOCATION")]
    sources: Vec<String>,

    /// List the available filters.
    #[arg(long)]
    list_filters: bool,

    /// Show the options of one filter.
    #[arg(long, value_name = "NAME")]
    help_filter: Option<String>,

    /// Config file to use instead of the default location.
    /// Also settable through BIBSCOPE_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not read or write the cache file for this run.
    #[arg(long)]
    no_cache: bool,

    /// Print a JSON summary per processed file.
    #[arg(long)]
    json: bool,

    /// More log output.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bibscope: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Cli {
    /// Combinations clap cannot express on its own.
    fn check(&self) -> Result<()> {
        if !self.sources.is_empty() && self.init.is_none() {
            bail!("--src is only valid together with --init");
        }
        Ok(())
    }
}

fn run(cli: Cli) -> Result<()> {
    cli.check()?;
    if let Some(target) = &cli.init {
        return init_document(target, &cli.sources);
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => AppConfig::load().context("cannot load config")?,
    };
    if cli.no_cache {
        config.cache.enabled = false;
    }

    let registry = build_registry(&config)?;

    if cli.list_filters {
        print_filters(&registry);
        return Ok(());
    }
    if let Some(name) = &cli.help_filter {
        print!("{}", registry.help(name)?);
        return Ok(());
    }

    let pipeline = Pipeline::new(registry, config)?;
    for file in &cli.files {
        let summary = pipeline
            .run(file)
            .with_context(|| format!("{} was not modified", file.display()))?;
        if cli.json {
            print_json(&serde_json::json!({
                "status": "ok",
                "file": file.display().to_string(),
                "data": summary,
            }))?;
        } else {
            info!(
                file = %file.display(),
                entries = summary.entries,
                filters = summary.filters_run,
                duplicates = summary.duplicates,
                "done"
            );
        }
    }
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn build_registry(config: &AppConfig) -> Result<FilterRegistry> {
    let mut registry = FilterRegistry::new();
    registry.register(builtin_package());
    registry
        .set_package_order(&config.filters.packages)
        .context("invalid [filters] packages in config")?;
    Ok(registry)
}

fn print_filters(registry: &FilterRegistry) {
    let mut current = "";
    for (package, factory) in registry.list() {
        if package != current {
            println!("{package}:");
            current = package;
        }
        println!(
            "  {name:<16} {action:<16} {desc}",
            name = factory.name(),
            action = factory.action().to_string(),
            desc = factory.description(),
        );
    }
}

fn init_document(target: &Path, sources: &[String]) -> Result<()> {
    if target.exists() {
        bail!("{} already exists, refusing to overwrite it", target.display());
    }
    std::fs::write(target, Document::new_template(sources))
        .with_context(|| format!("cannot write {}", target.display()))?;
    println!(
        "Created {path}. Edit its configuration block, then run `bibscope {path}`.",
        path = target.display()
    );
    Ok(())
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn files_are_required_unless_another_mode() {
        assert!(Cli::try_parse_from(["bibscope"]).is_err());
        assert!(Cli::try_parse_from(["bibscope", "--list-filters"]).is_ok());
        let cli = Cli::try_parse_from(["bibscope", "-v", "--no-cache", "a.bib", "b.bib"]).unwrap();
        assert_eq!(cli.files.len(), 2);
        assert!(cli.no_cache && cli.verbose);
    }

    #[test]
    fn src_requires_init() {
        let cli = Cli::try_parse_from(["bibscope", "--src", "x.bib", "a.bib"]).unwrap();
        let err = cli.check().unwrap_err();
        assert!(err.to_string().contains("--init"), "{err}");

        let cli =
            Cli::try_parse_from(["bibscope", "--init", "new.bib", "--src", "a.bib", "--src", "b.bib"])
                .unwrap();
        cli.check().unwrap();
        assert_eq!(cli.sources, vec!["a.bib", "b.bib"]);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("new.bib");
        init_document(&target, &["refs.bib".to_string()]).unwrap();
        let text = std::fs::read_to_string(&target).unwrap();
        assert!(text.contains("% src: refs.bib"));
        assert!(init_document(&target, &[]).is_err());
    }

    #[test]
    fn registry_honours_package_order() {
        let mut config = AppConfig::default();
        assert!(build_registry(&config).is_ok());
        config.filters.packages = vec!["nosuchpackage".to_string()];
        assert!(build_registry(&config).is_err());
    }
}
