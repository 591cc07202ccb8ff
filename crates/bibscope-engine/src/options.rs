//! Declarative option schemas and the generic filter option parser.
//!
//! A filter describes its parameters with an [`OptionSchema`], usually
//! derived from its documentation (`- name (type): help`). Option strings are
//! parsed in two steps: [`parse_option_string`] runs the words through a clap
//! command generated from the schema and yields [`FilterArgs`] (failures are
//! bad option strings), then [`OptionSchema::bind`] checks them
//! against the parameter list (failures are bad arguments).

use std::fmt;

use clap::{Arg, ArgAction, Command};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::lexer::split_words;

static PARAM_DOC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-\s*([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Bool,
    Int,
    Float,
    /// Comma-separated list of strings.
    List,
}

impl ParamType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "str" | "string" => Some(Self::Str),
            "bool" | "boolean" => Some(Self::Bool),
            "int" | "integer" => Some(Self::Int),
            "float" | "number" => Some(Self::Float),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::List => "list",
        }
    }

    /// Cast raw text to a value of this type.
    pub fn parse(self, raw: &str) -> Result<OptionValue, String> {
        match self {
            Self::Str => Ok(OptionValue::Str(raw.to_string())),
            Self::Bool => parse_bool(raw).map(OptionValue::Bool),
            Self::Int => raw
                .trim()
                .parse()
                .map(OptionValue::Int)
                .map_err(|_| format!("expected an integer, got {raw:?}")),
            Self::Float => raw
                .trim()
                .parse()
                .map(OptionValue::Float)
                .map_err(|_| format!("expected a number, got {raw:?}")),
            Self::List => Ok(OptionValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "" | "1" | "t" | "true" | "y" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Ok(false),
        _ => Err(format!("expected a boolean, got {raw:?}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<String>),
}

impl OptionValue {
    pub fn kind(&self) -> ParamType {
        match self {
            Self::Str(_) => ParamType::Str,
            Self::Bool(_) => ParamType::Bool,
            Self::Int(_) => ParamType::Int,
            Self::Float(_) => ParamType::Float,
            Self::List(_) => ParamType::List,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert to `kind`, casting string values. Integers widen to floats.
    fn coerce(self, kind: ParamType) -> Result<Self, String> {
        match (self, kind) {
            (value, kind) if value.kind() == kind => Ok(value),
            (Self::Str(raw), kind) => kind.parse(&raw),
            (Self::Int(i), ParamType::Float) => Ok(Self::Float(i as f64)),
            (value, kind) => Err(format!("expected {kind}, got {}", value.kind())),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// One declared filter parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    /// `None` accepts any value; `-s` values then stay strings.
    pub kind: Option<ParamType>,
    pub help: String,
    pub required: bool,
    pub default: Option<OptionValue>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: Option<ParamType>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            help: help.into(),
            required: false,
            default: None,
        }
    }

    /// Long option name, absent for names starting with an underscore.
    fn long_name(&self) -> Option<String> {
        let long = self.name.replace('_', "-");
        (!long.starts_with('-')).then_some(long)
    }

    fn long_flag(&self) -> String {
        match self.long_name() {
            Some(long) => format!("--{long}"),
            None => format!("-s{}=", self.name),
        }
    }
}

/// The parameter list of a filter, in positional order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSchema {
    params: Vec<ParamSpec>,
}

impl OptionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: &str, kind: ParamType, help: &str) -> Self {
        self.params.push(ParamSpec::new(name, Some(kind), help));
        self
    }

    /// Build a schema from documentation lines of the form
    /// `- name: help` or `- name (type): help`. Indented lines that follow
    /// continue the previous parameter's help.
    pub fn from_doc(doc: &str) -> Self {
        let mut params: Vec<ParamSpec> = Vec::new();
        let mut in_param = false;
        for line in doc.lines() {
            if let Some(caps) = PARAM_DOC.captures(line) {
                let kind = caps.get(2).and_then(|tag| {
                    let parsed = ParamType::from_tag(tag.as_str());
                    if parsed.is_none() {
                        debug!(param = &caps[1], tag = tag.as_str(), "unknown parameter type, accepting any value");
                    }
                    parsed
                });
                params.push(ParamSpec::new(&caps[1], kind, caps[3].trim()));
                in_param = true;
            } else if line.trim().is_empty() {
                in_param = false;
            } else if in_param && line.starts_with(char::is_whitespace) {
                if let Some(last) = params.last_mut() {
                    if !last.help.is_empty() {
                        last.help.push(' ');
                    }
                    last.help.push_str(line.trim());
                }
            } else {
                in_param = false;
            }
        }
        Self { params }
    }

    /// Mark a parameter as mandatory.
    pub fn require(mut self, name: &str) -> Self {
        if let Some(spec) = self.params.iter_mut().find(|p| p.name == name) {
            spec.required = true;
        }
        self
    }

    pub fn with_default(mut self, name: &str, value: OptionValue) -> Self {
        if let Some(spec) = self.params.iter_mut().find(|p| p.name == name) {
            spec.default = Some(value);
        }
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Case conversion of option names only applies when every declared
    /// name is lower case.
    fn auto_case(&self) -> bool {
        !self
            .params
            .iter()
            .any(|p| p.name.chars().any(char::is_uppercase))
    }

    /// Map an option name as written (`dup-file`, `DupFile`) to a declared
    /// parameter name. Unknown names come back converted but unmatched.
    fn resolve_name(&self, raw: &str) -> (String, Option<&ParamSpec>) {
        if let Some(spec) = self.get(raw) {
            return (spec.name.clone(), Some(spec));
        }
        let mut name = raw.replace('-', "_");
        if self.auto_case() {
            name = camel_to_snake(&name);
        }
        let spec = self.get(&name);
        (name, spec)
    }

    /// Check parsed arguments against the parameter list and fill in defaults.
    pub fn bind(&self, args: FilterArgs) -> Result<BoundArgs, String> {
        if args.positional.len() > self.params.len() {
            return Err(format!(
                "takes at most {} positional argument(s), {} given",
                self.params.len(),
                args.positional.len()
            ));
        }

        let mut values: IndexMap<String, OptionValue> = IndexMap::new();
        for (spec, raw) in self.params.iter().zip(args.positional) {
            values.insert(spec.name.clone(), OptionValue::Str(raw));
        }
        for (name, value) in args.named {
            let Some(spec) = self.get(&name) else {
                return Err(format!("unexpected argument '{name}'"));
            };
            if values.contains_key(&spec.name) {
                return Err(format!("multiple values for argument '{name}'"));
            }
            values.insert(spec.name.clone(), value);
        }

        let mut bound = IndexMap::new();
        for spec in &self.params {
            match values.shift_remove(&spec.name) {
                Some(value) => {
                    let value = match spec.kind {
                        Some(kind) => value
                            .coerce(kind)
                            .map_err(|e| format!("argument '{}': {e}", spec.name))?,
                        None => value,
                    };
                    bound.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(format!("missing required argument '{}'", spec.name));
                }
                None => {
                    if let Some(default) = &spec.default {
                        bound.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(BoundArgs { values: bound })
    }

    /// Option summary, one parameter per line.
    pub fn usage(&self) -> String {
        let mut out = String::new();
        for spec in &self.params {
            let flag = match spec.kind {
                Some(ParamType::Bool) => spec.long_flag(),
                Some(kind) => format!("{} <{kind}>", spec.long_flag()),
                None => format!("{} <value>", spec.long_flag()),
            };
            let mut line = format!("  {flag:<28} {}", spec.help);
            if spec.required {
                line.push_str(" (required)");
            } else if let Some(default) = &spec.default {
                line.push_str(&format!(" [default: {default}]"));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        if !self.params.is_empty() {
            out.push_str("\n  Compact forms: -sName=VALUE sets a value, -dName[=BOOL] sets a switch.\n");
        }
        out
    }
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Arguments as parsed from an option string, before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    pub positional: Vec<String>,
    pub named: IndexMap<String, OptionValue>,
}

impl FilterArgs {
    fn set(&mut self, name: String, value: OptionValue) -> Result<(), String> {
        if self.named.contains_key(&name) {
            return Err(format!("option '{name}' given more than once"));
        }
        self.named.insert(name, value);
        Ok(())
    }
}

/// Argument ids of the compact forms and the positional words. `@` cannot
/// occur in a parameter name.
const SET_ID: &str = "@set";
const SWITCH_ID: &str = "@switch";
const POSITIONAL_ID: &str = "@positional";

impl OptionSchema {
    /// Command line grammar of this schema: one long option per parameter,
    /// the repeatable `-s KEY=VALUE` and `-d SWITCH[=BOOL]` forms, and
    /// positional words.
    fn command(&self) -> Command {
        let mut command = Command::new("options")
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true);
        for spec in &self.params {
            let Some(long) = spec.long_name() else {
                continue;
            };
            let mut arg = Arg::new(spec.name.clone())
                .long(long)
                .action(ArgAction::Set)
                .help(spec.help.clone());
            if spec.name.contains('_') {
                arg = arg.alias(spec.name.clone());
            }
            arg = match spec.kind {
                Some(ParamType::Bool) => arg
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true"),
                _ => arg.num_args(1).allow_hyphen_values(true),
            };
            command = command.arg(arg);
        }
        command
            .arg(
                Arg::new(SET_ID)
                    .short('s')
                    .value_name("KEY=VALUE")
                    .action(ArgAction::Append)
                    .allow_hyphen_values(true),
            )
            .arg(
                Arg::new(SWITCH_ID)
                    .short('d')
                    .value_name("SWITCH[=BOOL]")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new(POSITIONAL_ID)
                    .num_args(0..)
                    .action(ArgAction::Append),
            )
    }
}

/// Parse `--name value`, `--name=value`, `-sKey=Value`, `-s Key=Value`,
/// `-dSwitch[=bool]` and positional words. A lone `--` ends option parsing.
pub fn parse_option_string(schema: &OptionSchema, text: &str) -> Result<FilterArgs, String> {
    let words = split_words(text)?;
    let matches = schema
        .command()
        .try_get_matches_from(words)
        .map_err(clap_message)?;

    let mut args = FilterArgs::default();
    for spec in schema.params.iter().filter(|p| p.long_name().is_some()) {
        if let Some(raw) = matches.get_one::<String>(&spec.name) {
            args.set(spec.name.clone(), cast(spec, raw)?)?;
        }
    }

    for assignment in matches.get_many::<String>(SET_ID).into_iter().flatten() {
        let Some((raw_name, raw)) = assignment.split_once('=') else {
            return Err(format!("-s{assignment}: expected KEY=VALUE"));
        };
        let (name, spec) = schema.resolve_name(raw_name);
        let value = match spec {
            Some(spec) => cast(spec, raw)?,
            None => OptionValue::Str(raw.to_string()),
        };
        args.set(name, value)?;
    }

    for switch in matches.get_many::<String>(SWITCH_ID).into_iter().flatten() {
        let (raw_name, flag) = match switch.split_once('=') {
            Some((name, raw)) => (name, parse_bool(raw)?),
            None => (switch.as_str(), true),
        };
        let (name, _) = schema.resolve_name(raw_name);
        args.set(name, OptionValue::Bool(flag))?;
    }

    args.positional = matches
        .get_many::<String>(POSITIONAL_ID)
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    Ok(args)
}

/// First line of a clap error, without its `error: ` prefix.
fn clap_message(err: clap::Error) -> String {
    let text = err.to_string();
    let line = text.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

fn cast(spec: &ParamSpec, raw: &str) -> Result<OptionValue, String> {
    match spec.kind {
        Some(kind) => kind
            .parse(raw)
            .map_err(|e| format!("option {}: {e}", spec.name)),
        None => Ok(OptionValue::Str(raw.to_string())),
    }
}

/// Arguments after binding: every present value has its declared type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: IndexMap<String, OptionValue>,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(OptionValue::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(OptionValue::as_bool)
    }

    /// Boolean value, or `default` when not given.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.bool(name).unwrap_or(default)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(OptionValue::as_int)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(OptionValue::as_float)
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(OptionValue::as_list)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO_DOC: &str = "Demo filter.

Arguments:
  - mode: how to treat entries; one of
      eprint, strip or none
  - warn (bool): log every change
  - limit (int): stop after this many entries
";

    fn demo() -> OptionSchema {
        OptionSchema::from_doc(DEMO_DOC)
    }

    fn parse_and_bind(schema: &OptionSchema, text: &str) -> Result<BoundArgs, String> {
        schema.bind(parse_option_string(schema, text)?)
    }

    #[test]
    fn schema_from_doc() {
        let schema = demo();
        let names: Vec<_> = schema.params().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mode", "warn", "limit"]);
        assert_eq!(schema.get("mode").unwrap().kind, None);
        assert_eq!(
            schema.get("mode").unwrap().help,
            "how to treat entries; one of eprint, strip or none"
        );
        assert_eq!(schema.get("warn").unwrap().kind, Some(ParamType::Bool));
        assert_eq!(schema.get("limit").unwrap().kind, Some(ParamType::Int));
    }

    #[test]
    fn compact_forms_bind_to_declared_names() {
        let bound = parse_and_bind(&demo(), "-sMode=eprint -dWarn").unwrap();
        assert_eq!(bound.str("mode"), Some("eprint"));
        assert_eq!(bound.bool("warn"), Some(true));
        assert!(!bound.is_set("limit"));
    }

    #[test]
    fn long_options_and_casts() {
        let bound = parse_and_bind(&demo(), "--mode strip --warn --limit=5").unwrap();
        assert_eq!(bound.str("mode"), Some("strip"));
        assert!(bound.flag("warn", false));
        assert_eq!(bound.int("limit"), Some(5));

        let bound = parse_and_bind(&demo(), "-sLimit=7 -dWarn=false").unwrap();
        assert_eq!(bound.int("limit"), Some(7));
        assert_eq!(bound.bool("warn"), Some(false));
    }

    #[test]
    fn camel_case_names_map_to_snake_case() {
        let schema = OptionSchema::new()
            .param("custom_bibalias", ParamType::Bool, "")
            .param("dup_file", ParamType::Str, "");
        let bound =
            parse_and_bind(&schema, "-dCustomBibalias -sDupFile=aliases.tex").unwrap();
        assert!(bound.flag("custom_bibalias", false));
        assert_eq!(bound.str("dup_file"), Some("aliases.tex"));

        let bound = parse_and_bind(&schema, "--dup-file x.tex").unwrap();
        assert_eq!(bound.str("dup_file"), Some("x.tex"));
    }

    #[test]
    fn no_case_conversion_with_uppercase_names() {
        let schema = OptionSchema::new().param("Order", ParamType::Str, "");
        let bound = parse_and_bind(&schema, "-sOrder=year").unwrap();
        assert_eq!(bound.str("Order"), Some("year"));
        assert!(parse_and_bind(&schema, "-sorder=year").is_err());
    }

    #[test]
    fn positional_arguments_fill_params_in_order() {
        let bound = parse_and_bind(&demo(), "eprint yes 3").unwrap();
        assert_eq!(bound.str("mode"), Some("eprint"));
        assert_eq!(bound.bool("warn"), Some(true));
        assert_eq!(bound.int("limit"), Some(3));
    }

    #[test]
    fn parse_errors() {
        let schema = demo();
        assert!(parse_option_string(&schema, "--nope 1").is_err());
        assert!(parse_option_string(&schema, "--limit many").is_err());
        assert!(parse_option_string(&schema, "-sLimit=x").is_err());
        assert!(parse_option_string(&schema, "-sMode").is_err());
        assert!(parse_option_string(&schema, "--mode").is_err());
        assert!(parse_option_string(&schema, "'unterminated").is_err());
        assert!(parse_option_string(&schema, "-x").is_err());
    }

    #[test]
    fn bind_errors() {
        let schema = demo();
        let err = parse_and_bind(&schema, "-sColour=red").unwrap_err();
        assert!(err.contains("unexpected argument 'colour'"), "{err}");

        let err = parse_and_bind(&schema, "a b c d").unwrap_err();
        assert!(err.contains("positional"), "{err}");

        let err = parse_and_bind(&schema, "eprint -sMode=strip").unwrap_err();
        assert!(err.contains("multiple values"), "{err}");

        let err = parse_and_bind(&schema, "eprint maybe").unwrap_err();
        assert!(err.contains("warn"), "{err}");

        let schema = demo().require("mode");
        let err = parse_and_bind(&schema, "-dWarn").unwrap_err();
        assert!(err.contains("missing required argument 'mode'"), "{err}");
    }

    #[test]
    fn defaults_fill_missing_values() {
        let schema = demo().with_default("limit", OptionValue::Int(10));
        let bound = parse_and_bind(&schema, "").unwrap();
        assert_eq!(bound.int("limit"), Some(10));
    }

    #[test]
    fn repeated_and_misplaced_options_are_rejected() {
        let schema = demo();
        let err = parse_option_string(&schema, "--mode strip --mode eprint").unwrap_err();
        assert!(err.contains("--mode"), "{err}");

        let err = parse_option_string(&schema, "--mode strip -sMode=eprint").unwrap_err();
        assert!(err.contains("more than once"), "{err}");

        // a switch never swallows the following word
        let args = parse_option_string(&schema, "--warn eprint").unwrap();
        assert_eq!(args.named.get("warn"), Some(&OptionValue::Bool(true)));
        assert_eq!(args.positional, vec!["eprint"]);
    }

    #[test]
    fn underscore_spelling_of_long_options() {
        let schema = OptionSchema::new().param("dup_file", ParamType::Str, "");
        let bound = parse_and_bind(&schema, "--dup_file=a.tex").unwrap();
        assert_eq!(bound.str("dup_file"), Some("a.tex"));
    }

    #[test]
    fn double_dash_ends_options() {
        let bound = parse_and_bind(&demo(), "-- -weird").unwrap();
        assert_eq!(bound.str("mode"), Some("-weird"));
    }

    #[test]
    fn usage_lists_params() {
        let usage = demo().require("mode").usage();
        assert!(usage.contains("--mode <value>"));
        assert!(usage.contains("(required)"));
        assert!(usage.contains("--limit <int>"));
    }
}
