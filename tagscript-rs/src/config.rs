//! `tagscript.rc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `set <name>=<value>` or `set <name> <value>` | set a CVar |
//! | `cvar <name>=<value> [readonly] [internal]` | define a CVar with flags |
//! | `debug <full\|minimal\|none>` | default queue verbosity |
//! | `tick <ms>` | scheduler tick interval |
//! | `depth <n>` | nested synchronous call limit |
//! | `load <path>` | script to load at startup |
//! | Lines starting with `;` or `//` | comment, ignored |
//!
//! Errors are per line and non-fatal: a bad line is reported and skipped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::host::DebugMode;
use crate::var::{CVarFlags, CVarStore};

pub const DEFAULT_TICK_MS: u64 = 50;
pub const DEFAULT_CALL_DEPTH: usize = 32;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Engine settings and host CVars.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Verbosity new queues start with.
    pub debug: DebugMode,
    /// How often the driver calls `Engine::tick`.
    pub tick: Duration,
    /// Limit on nested `<function[..]>` / `run` calls.
    pub max_call_depth: usize,
    pub cvars: CVarStore,
    /// Script files named by `load` directives, in order.
    pub scripts: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debug: DebugMode::default(),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            max_call_depth: DEFAULT_CALL_DEPTH,
            cvars: CVarStore::new(),
            scripts: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string over the defaults.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = EngineConfig::new();
        let errors = config.apply_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply a config string on top of the current settings.  Later
    /// directives override earlier ones.
    pub fn apply_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with("//") {
                continue;
            }

            let (cmd, args_str) = line
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((line, ""));
            let args_str = args_str.trim();

            let result = match cmd.to_ascii_lowercase().as_str() {
                "set" => parse_set(&split_args(args_str), &mut self.cvars),
                "cvar" => parse_cvar(&split_args(args_str), &mut self.cvars),
                "debug" => args_str
                    .parse::<DebugMode>()
                    .map(|mode| self.debug = mode),
                "tick" => parse_number::<u64>("tick", args_str).and_then(|ms| {
                    if ms == 0 {
                        Err("tick: interval must be positive".into())
                    } else {
                        self.tick = Duration::from_millis(ms);
                        Ok(())
                    }
                }),
                "depth" => parse_number::<usize>("depth", args_str).map(|n| self.max_call_depth = n),
                "load" => match split_args(args_str).as_slice() {
                    [path] => {
                        self.scripts.push(PathBuf::from(path));
                        Ok(())
                    }
                    _ => Err("load: expects one path".into()),
                },
                other => Err(format!("unknown directive '{other}'")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        errors
    }
}

/// The per-user rc file: `<config dir>/tagscript/tagscript.rc`, then
/// `./.tagscriptrc`.  Returns the first that exists.
pub fn find_user_config() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(base) = directories::BaseDirs::new() {
        candidates.push(base.config_dir().join("tagscript").join("tagscript.rc"));
    }
    candidates.push(PathBuf::from(".tagscriptrc"));
    candidates.into_iter().find(|p| p.is_file())
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                    quoted = false;
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

fn parse_number<T: std::str::FromStr>(directive: &str, s: &str) -> Result<T, String> {
    s.parse::<T>()
        .map_err(|_| format!("{directive}: expected a number, got '{s}'"))
}

// ── set / cvar ────────────────────────────────────────────────────────────────

/// `name=value`, `name = value` or `name value...`.  Returns how many tokens
/// the assignment used.
fn split_assignment(tokens: &[String], directive: &str) -> Result<(String, String, usize), String> {
    let Some(first) = tokens.first() else {
        return Err(format!("{directive}: requires an argument"));
    };
    let (name, value, used) = if let Some((name, value)) = first.split_once('=') {
        (name.to_owned(), value.to_owned(), 1)
    } else if tokens.len() >= 3 && tokens[1] == "=" {
        (first.clone(), tokens[2].clone(), 3)
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "), tokens.len())
    } else {
        return Err(format!("{directive}: missing value for '{first}'"));
    };
    if name.is_empty() {
        return Err(format!("{directive}: variable name cannot be empty"));
    }
    Ok((name, value, used))
}

fn parse_set(tokens: &[String], cvars: &mut CVarStore) -> Result<(), String> {
    let (name, value, _) = split_assignment(tokens, "set")?;
    cvars.set(&name, value).map_err(|e| format!("set: {e}"))
}

fn parse_cvar(tokens: &[String], cvars: &mut CVarStore) -> Result<(), String> {
    let (name, value, used) = split_assignment(tokens, "cvar")?;
    // `name value...` swallows every token, so flags need the `=` form.
    let mut flags = CVarFlags::default();
    for flag in &tokens[used..] {
        match flag.to_ascii_lowercase().as_str() {
            "readonly" => flags.read_only = true,
            "internal" => flags.internal = true,
            other => return Err(format!("cvar: unknown flag '{other}'")),
        }
    }
    cvars.define(&name, value, flags);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_simple() {
        assert_eq!(split_args("foo bar baz"), ["foo", "bar", "baz"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""my scripts/a.tsc" x"#), ["my scripts/a.tsc", "x"]);
    }

    #[test]
    fn split_empty_quotes() {
        assert_eq!(split_args(r#"name="" readonly"#), ["name=", "readonly"]);
    }

    // -- directives -----------------------------------------------------------

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.debug, DebugMode::Minimal);
        assert_eq!(c.tick, Duration::from_millis(DEFAULT_TICK_MS));
        assert_eq!(c.max_call_depth, DEFAULT_CALL_DEPTH);
    }

    #[test]
    fn set_equals_and_space_syntax() {
        let (c, errs) = EngineConfig::load_str("set player=bob\nset greeting hello there");
        assert!(errs.is_empty());
        assert_eq!(c.cvars.get("player"), Some("bob"));
        assert_eq!(c.cvars.get("greeting"), Some("hello there"));
    }

    #[test]
    fn cvar_flags() {
        let (c, errs) = EngineConfig::load_str("cvar version=1.0 readonly\ncvar secret=x internal");
        assert!(errs.is_empty(), "{errs:?}");
        assert!(c.cvars.flags("version").unwrap().read_only);
        assert!(c.cvars.flags("secret").unwrap().internal);
    }

    #[test]
    fn set_on_readonly_cvar_is_error() {
        let (c, errs) = EngineConfig::load_str("cvar version=1 readonly\nset version=2");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 2);
        assert_eq!(c.cvars.get("version"), Some("1"));
    }

    #[test]
    fn engine_settings() {
        let (c, errs) = EngineConfig::load_str("debug full\ntick 20\ndepth 4\nload a.tsc\nload \"b c.tsc\"");
        assert!(errs.is_empty());
        assert_eq!(c.debug, DebugMode::Full);
        assert_eq!(c.tick, Duration::from_millis(20));
        assert_eq!(c.max_call_depth, 4);
        assert_eq!(c.scripts, vec![PathBuf::from("a.tsc"), PathBuf::from("b c.tsc")]);
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let src = "debug loud\ntick 0\ntick abc\nfrobnicate\nset\ndepth 3";
        let (c, errs) = EngineConfig::load_str(src);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4, 5]);
        assert_eq!(c.max_call_depth, 3);
        assert!(errs[3].to_string().starts_with("line 4:"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let (c, errs) = EngineConfig::load_str("; comment\n// also\n\n   \nset a=1");
        assert!(errs.is_empty());
        assert_eq!(c.cvars.get("a"), Some("1"));
    }

    #[test]
    fn apply_layers_over_existing() {
        let (mut c, _) = EngineConfig::load_str("set a=1\ndepth 5");
        let errs = c.apply_str("set a=2");
        assert!(errs.is_empty());
        assert_eq!(c.cvars.get("a"), Some("2"));
        assert_eq!(c.max_call_depth, 5);
    }

    #[test]
    fn load_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagscript.rc");
        std::fs::write(&path, "set who=me\n").unwrap();
        let (c, errs) = EngineConfig::load_file(&path).unwrap();
        assert!(errs.is_empty());
        assert_eq!(c.cvars.get("who"), Some("me"));
        assert!(EngineConfig::load_file(&dir.path().join("nope.rc")).is_err());
    }
}
