//! Command-line argument parsing.
//!
//! Usage:
//!   tagscript [-f[<file>]] [-c<cmd>] [-d<mode>] [-t<ms>] [-q] [<script>...]

use std::path::PathBuf;

use crate::host::DebugMode;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Which rc file to read.
    pub config: ConfigFile,
    /// Script source to run after loading (`-c<cmd>`).
    pub command: Option<String>,
    /// Default queue verbosity (`-d<mode>`), overriding the config file.
    pub debug: Option<DebugMode>,
    /// Scheduler tick in milliseconds (`-t<ms>`), overriding the config file.
    pub tick_ms: Option<u64>,
    /// Only plain script output (`-q`); same as `-dnone`.
    pub quiet: bool,
    /// Script files to load and run, in order.
    pub scripts: Vec<PathBuf>,
}

impl CliArgs {
    /// The verbosity to run with, if the command line chose one.
    pub fn debug_mode(&self) -> Option<DebugMode> {
        if self.quiet {
            Some(DebugMode::None)
        } else {
            self.debug
        }
    }
}

/// How to choose the config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the user config directory, then `./.tagscriptrc` (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip the config file.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Value of a flag taking an argument: the rest of this token, else the
/// next token.
fn flag_value(
    flag: char,
    chars: &[char],
    j: &mut usize,
    argv: &[String],
    i: &mut usize,
) -> Result<String, String> {
    if *j + 1 < chars.len() {
        let s: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{flag} requires an argument"))
    }
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            args.scripts.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            args.scripts.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'q' => args.quiet = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                'c' => args.command = Some(flag_value('c', &chars, &mut j, argv, &mut i)?),

                'd' => {
                    let mode = flag_value('d', &chars, &mut j, argv, &mut i)?;
                    args.debug = Some(mode.parse()?);
                }

                't' => {
                    let ms = flag_value('t', &chars, &mut j, argv, &mut i)?;
                    let ms: u64 = ms
                        .parse()
                        .map_err(|_| format!("invalid tick interval: {ms}"))?;
                    if ms == 0 {
                        return Err("tick interval must be positive".to_owned());
                    }
                    args.tick_ms = Some(ms);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert!(matches!(a.config, ConfigFile::Search));
        assert!(a.scripts.is_empty());
        assert_eq!(a.debug_mode(), None);
    }

    #[test]
    fn scripts_positional() {
        let a = parse_argv(&argv(&["a.ts", "b.ts"])).unwrap();
        assert_eq!(a.scripts, vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")]);
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-weird.ts"])).unwrap();
        assert_eq!(a.scripts, vec![PathBuf::from("-weird.ts")]);
    }

    #[test]
    fn config_skip() {
        let a = parse_argv(&argv(&["-f"])).unwrap();
        assert!(matches!(a.config, ConfigFile::Skip));
    }

    #[test]
    fn config_explicit_embedded() {
        let a = parse_argv(&argv(&["-fmy.rc"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.rc")));
    }

    #[test]
    fn config_explicit_separate() {
        let a = parse_argv(&argv(&["-f", "my.rc", "x.ts"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.rc")));
        assert_eq!(a.scripts, vec![PathBuf::from("x.ts")]);
    }

    #[test]
    fn command_embedded_and_separate() {
        let a = parse_argv(&argv(&["-cecho hello"])).unwrap();
        assert_eq!(a.command.as_deref(), Some("echo hello"));
        let a = parse_argv(&argv(&["-c", "echo hi; wait 1"])).unwrap();
        assert_eq!(a.command.as_deref(), Some("echo hi; wait 1"));
        assert!(parse_argv(&argv(&["-c"])).is_err());
    }

    #[test]
    fn debug_mode_flag() {
        let a = parse_argv(&argv(&["-dfull"])).unwrap();
        assert_eq!(a.debug_mode(), Some(DebugMode::Full));
        assert!(parse_argv(&argv(&["-dloud"])).is_err());
    }

    #[test]
    fn quiet_overrides_debug() {
        let a = parse_argv(&argv(&["-dfull", "-q"])).unwrap();
        assert_eq!(a.debug_mode(), Some(DebugMode::None));
    }

    #[test]
    fn tick_flag() {
        let a = parse_argv(&argv(&["-t", "20"])).unwrap();
        assert_eq!(a.tick_ms, Some(20));
        assert!(parse_argv(&argv(&["-t0"])).is_err());
        assert!(parse_argv(&argv(&["-tfast"])).is_err());
    }

    #[test]
    fn combined_flags() {
        let a = parse_argv(&argv(&["-qf"])).unwrap();
        assert!(a.quiet);
        assert!(matches!(a.config, ConfigFile::Skip));
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
    }
}
