//! Command-line argument parsing.
//!
//! Usage:
//!   embedhost [-qd] [-c<code>] [-L<dir>] [--] [<file>...]

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Code buffer to run before any file (`-c<code>`).
    pub code: Option<String>,
    /// Extra search-path directories (`-L<dir>`, repeatable).
    pub search_paths: Vec<PathBuf>,
    /// Print raw script stdout only, without the buffer banners (`-q`).
    pub quiet: bool,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Script files, run in order.
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    /// Whether there is anything to run.
    pub fn has_work(&self) -> bool {
        self.code.is_some() || !self.files.is_empty()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            args.files.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }

        // Non-flag argument.
        if !arg.starts_with('-') || arg == "-" {
            args.files.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        // Flag argument: iterate over characters after the leading `-`.
        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,
                'q' => args.quiet = true,

                // -c<code>
                'c' => {
                    let code = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-c requires a code argument".to_owned());
                    };
                    args.code = Some(code);
                }

                // -L<dir>
                'L' => {
                    let dir = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-L requires a directory argument".to_owned());
                    };
                    args.search_paths.push(PathBuf::from(dir));
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if !args.has_work() {
        return Err("nothing to run".to_owned());
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
    fn empty_args_is_an_error() {
        assert!(parse_argv(&argv(&[])).is_err());
        assert!(parse_argv(&argv(&["-q"])).is_err());
    }

    #[test]
    fn files_in_order() {
        let a = parse_argv(&argv(&["a.lua", "b.lua"])).unwrap();
        assert_eq!(a.files, vec![PathBuf::from("a.lua"), PathBuf::from("b.lua")]);
        assert!(a.code.is_none());
    }

    #[test]
    fn bool_flags() {
        let a = parse_argv(&argv(&["-q", "-d", "x.lua"])).unwrap();
        assert!(a.quiet && a.debug);
    }

    #[test]
    fn combined_bool_flags() {
        let a = parse_argv(&argv(&["-qd", "x.lua"])).unwrap();
        assert!(a.quiet && a.debug);
    }

    #[test]
    fn code_embedded() {
        let a = parse_argv(&argv(&["-cprint(1)"])).unwrap();
        assert_eq!(a.code.as_deref(), Some("print(1)"));
    }

    #[test]
    fn code_separate() {
        let a = parse_argv(&argv(&["-c", "print(1)"])).unwrap();
        assert_eq!(a.code.as_deref(), Some("print(1)"));
    }

    #[test]
    fn code_missing_argument() {
        assert!(parse_argv(&argv(&["-c"])).is_err());
    }

    #[test]
    fn flag_after_code_in_same_arg_is_code() {
        let a = parse_argv(&argv(&["-qcx = 1"])).unwrap();
        assert!(a.quiet);
        assert_eq!(a.code.as_deref(), Some("x = 1"));
    }

    #[test]
    fn search_paths_repeat() {
        let a = parse_argv(&argv(&["-L/a", "-L", "/b", "x.lua"])).unwrap();
        assert_eq!(a.search_paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-weird.lua"])).unwrap();
        assert_eq!(a.files, vec![PathBuf::from("-weird.lua")]);
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z", "x.lua"])).is_err());
    }
}
