//! `--version` support on top of `argp`.
//!
//! `argp` insists on a subcommand, so a bare `--version` invocation is
//! intercepted before argument parsing runs.
use argp::TopLevelCommand;

/// Create a `FromArgs` type from the current process's `env::args`, exiting
/// early for `--version`/`-V`. Parsing errors and `--help` output are handled
/// by `argp` as usual.
pub fn from_env<T>() -> T
where T: TopLevelCommand {
    if std::env::args().skip(1).any(|arg| arg == "--version" || arg == "-V") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }
    argp::parse_args_or_exit(argp::DEFAULT)
}
