use argp::FromArgs;
use tracing_subscriber::EnvFilter;

pub mod analysis;
pub mod argp_version;
pub mod cmd;
pub mod obj;
pub mod util;

#[derive(FromArgs, PartialEq, Debug)]
/// N64 ROM splitting toolkit for MIPS decompilation projects.
struct TopLevel {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Split(cmd::split::Args),
    Yay0(cmd::yay0::Args),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: TopLevel = argp_version::from_env();
    let result = match args.command {
        SubCommand::Split(c_args) => cmd::split::run(c_args),
        SubCommand::Yay0(c_args) => cmd::yay0::run(c_args),
    };
    if let Err(e) = result {
        eprintln!("Failed: {e:?}");
        std::process::exit(1);
    }
}
