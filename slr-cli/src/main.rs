//! SLR CLI - sea-level-rise flood scenarios and AOI exposure from the command line.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "slr-cli",
    version,
    about = "Sea-level-rise flood scenario and exposure toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: slr_cmd::Command,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    slr_cmd::run(cli.command)
}
