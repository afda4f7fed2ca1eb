mod commands;
mod terminal;

use commands::{CommandLine, Commands, discover, schedule};
use terminal::{logging, print};
use vortex_common::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init(commands.verbose);

    let cfg = Config {
        json: commands.json,
        no_findings: commands.no_findings,
        quiet: commands.quiet,
    };

    print::banner(cfg.json, cfg.quiet);

    let outcome = match commands.command {
        Commands::Discover { target, sweep } => {
            print::header("getting ready for discovery", cfg.quiet);
            discover::discover(&target, sweep.into_options()?, &cfg).await
        }
        Commands::Schedule { file } => {
            print::header("loading schedule", cfg.quiet);
            schedule::schedule(&file, &cfg).await
        }
    };

    if !cfg.json {
        print::end_of_program();
    }
    outcome
}
