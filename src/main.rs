use std::process;

use clap::Parser;
use etrace::config::{EtraceConfig, set_config_path};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EtraceConfig::load()?;
    match cli.command {
        Commands::Exec(args) => commands::exec::handle_exec(args, &config),
        Commands::File(args) => commands::file::handle_file(args, &config),
        Commands::Analyze { mode } => commands::analyze::handle_analyze(mode, &config),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(path) = &cli.config {
        set_config_path(path.clone());
    }

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}
