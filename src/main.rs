mod cli;
mod commands;
mod config;
mod paths;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Promote(args) => commands::promote::run(ctx, args),
        Command::Doctor => commands::doctor::run(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "promoter", &mut io::stdout());
            Ok(())
        }
    }
}

/// Print the error chain, then what kind of failure it was and what to do.
fn report(err: &anyhow::Error) {
    ui::error(&err.to_string());
    for cause in err.chain().skip(1) {
        ui::dim_err(&format!("caused by: {cause}"));
    }

    if let Some(promote_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<promotekit::Error>())
    {
        let category = promote_err.category();
        eprintln!();
        ui::kv_err("error", category.description());
        ui::kv_err("advice", category.advice());
        if category.is_retryable() {
            ui::kv_err("retry", "safe to re-trigger this promotion");
        }
    }
}
