// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{InstallArgs, Session};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.global.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "larder", &mut std::io::stdout());
        return Ok(());
    }

    let session = Session::new(cli.global)?;

    match cli.command {
        Commands::Install {
            names,
            build_from_source,
            head,
            skip_tests,
            workers,
            jobs,
            keep_builddir,
            dry_run,
        } => commands::cmd_install(
            &session,
            InstallArgs {
                names,
                build_from_source,
                head,
                skip_tests,
                workers,
                jobs,
                keep_builddir,
                dry_run,
            },
        ),
        Commands::Test { name } => commands::cmd_test(&session, &name),
        Commands::Deps {
            name,
            build_from_source,
            head,
        } => commands::cmd_deps(&session, &name, build_from_source, head),
        Commands::Uses { name, recursive } => commands::cmd_uses(&session, &name, recursive),
        Commands::Fetch {
            names,
            build_from_source,
            head,
        } => commands::cmd_fetch(&session, &names, build_from_source, head),
        Commands::Info { name } => commands::cmd_info(&session, &name),
        Commands::Check => commands::cmd_check(&session),
        Commands::Completions { .. } => Ok(()),
    }
}
