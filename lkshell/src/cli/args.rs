/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{Layer, Registry, filter::LevelFilter, fmt, prelude::*};

use crate::{
    cli::{
        completion, lk,
        project::Project,
        settings::{self, Settings},
        shell::{Console, SessionState, Shell, ShellOptions},
    },
    patch::{config::LogLevel, lk::LkBackend},
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the interactive menu (default).
    Shell,
    Patch(lk::PatchCli),
    Info(lk::InfoCli),
    ExportConfig(lk::ExportConfigCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Lowest log level to show.
    ///
    /// Defaults to WARNING for the interactive menu and INFO otherwise.
    #[arg(long, global = true, value_name = "LEVEL", value_parser)]
    pub log_level: Option<LogLevel>,

    /// Also append log messages to this file.
    ///
    /// If the file cannot be opened, a warning is printed and logging
    /// continues on stderr only.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub log_file: Option<PathBuf>,

    /// Directory the interactive menu works in.
    #[arg(long, global = true, value_name = "DIR", value_parser)]
    pub workdir: Option<PathBuf>,

    /// TOML file with shell settings.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub settings: Option<PathBuf>,

    /// Don't check for or install dependencies on startup.
    #[arg(long, global = true)]
    pub skip_bootstrap: bool,
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Plain text layer for a log file. Color codes are never written.
fn file_layer(file: File) -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .boxed()
}

pub fn init_logging(log_level: LogLevel, log_file: Option<&Path>) {
    let file_layer = log_file.and_then(|path| match open_log_file(path) {
        Ok(file) => Some(file_layer(file)),
        Err(e) => {
            eprintln!("Warning: Could not create log file {path:?}: {e}");
            None
        }
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(LevelFilter::from_level(log_level.into()))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();
}

fn shell_main(cli: &Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => settings::load_settings(path)?,
        None => Settings::default(),
    };

    let stdin = io::stdin();
    let console = Console::new(stdin.lock(), io::stdout());
    let project = Project::new(cli.workdir.as_deref().unwrap_or(Path::new(".")));
    let mut shell = Shell::new(console, project, &LkBackend, ShellOptions::default());

    shell.banner()?;

    if !cli.skip_bootstrap {
        shell.bootstrap(&settings.requirements)?;
    }

    shell.run(&mut SessionState::default())
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        None | Some(Command::Shell) => LogLevel::Warning,
        Some(_) => LogLevel::Info,
    };
    init_logging(
        cli.log_level.unwrap_or(default_level),
        cli.log_file.as_deref(),
    );
    logging_initialized.store(true, Ordering::SeqCst);

    match &cli.command {
        None | Some(Command::Shell) => shell_main(&cli),
        Some(Command::Patch(c)) => lk::patch_subcommand(c, cli.log_level),
        Some(Command::Info(c)) => lk::info_subcommand(c),
        Some(Command::ExportConfig(c)) => lk::export_config_subcommand(c),
        Some(Command::Completion(c)) => completion::completion_main(c),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_runs_shell() {
        let cli = Cli::try_parse_from(["lkshell", "--skip-bootstrap"]).unwrap();
        assert_matches!(cli.command, None);
        assert!(cli.skip_bootstrap);
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let cli = Cli::try_parse_from(["lkshell", "info", "lk.img", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_matches!(cli.command, Some(Command::Info(_)));

        assert!(Cli::try_parse_from(["lkshell", "--log-level", "verbose"]).is_err());
    }

    #[test]
    fn log_file_is_global() {
        let cli =
            Cli::try_parse_from(["lkshell", "info", "lk.img", "--log-file", "lk.log"]).unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("lk.log")));
    }

    #[test]
    fn file_layer_appends_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lkshell.log");
        fs::write(&path, "existing line\n").unwrap();

        let file = open_log_file(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(file_layer(file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Loaded image with 3 partitions");
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("existing line\n"), "{contents}");
        assert!(contents.contains("INFO"), "{contents}");
        assert!(contents.contains("Loaded image with 3 partitions"), "{contents}");
        assert!(!contents.contains('\x1b'), "{contents}");
    }

    #[test]
    fn unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("lkshell.log");

        assert!(open_log_file(&path).is_err());
    }

    #[test]
    fn info_actions_are_exclusive() {
        assert!(
            Cli::try_parse_from(["lkshell", "info", "lk.img", "--list", "--dump", "lk"]).is_err()
        );
    }
}
