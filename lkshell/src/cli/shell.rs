/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::{
    cli::{
        bootstrap::{self, Requirement, Status},
        project::{CleanupStatus, Project, TargetKind},
    },
    patch::{
        config::PatcherConfig,
        lk::{Backend, PatchEvent, PatchReport},
    },
};

const CYAN: &str = "\x1b[96m";
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const END: &str = "\x1b[0m";

/// Line-based terminal I/O for the shell.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }

    fn line(&mut self, color: &str, msg: &str) -> io::Result<()> {
        writeln!(self.output, "{color}{msg}{END}")
    }

    pub fn info(&mut self, msg: &str) -> io::Result<()> {
        self.line(CYAN, msg)
    }

    pub fn success(&mut self, msg: &str) -> io::Result<()> {
        self.line(GREEN, msg)
    }

    pub fn notice(&mut self, msg: &str) -> io::Result<()> {
        self.line(YELLOW, msg)
    }

    pub fn error(&mut self, msg: &str) -> io::Result<()> {
        self.line(RED, msg)
    }

    pub fn heading(&mut self, msg: &str) -> io::Result<()> {
        writeln!(self.output, "{CYAN}{BOLD}{msg}{END}")
    }

    pub fn plain(&mut self, msg: &str) -> io::Result<()> {
        writeln!(self.output, "{msg}")
    }

    /// Show a prompt and read one trimmed line. Returns [`None`] at the end of
    /// the input.
    pub fn prompt(&mut self, msg: &str) -> io::Result<Option<String>> {
        write!(self.output, "{YELLOW}{msg}{END}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim().to_owned()))
    }

    /// Wait for the user to press enter. Returns false at the end of the input.
    pub fn pause(&mut self) -> io::Result<bool> {
        Ok(self.prompt("\nPress Enter to return to the menu...")?.is_some())
    }

    pub fn clear(&mut self) -> io::Result<()> {
        write!(self.output, "\x1b[2J\x1b[H")?;
        self.output.flush()
    }
}

/// State that lives for one interactive session.
#[derive(Debug, Default)]
pub struct SessionState {
    /// The most recent destination entered for a patch. This is recorded
    /// before patching, so the file may not exist.
    pub last_output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MenuChoice {
    Patch,
    Clean,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "1" => Some(Self::Patch),
            "2" => Some(Self::Clean),
            "3" => Some(Self::Exit),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum AbortReason {
    EmptyPath,
    SourceNotFound(PathBuf),
    OverwriteDeclined(PathBuf),
    /// The patcher (or preparing its inputs) failed. The message includes the
    /// full error chain.
    Failed(String),
}

#[derive(Debug)]
pub enum PatchOutcome {
    Done(PatchReport),
    Aborted(AbortReason),
}

pub struct ShellOptions {
    /// Clear the terminal before each screen.
    pub clear_screen: bool,
    /// Draw a progress bar while patching.
    pub progress: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            clear_screen: true,
            progress: true,
        }
    }
}

/// The interactive menu. All file operations happen relative to the project
/// root.
pub struct Shell<'a, R, W> {
    console: Console<R, W>,
    project: Project,
    backend: &'a dyn Backend,
    options: ShellOptions,
}

impl<'a, R: BufRead, W: Write> Shell<'a, R, W> {
    pub fn new(
        console: Console<R, W>,
        project: Project,
        backend: &'a dyn Backend,
        options: ShellOptions,
    ) -> Self {
        Self {
            console,
            project,
            backend,
            options,
        }
    }

    pub fn into_console(self) -> Console<R, W> {
        self.console
    }

    fn screen(&mut self) -> io::Result<()> {
        if self.options.clear_screen {
            self.console.clear()?;
        }

        self.banner()
    }

    pub fn banner(&mut self) -> io::Result<()> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        self.console.heading("=========================================")?;
        self.console.info("       MTK LK Patcher - Fastboot Unlock")?;
        self.console
            .info(&format!("       {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))?;
        self.console.info(&format!("       {now}"))?;
        self.console.heading("=========================================")?;
        self.console.plain("")
    }

    /// Make sure every requirement is installed. Any install failure is fatal
    /// since the session can't continue without its dependencies.
    pub fn bootstrap(&mut self, requirements: &[Requirement]) -> Result<()> {
        self.console.notice("Checking dependencies...")?;

        for requirement in requirements {
            let mut notice = Ok(());
            let status = bootstrap::ensure(requirement, |r| {
                notice = self.console.notice(&format!("Installing {}...", r.name));
            });
            notice?;

            match status? {
                Status::AlreadyInstalled => self.console.success(&format!(
                    "{} is already installed, skipping.",
                    requirement.name
                ))?,
                Status::Installed => self
                    .console
                    .success(&format!("{} installed successfully!", requirement.name))?,
            }
        }

        Ok(())
    }

    /// Run the menu until the user exits or the input ends.
    pub fn run(&mut self, state: &mut SessionState) -> Result<()> {
        loop {
            self.screen()?;
            self.console.heading("=== LK Patcher Menu ===")?;
            self.console.notice("1. Patch LK Partition")?;
            self.console.notice("2. Clean Project")?;
            self.console.notice("3. Exit")?;

            let Some(input) = self.console.prompt("Choose an option (1-3): ")? else {
                debug!("End of input reached");
                self.farewell()?;
                return Ok(());
            };

            match MenuChoice::parse(&input) {
                Some(MenuChoice::Patch) => {
                    self.screen()?;
                    self.patch_lk_partition(state)?;
                    self.console.pause()?;
                }
                Some(MenuChoice::Clean) => {
                    self.screen()?;
                    self.clean_project(state)?;
                    self.console.pause()?;
                }
                Some(MenuChoice::Exit) => {
                    self.farewell()?;
                    return Ok(());
                }
                None => {
                    self.console
                        .error("Invalid choice! Please choose 1, 2, or 3.")?;
                    self.console.pause()?;
                }
            }
        }
    }

    fn farewell(&mut self) -> io::Result<()> {
        self.console.success("Exiting. Thank you!")
    }

    /// Prompt for the input and output images and patch. Only console I/O
    /// errors are returned. Everything else aborts the operation with a
    /// message.
    pub fn patch_lk_partition(&mut self, state: &mut SessionState) -> io::Result<PatchOutcome> {
        self.console.heading("=== Input File ===")?;
        let input = self
            .console
            .prompt("Enter the target file name (e.g. lk.img): ")?
            .unwrap_or_default();
        let output = self
            .console
            .prompt("Enter the patched file name (e.g. lk_patched.img): ")?
            .unwrap_or_default();

        if input.is_empty() || output.is_empty() {
            self.console.error("Error: File names must not be empty!")?;
            return Ok(PatchOutcome::Aborted(AbortReason::EmptyPath));
        }

        let input_path = self.project.resolve(Path::new(&input));
        if !input_path.exists() {
            self.console
                .error(&format!("Error: File {input} not found!"))?;
            return Ok(PatchOutcome::Aborted(AbortReason::SourceNotFound(
                PathBuf::from(input),
            )));
        }

        let output_path = self.project.resolve(Path::new(&output));
        if output_path.exists() {
            let answer = self
                .console
                .prompt(&format!("File {output} already exists. Overwrite? [y/N]: "))?
                .unwrap_or_default();

            if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
                self.console.notice("Patching cancelled.")?;
                return Ok(PatchOutcome::Aborted(AbortReason::OverwriteDeclined(
                    PathBuf::from(output),
                )));
            }
        }

        state.last_output = Some(PathBuf::from(&output));

        match self.run_patcher(&input_path, &output_path) {
            Ok(report) => {
                self.console
                    .success(&format!("Patching finished! Output: {}", report.output.display()))?;
                Ok(PatchOutcome::Done(report))
            }
            Err(e) => {
                let msg = format!("{e:#}");
                self.console.error(&format!("Error while patching: {msg}"))?;
                Ok(PatchOutcome::Aborted(AbortReason::Failed(msg)))
            }
        }
    }

    fn run_patcher(&mut self, input: &Path, output: &Path) -> Result<PatchReport> {
        self.console.notice("Preparing configuration files...")?;
        let patches_path = self.project.write_patches()?;
        self.console
            .success(&format!("Created {}.", patches_path.display()))?;
        let config_path = self.project.write_config()?;
        self.console
            .success(&format!("Created {}.", config_path.display()))?;

        let mut config = PatcherConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load configuration: {config_path:?}"))?;
        if let Some(dir) = &config.backup_dir {
            config.backup_dir = Some(self.project.resolve(dir));
        }

        self.console.notice("Starting patching process...")?;
        let mut patcher = self.backend.open(input, &patches_path, config)?;

        let bar = if self.options.progress {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("Patching [{bar:30}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("#>-"));
        }

        let result = patcher.patch(output, &mut |event: PatchEvent| match event {
            PatchEvent::Started { total } => bar.set_length(total as u64),
            PatchEvent::Needle { category, .. } => {
                bar.set_message(category.to_owned());
                bar.inc(1);
            }
            PatchEvent::Finished { .. } => bar.finish_and_clear(),
        });
        bar.finish_and_clear();
        let report = result?;

        self.console.notice(&format!(
            "Applied {}/{} patches ({} skipped).",
            report.applied_patches, report.total_patches, report.skipped_patches,
        ))?;

        let analysis = patcher.analyze_image();
        self.console.info("Image analysis result:")?;
        self.console.plain(&analysis.to_string())?;

        if report.dry_run {
            self.console
                .notice("Dry run: no output image was written.")?;
        } else {
            self.console.success(&format!(
                "{BOLD}Done! Patched file: {}",
                report.output.display()
            ))?;
            self.console
                .info("Flash the file using mtkclient or another tool.")?;
        }

        Ok(report)
    }

    /// Delete generated files and forget the last output. Missing targets are
    /// reported and skipped.
    pub fn clean_project(&mut self, state: &mut SessionState) -> io::Result<()> {
        self.console.notice("Cleaning project...")?;

        for entry in self.project.clean(state.last_output.as_deref()) {
            let kind = match entry.kind {
                TargetKind::File => "File",
                TargetKind::Directory => "Folder",
            };
            let path = entry.path.display();

            match entry.status {
                CleanupStatus::Removed => self.console.success(&format!("{kind} {path} removed."))?,
                CleanupStatus::Missing => self
                    .console
                    .notice(&format!("{kind} {path} not found, skipping."))?,
                CleanupStatus::Failed(e) => self
                    .console
                    .error(&format!("{kind} {path} could not be removed: {e}"))?,
            }
        }

        state.last_output = None;

        self.console
            .success("The project has been reset to its initial state.")
    }
}
