/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::io::{self, Write};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::cli::args::Cli;

fn write_completion(shell: Shell, writer: &mut dyn Write) {
    clap_complete::generate(shell, &mut Cli::command(), env!("CARGO_PKG_NAME"), writer);
}

pub fn completion_main(cli: &CompletionCli) -> Result<()> {
    write_completion(cli.shell, &mut io::stdout());

    Ok(())
}

/// Generate shell tab completion configs for lkshell.
#[derive(Debug, Parser)]
pub struct CompletionCli {
    /// The shell to generate completions for.
    #[arg(value_name = "SHELL", value_parser)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_completion_lists_subcommands() {
        let mut data = vec![];
        write_completion(Shell::Bash, &mut data);

        let script = String::from_utf8(data).unwrap();
        for subcommand in ["shell", "patch", "info", "export-config"] {
            assert!(script.contains(subcommand), "{subcommand}");
        }
    }
}
