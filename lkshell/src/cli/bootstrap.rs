/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    process::{Command, ExitStatus, Stdio},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const PYTHON: &str = "python3";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Install command for {0:?} is empty")]
    EmptyCommand(String),
    #[error("Failed to run install command for {name:?}: {command:?}")]
    Spawn {
        name: String,
        command: Vec<String>,
        #[source]
        source: io::Error,
    },
    #[error("Failed to install {name:?}: {command:?} exited with {status}")]
    InstallFailed {
        name: String,
        command: Vec<String>,
        status: ExitStatus,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// An external package that must be available. `probe` exits successfully if
/// the package is usable and `install` installs it.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Requirement {
    pub name: String,
    pub probe: Vec<String>,
    pub install: Vec<String>,
}

impl Requirement {
    /// A Python package that is probed by importing `module` and installed with
    /// pip.
    pub fn python(name: &str, module: &str) -> Self {
        Self {
            name: name.to_owned(),
            probe: vec![PYTHON.to_owned(), "-c".to_owned(), format!("import {module}")],
            install: [PYTHON, "-m", "pip", "install", name]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Replace the default install command, eg. for packages that must be
    /// installed from a non-default source.
    pub fn with_install(mut self, command: &[&str]) -> Self {
        self.install = command.iter().map(|s| (*s).to_owned()).collect();
        self
    }
}

/// The packages needed to flash patched images with mtkclient.
pub fn default_requirements() -> Vec<Requirement> {
    vec![
        Requirement::python("pyusb", "usb"),
        Requirement::python("mtkclient", "mtkclient").with_install(&[
            PYTHON,
            "-m",
            "pip",
            "install",
            "--upgrade",
            "git+https://github.com/bkerler/mtkclient",
        ]),
    ]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    AlreadyInstalled,
    Installed,
}

/// Check whether the requirement is available. A probe that can't even be
/// spawned counts as unavailable.
pub fn is_available(requirement: &Requirement) -> bool {
    let Some((program, args)) = requirement.probe.split_first() else {
        return false;
    };

    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match result {
        Ok(status) => {
            debug!("Probe for {:?} exited with {status}", requirement.name);
            status.success()
        }
        Err(e) => {
            debug!("Failed to run probe for {:?}: {e}", requirement.name);
            false
        }
    }
}

/// Install the requirement unless it's already available. The install
/// command's output is passed through to the terminal.
pub fn ensure(requirement: &Requirement, on_install: impl FnOnce(&Requirement)) -> Result<Status> {
    if is_available(requirement) {
        return Ok(Status::AlreadyInstalled);
    }

    let Some((program, args)) = requirement.install.split_first() else {
        return Err(Error::EmptyCommand(requirement.name.clone()));
    };

    on_install(requirement);

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::Spawn {
            name: requirement.name.clone(),
            command: requirement.install.clone(),
            source: e,
        })?;

    if !status.success() {
        return Err(Error::InstallFailed {
            name: requirement.name.clone(),
            command: requirement.install.clone(),
            status,
        });
    }

    Ok(Status::Installed)
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn requirement(probe: &[&str], install: &[&str]) -> Requirement {
        Requirement {
            name: "test".to_owned(),
            probe: probe.iter().map(|s| s.to_string()).collect(),
            install: install.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn available_skips_install() {
        let r = requirement(&["true"], &["false"]);
        let mut called = false;

        assert_matches!(ensure(&r, |_| called = true), Ok(Status::AlreadyInstalled));
        assert!(!called);
    }

    #[test]
    fn missing_is_installed() {
        let r = requirement(&["false"], &["true"]);
        let mut called = false;

        assert_matches!(ensure(&r, |_| called = true), Ok(Status::Installed));
        assert!(called);
    }

    #[test]
    fn unspawnable_probe_triggers_install() {
        let r = requirement(&["/nonexistent/probe"], &["true"]);
        assert_matches!(ensure(&r, |_| {}), Ok(Status::Installed));
    }

    #[test]
    fn install_failure_is_error() {
        let r = requirement(&["false"], &["false"]);
        assert_matches!(ensure(&r, |_| {}), Err(Error::InstallFailed { .. }));

        let r = requirement(&["false"], &[]);
        assert_matches!(ensure(&r, |_| {}), Err(Error::EmptyCommand(_)));

        let r = requirement(&["false"], &["/nonexistent/installer"]);
        assert_matches!(ensure(&r, |_| {}), Err(Error::Spawn { .. }));
    }

    #[test]
    fn python_defaults() {
        let r = Requirement::python("pyusb", "usb");
        assert_eq!(r.probe, ["python3", "-c", "import usb"]);
        assert_eq!(r.install, ["python3", "-m", "pip", "install", "pyusb"]);
    }
}
