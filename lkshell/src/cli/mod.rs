/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod bootstrap;
pub mod completion;
pub mod lk;
pub mod project;
pub mod settings;
pub mod shell;

macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format!($($arg)*))
    }
}

macro_rules! warning {
    ($($arg:tt)*) => {
        println!("\x1b[1;31m[WARNING] {}\x1b[0m", format!($($arg)+))
    }
}

pub(crate) use status;
pub(crate) use warning;
