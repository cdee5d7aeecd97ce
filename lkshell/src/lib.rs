/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! lkshell is primarily an application and not a library. The semver
//! versioning covers the CLI only. All Rust APIs can change at any time.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files aim to be generic.

pub mod cli;
pub mod format;
pub mod patch;
pub mod stream;
pub mod util;
