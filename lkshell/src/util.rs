/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use num_traits::PrimInt;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// A small wrapper to shorten long hex strings in log messages. Strings longer
/// than 10 characters are cut off and suffixed with `...`.
#[derive(Clone, Copy)]
pub struct Abbrev<'a>(pub &'a str);

impl fmt::Display for Abbrev<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_LEN: usize = 10;

        match self.0.get(..MAX_LEN) {
            Some(prefix) if self.0.len() > MAX_LEN => write!(f, "{prefix}..."),
            _ => f.write_str(self.0),
        }
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        base.join(path)
    }
}

/// Serialize to JSON with 4-space indentation, matching the files produced by
/// MediaTek patching tools.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviate_long_strings() {
        assert_eq!(Abbrev("2de9f04fadf5ac5d").to_string(), "2de9f04fad...");
        assert_eq!(Abbrev("00207047").to_string(), "00207047");
        assert_eq!(Abbrev("0123456789").to_string(), "0123456789");
    }

    #[test]
    fn parent_of_bare_file_name() {
        assert_eq!(parent_path(Path::new("lk.img")), Path::new("."));
        assert_eq!(parent_path(Path::new("out/lk.img")), Path::new("out"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_relative_paths() {
        assert_eq!(
            resolve_path(Path::new("/work"), Path::new("lk.img")),
            PathBuf::from("/work/lk.img"),
        );
        assert_eq!(
            resolve_path(Path::new("/work"), Path::new("/abs/lk.img")),
            PathBuf::from("/abs/lk.img"),
        );
    }

    #[test]
    fn json_uses_four_space_indent() {
        let data = to_json_pretty(&serde_json::json!({ "backup": true })).unwrap();
        assert_eq!(data, b"{\n    \"backup\": true\n}");
    }

    #[test]
    fn num_bytes_plural() {
        assert_eq!(format!("{:?}", NumBytes(1u32)), "<1 byte>");
        assert_eq!(format!("{:?}", NumBytes(512u32)), "<512 bytes>");
    }
}
