/*
 * SPDX-FileCopyrightText: 2026 lkshell contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::{
    cli::{status, warning},
    format::lk::Partition,
    patch::{
        config::{LogLevel, PatcherConfig},
        definitions::PatchManager,
        lk::{LkPatcher, PatchEvent},
    },
    util,
};

/// Default output path: `<stem>-patched.<ext>` next to the input.
fn default_output(image: &Path) -> PathBuf {
    let mut name = image.file_stem().unwrap_or_default().to_os_string();
    name.push("-patched");
    if let Some(ext) = image.extension() {
        name.push(".");
        name.push(ext);
    }

    image.with_file_name(name)
}

fn list_partitions(patcher: &LkPatcher) {
    let image = patcher.image();
    if image.partition_count() == 0 {
        println!("No partitions found in image.");
        return;
    }

    println!("Partitions in bootloader image:");
    println!("{}", "-".repeat(40));
    for (i, partition) in image.partitions().enumerate() {
        println!(
            "{}. {} ({} bytes)",
            i + 1,
            partition.header.name,
            partition.data.len(),
        );
    }
    println!("{}", "-".repeat(40));
}

fn display_partition_info(partition: &Partition) {
    const PREVIEW_SIZE: usize = 64;

    println!("Partition details:");
    println!("{}", "=".repeat(60));
    println!("{partition}");
    println!("{}", "-".repeat(60));
    println!("Size: {} bytes", partition.data.len());

    let preview = &partition.data[..partition.data.len().min(PREVIEW_SIZE)];
    let hex_preview = preview
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    let ellipsis = if partition.data.len() > PREVIEW_SIZE {
        "..."
    } else {
        ""
    };
    println!("Data preview: {hex_preview}{ellipsis}");
    println!("{}", "=".repeat(60));
}

pub fn patch_subcommand(cli: &PatchCli, log_level: Option<LogLevel>) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PatcherConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {path:?}"))?,
        None => PatcherConfig::default(),
    };

    if let Some(level) = log_level {
        config.log_level = level;
    }
    config.backup |= cli.backup;
    if let Some(dir) = &cli.backup_dir {
        config.backup_dir = Some(dir.clone());
    }
    config.dry_run |= cli.dry_run;
    if !cli.category.is_empty() {
        config.patch_categories = cli.category.iter().cloned().collect();
    }
    if !cli.exclude.is_empty() {
        config.exclude_categories = cli.exclude.iter().cloned().collect();
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.input));

    let mut patcher = LkPatcher::new(&cli.input, cli.json_patches.as_deref(), config)
        .with_context(|| format!("Failed to load patcher for: {:?}", cli.input))?;

    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("#>-"));
    }

    let result = patcher.patch(&output, &mut |event: PatchEvent| match event {
        PatchEvent::Started { total } => bar.set_length(total as u64),
        PatchEvent::Needle { category, .. } => {
            bar.set_message(category.to_owned());
            bar.inc(1);
        }
        PatchEvent::Finished { .. } => bar.finish_and_clear(),
    });
    bar.finish_and_clear();
    let report = result.with_context(|| format!("Failed to patch: {:?}", cli.input))?;

    if report.skipped_patches > 0 {
        warning!(
            "{} of {} patches were not found",
            report.skipped_patches,
            report.total_patches,
        );
    }

    if report.dry_run {
        status!("Dry run complete: {} patches would be applied", report.applied_patches);
    } else {
        status!("Patched image saved to {:?}", report.output);
    }

    Ok(())
}

pub fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let patcher = LkPatcher::new(&cli.input, None, PatcherConfig::default())
        .with_context(|| format!("Failed to load image: {:?}", cli.input))?;

    if cli.action.list {
        list_partitions(&patcher);
    } else if let Some(name) = &cli.action.partition {
        let Some(partition) = patcher.image().partition(name) else {
            list_partitions(&patcher);
            bail!("Partition not found: {name:?}");
        };

        display_partition_info(&partition);
    } else if let Some(name) = &cli.action.dump {
        let path = patcher.dump_partition(name, Path::new("."))?;
        status!("Dumped partition {name} to {path:?}");
    } else if let Some(dir) = &cli.action.extract {
        let paths = patcher.extract_all_partitions(dir)?;
        status!("Extracted {} partitions to {dir:?}", paths.len());
    } else {
        println!("{}", patcher.analyze_image());
    }

    Ok(())
}

pub fn export_config_subcommand(cli: &ExportConfigCli) -> Result<()> {
    let config = PatcherConfig::default();
    let manager = PatchManager::new(cli.json_patches.as_deref(), &config)?;

    let available = manager
        .patches()
        .iter()
        .map(|(category, patches)| (category.clone(), patches.keys().cloned().collect()))
        .collect::<BTreeMap<String, Vec<String>>>();

    let mut value = serde_json::to_value(&config)?;
    if let Value::Object(object) = &mut value {
        object.insert("available_patches".to_owned(), serde_json::to_value(available)?);
    }

    let data = util::to_json_pretty(&value)?;
    fs::write(&cli.output, data)
        .with_context(|| format!("Failed to write configuration: {:?}", cli.output))?;

    status!("Configuration exported to {:?}", cli.output);

    if let Some(path) = &cli.patches_output {
        manager
            .export_patches(path)
            .with_context(|| format!("Failed to write patch definitions: {path:?}"))?;

        status!("Patch definitions exported to {path:?}");
    }

    Ok(())
}

/// Patch an LK image without the interactive menu.
#[derive(Debug, Parser)]
pub struct PatchCli {
    /// Path to the LK image.
    #[arg(value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to the patched output image.
    ///
    /// Defaults to `<stem>-patched.<ext>` next to the input.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,

    /// JSON file with custom patches.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub json_patches: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Patch category to apply (can be used multiple times).
    #[arg(long, value_name = "NAME")]
    pub category: Vec<String>,

    /// Patch category to exclude (can be used multiple times).
    #[arg(long, value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Create a backup of the input before patching.
    #[arg(long)]
    pub backup: bool,

    /// Directory to store backups in.
    #[arg(long, value_name = "DIR", value_parser)]
    pub backup_dir: Option<PathBuf>,

    /// Report what would be patched without writing the output.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
pub struct InfoAction {
    /// List all partitions.
    #[arg(short, long)]
    pub list: bool,

    /// Show detailed information about a partition.
    #[arg(short, long, value_name = "NAME")]
    pub partition: Option<String>,

    /// Dump a partition to `<stem>_<name>.bin` in the current directory.
    #[arg(short, long, value_name = "NAME")]
    pub dump: Option<String>,

    /// Extract all partitions to a directory.
    #[arg(short, long, value_name = "DIR", value_parser)]
    pub extract: Option<PathBuf>,
}

/// Inspect an LK image.
///
/// Without any options, a summary of the image is shown.
#[derive(Debug, Parser)]
pub struct InfoCli {
    /// Path to the LK image.
    #[arg(value_name = "FILE", value_parser)]
    pub input: PathBuf,

    #[command(flatten)]
    pub action: InfoAction,
}

/// Write the default configuration and list of available patches.
#[derive(Debug, Parser)]
pub struct ExportConfigCli {
    /// Path to the output JSON file.
    #[arg(value_name = "FILE", value_parser)]
    pub output: PathBuf,

    /// JSON file with custom patches to include.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub json_patches: Option<PathBuf>,

    /// Also write the effective patch definitions to this file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub patches_output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_name() {
        assert_eq!(
            default_output(Path::new("dir/lk.img")),
            Path::new("dir/lk-patched.img"),
        );
        assert_eq!(default_output(Path::new("lk")), Path::new("lk-patched"));
    }
}
