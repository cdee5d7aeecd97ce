// SPDX-FileCopyrightText: 2026 lkshell contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};

use ring::digest;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    format::lk::{self, LkImage},
    patch::{
        config::PatcherConfig,
        definitions::{self, PatchManager},
    },
    stream::{FromReader, ToWriter},
    util::{self, Abbrev},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("No needles found in {0:?}")]
    NoNeedlesFound(PathBuf),
    #[error("Partition not found: {0:?}")]
    PartitionNotFound(String),
    #[error("Invalid hex string in patch definitions: {0:?}")]
    InvalidHex(String, #[source] hex::FromHexError),
    #[error("Failed to apply patch {0}")]
    Apply(String, #[source] lk::Error),
    #[error("Failed to load LK image: {0:?}")]
    Image(PathBuf, #[source] lk::Error),
    #[error("Patch definitions error")]
    Definitions(#[from] definitions::Error),
    #[error("Unable to access {0:?}")]
    File(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Progress notifications emitted while patching.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchEvent<'a> {
    /// Patching is starting with this many needles in total.
    Started { total: usize },
    /// A needle was processed. `applied` is false if it was not found.
    Needle {
        category: &'a str,
        needle: &'a str,
        applied: bool,
    },
    Finished { applied: usize, skipped: usize },
}

/// The summary written next to the output image as
/// `<output>.patch_report.json`.
#[derive(Clone, Debug, Serialize)]
pub struct PatchReport {
    pub timestamp: String,
    pub image: PathBuf,
    pub total_patches: usize,
    pub applied_patches: usize,
    pub skipped_patches: usize,
    pub dry_run: bool,
    pub results: BTreeMap<String, BTreeMap<String, bool>>,
    /// Where the patched image was (or, for dry runs, would have been)
    /// written.
    #[serde(skip)]
    pub output: PathBuf,
}

impl PatchReport {
    pub fn report_path(output: &Path) -> PathBuf {
        output.with_extension("patch_report.json")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionInfo {
    pub name: String,
    pub size: usize,
    pub has_ext_header: bool,
    pub memory_address: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageAnalysis {
    pub image_path: PathBuf,
    pub image_size: usize,
    pub partition_count: usize,
    pub partitions: Vec<PartitionInfo>,
}

impl fmt::Display for ImageAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image analysis:")?;
        writeln!(f, "- Image path:      {:?}", self.image_path)?;
        writeln!(f, "- Image size:      {}", self.image_size)?;
        write!(f, "- Partition count: {}", self.partition_count)?;

        for (i, p) in self.partitions.iter().enumerate() {
            writeln!(f)?;
            write!(
                f,
                "  {}. {:<16} {:>10} bytes  addr={}  ext={}",
                i + 1,
                p.name,
                p.size,
                p.memory_address,
                p.has_ext_header,
            )?;
        }

        Ok(())
    }
}

/// Patches MediaTek LK bootloader images.
#[derive(Debug)]
pub struct LkPatcher {
    path: PathBuf,
    image: LkImage,
    manager: PatchManager,
    config: PatcherConfig,
}

impl LkPatcher {
    pub fn new(image: &Path, patches: Option<&Path>, config: PatcherConfig) -> Result<Self> {
        let manager = PatchManager::new(patches, &config)?;

        let file = File::open(image).map_err(|e| Error::File(image.to_owned(), e))?;
        let image_data = LkImage::from_reader(BufReader::new(file))
            .map_err(|e| Error::Image(image.to_owned(), e))?;

        info!(
            "Loaded image from {image:?} with {} partitions",
            image_data.partition_count(),
        );

        Ok(Self {
            path: image.to_owned(),
            image: image_data,
            manager,
            config,
        })
    }

    pub fn image(&self) -> &LkImage {
        &self.image
    }

    pub fn patch_manager(&self) -> &PatchManager {
        &self.manager
    }

    /// Apply every applicable patch and save the result to `output`. Needles
    /// that aren't found are skipped. The output is written atomically, so a
    /// failure never leaves a partially written file behind.
    pub fn patch(
        &mut self,
        output: &Path,
        progress: &mut dyn FnMut(PatchEvent),
    ) -> Result<PatchReport> {
        if self.config.backup && !self.config.dry_run {
            let backup = create_backup(&self.path, self.config.backup_dir.as_deref())?;
            info!("Created backup at {backup:?}");
        }

        let applicable = self.manager.applicable_patches(&self.config);

        if applicable.is_empty() {
            warn!("No applicable patches based on current configuration");

            if !self.config.dry_run {
                return Err(Error::NoNeedlesFound(self.path.clone()));
            }
        }

        info!(
            "Starting patching process with {} categories",
            applicable.len(),
        );

        let total: usize = applicable.values().map(|p| p.len()).sum();
        let mut applied = 0;
        let mut skipped = 0;
        let mut results = BTreeMap::<String, BTreeMap<String, bool>>::new();

        progress(PatchEvent::Started { total });

        let original_digest = sha256_hex(self.image.contents());
        debug!("Original image SHA-256: {original_digest}");

        for (category, patches) in &applicable {
            info!("Processing category: {category} ({} patches)", patches.len());

            let category_results = results.entry(category.clone()).or_default();

            for (needle, replacement) in patches {
                let found = if self.config.dry_run {
                    info!(
                        "DRY RUN: Would apply patch {} -> {}",
                        Abbrev(needle),
                        Abbrev(replacement),
                    );
                    true
                } else {
                    self.apply_one(needle, replacement)?
                };

                if found {
                    applied += 1;
                } else {
                    skipped += 1;
                }

                category_results.insert(needle.clone(), found);
                progress(PatchEvent::Needle {
                    category,
                    needle,
                    applied: found,
                });
            }
        }

        info!("Patching summary: {applied}/{total} patches applied, {skipped} skipped");
        progress(PatchEvent::Finished { applied, skipped });

        if applied == 0 && !self.config.dry_run {
            self.dump_debug_info();

            if !self.config.allow_incomplete {
                return Err(Error::NoNeedlesFound(self.path.clone()));
            }

            warn!("No patches were applied, but continuing due to allow_incomplete");
        }

        if !self.config.dry_run {
            let new_digest = sha256_hex(self.image.contents());
            debug!("New image SHA-256: {new_digest}");

            if new_digest == original_digest && applied > 0 {
                warn!("Image digest unchanged despite applying patches");
            }

            self.save(output)?;
            info!("Saved patched image to {output:?}");
        }

        let report = PatchReport {
            timestamp: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
            image: self.path.clone(),
            total_patches: total,
            applied_patches: applied,
            skipped_patches: skipped,
            dry_run: self.config.dry_run,
            results,
            output: output.to_owned(),
        };

        let report_path = PatchReport::report_path(output);
        match util::to_json_pretty(&report).and_then(|data| fs::write(&report_path, data)) {
            Ok(()) => debug!("Patch report saved to {report_path:?}"),
            Err(e) => warn!("Failed to write patch report to {report_path:?}: {e}"),
        }

        Ok(report)
    }

    /// Returns false if the needle is not present in the image.
    fn apply_one(&mut self, needle: &str, replacement: &str) -> Result<bool> {
        let needle_bytes =
            hex::decode(needle).map_err(|e| Error::InvalidHex(needle.to_owned(), e))?;
        let replacement_bytes =
            hex::decode(replacement).map_err(|e| Error::InvalidHex(replacement.to_owned(), e))?;

        match self.image.apply_patch(&needle_bytes, &replacement_bytes) {
            Ok(offset) => {
                debug!(
                    "Successfully applied patch {} -> {} at {offset:#x}",
                    Abbrev(needle),
                    Abbrev(replacement),
                );
                Ok(true)
            }
            Err(lk::Error::NeedleNotFound(_)) => {
                debug!("Needle not found: {needle}");
                Ok(false)
            }
            Err(e) => Err(Error::Apply(needle.to_owned(), e)),
        }
    }

    /// Write the partition table next to the input image to help figure out
    /// why no needles matched. Failures are only logged.
    fn dump_debug_info(&self) {
        let mut debug_path = self.path.clone().into_os_string();
        debug_path.push(".debug.txt");
        let debug_path = PathBuf::from(debug_path);

        let mut data = String::new();
        for partition in self.image.partitions() {
            data.push_str(&format!("{}:\n{partition}\n\n", partition.header.name));
        }

        match fs::write(&debug_path, data) {
            Ok(()) => info!("Dumped partition info to {debug_path:?} for debugging"),
            Err(e) => warn!("Failed to dump partition info to {debug_path:?}: {e}"),
        }
    }

    fn save(&self, output: &Path) -> Result<()> {
        let file = NamedTempFile::new_in(util::parent_path(output))
            .map_err(|e| Error::File(output.to_owned(), e))?;
        let mut writer = BufWriter::new(file);

        self.image.to_writer(&mut writer).map_err(|e| match e {
            lk::Error::DataWrite(_, e) => Error::File(output.to_owned(), e),
            e => Error::Image(output.to_owned(), e),
        })?;

        let file = writer
            .into_inner()
            .map_err(|e| Error::File(output.to_owned(), e.into_error()))?;
        file.persist(output)
            .map_err(|e| Error::File(output.to_owned(), e.error))?;

        Ok(())
    }

    pub fn analyze_image(&self) -> ImageAnalysis {
        let partitions = self
            .image
            .partitions()
            .map(|p| PartitionInfo {
                name: p.header.name.clone(),
                size: p.data.len(),
                has_ext_header: p.header.is_extended(),
                memory_address: format!("{:#010x}", p.header.memory_address),
            })
            .collect();

        ImageAnalysis {
            image_path: self.path.clone(),
            image_size: self.image.len(),
            partition_count: self.image.partition_count(),
            partitions,
        }
    }

    /// Save the data of partition `name` to `<dir>/<image stem>_<name>.bin`.
    pub fn dump_partition(&self, name: &str, dir: &Path) -> Result<PathBuf> {
        let Some(partition) = self.image.partition(name) else {
            let available = self
                .image
                .partitions()
                .map(|p| p.header.name.as_str())
                .collect::<Vec<_>>();
            info!("Available partitions: {available:?}");

            return Err(Error::PartitionNotFound(name.to_owned()));
        };

        let file_name = match self.path.file_stem() {
            Some(stem) => format!("{}_{name}.bin", stem.to_string_lossy()),
            None => format!("{name}.bin"),
        };
        let path = dir.join(file_name);

        fs::write(&path, partition.data).map_err(|e| Error::File(path.clone(), e))?;
        info!("Successfully dumped partition {name} to {path:?}");

        Ok(path)
    }

    /// Save every partition to `<dir>/<name>.bin`, replacing non-alphanumeric
    /// characters in the name with `_`. Partitions that fail to save are
    /// logged and skipped.
    pub fn extract_all_partitions(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| Error::File(dir.to_owned(), e))?;

        let mut saved = vec![];

        for partition in self.image.partitions() {
            let safe_name = partition
                .header
                .name
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect::<String>();
            let path = dir.join(format!("{safe_name}.bin"));

            match fs::write(&path, partition.data) {
                Ok(()) => {
                    info!("Extracted partition {} to {path:?}", partition.header.name);
                    saved.push(path);
                }
                Err(e) => {
                    warn!("Failed to extract partition {}: {e}", partition.header.name);
                }
            }
        }

        Ok(saved)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

/// Copy `image` to `<backup_dir>/<stem>_backup_<timestamp>.<ext>`. Without a
/// backup directory, the copy is placed next to the image.
pub fn create_backup(image: &Path, backup_dir: Option<&Path>) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let stem = image.file_stem().unwrap_or_default().to_string_lossy();
    let mut name = format!("{stem}_backup_{timestamp}");
    if let Some(ext) = image.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }

    let dir = match backup_dir {
        Some(d) => {
            fs::create_dir_all(d).map_err(|e| Error::File(d.to_owned(), e))?;
            d
        }
        None => util::parent_path(image),
    };
    let path = dir.join(name);

    fs::copy(image, &path).map_err(|e| Error::File(path.clone(), e))?;

    Ok(path)
}

/// An opened image that can be patched and inspected. This is the boundary the
/// interactive shell drives.
pub trait ImagePatcher {
    fn patch(
        &mut self,
        output: &Path,
        progress: &mut dyn FnMut(PatchEvent),
    ) -> Result<PatchReport>;

    fn analyze_image(&self) -> ImageAnalysis;
}

impl ImagePatcher for LkPatcher {
    fn patch(
        &mut self,
        output: &Path,
        progress: &mut dyn FnMut(PatchEvent),
    ) -> Result<PatchReport> {
        LkPatcher::patch(self, output, progress)
    }

    fn analyze_image(&self) -> ImageAnalysis {
        LkPatcher::analyze_image(self)
    }
}

/// Opens images for patching.
pub trait Backend {
    fn open(
        &self,
        image: &Path,
        patches: &Path,
        config: PatcherConfig,
    ) -> Result<Box<dyn ImagePatcher>>;
}

/// The [`Backend`] backed by [`LkPatcher`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LkBackend;

impl Backend for LkBackend {
    fn open(
        &self,
        image: &Path,
        patches: &Path,
        config: PatcherConfig,
    ) -> Result<Box<dyn ImagePatcher>> {
        let patcher = LkPatcher::new(image, Some(patches), config)?;
        Ok(Box::new(patcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_path_replaces_extension() {
        assert_eq!(
            PatchReport::report_path(Path::new("out/lk_patched.img")),
            Path::new("out/lk_patched.patch_report.json"),
        );
        assert_eq!(
            PatchReport::report_path(Path::new("lk")),
            Path::new("lk.patch_report.json"),
        );
    }

    #[test]
    fn backup_name_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("lk.img");
        fs::write(&image, b"data").unwrap();

        let backup_dir = dir.path().join("backups");
        let path = create_backup(&image, Some(&backup_dir)).unwrap();

        assert_eq!(path.parent(), Some(backup_dir.as_path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("lk_backup_"), "{name}");
        assert!(name.ends_with(".img"), "{name}");
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }
}
