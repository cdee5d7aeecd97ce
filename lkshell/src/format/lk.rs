// SPDX-FileCopyrightText: 2026 lkshell contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Cursor, Read, Write},
    mem,
    ops::Range,
};

use bstr::ByteSlice;
use memchr::memmem;
use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, IntoBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::padding::{self, ZeroPadding},
    stream::{FromReader, ReadDiscardExt, ToWriter, WriteFillExt},
    util::NumBytes,
};

pub const LK_MAGIC: u32 = 0x5888_1688;
pub const LK_EXT_MAGIC: u32 = 0x5889_1689;
pub const LK_NAME_SIZE: usize = 32;

/// Size of a non-extended header. Extended headers specify their own size.
pub const LK_HEADER_SIZE: u32 = 512;

/// Upper bound for the header size of extended headers. Real images always use
/// 512 bytes.
const HEADER_MAX_SIZE: u32 = 64 * 1024;

/// Offset of the extended header fields. Non-extended headers end here and the
/// rest of the header is filled with `0xff`.
const EXT_OFFSET: usize = 48;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {0:#010x}")]
    UnknownMagic(u32),
    #[error("Image is empty")]
    EmptyImage,
    #[error("{0:?} field is too long (>{1}): {2:?}")]
    StringTooLong(&'static str, usize, String),
    #[error("{0:?} overflowed integer bounds during calculations")]
    IntOverflow(&'static str),
    #[error("Invalid header size: {0}")]
    InvalidHeaderSize(u32),
    #[error("Partition {name:?} at offset {offset:#x} extends past the end of the image")]
    PartitionOutOfBounds { name: String, offset: u64 },
    #[error("Needle must not be empty")]
    EmptyNeedle,
    #[error("Needle not found: {0}")]
    NeedleNotFound(String),
    #[error("Replacement of {len} bytes at offset {offset:#x} extends past the end of the image")]
    ReplacementOutOfBounds { offset: usize, len: usize },
    #[error("Failed to read LK image data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write LK image data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the partition header. The extended fields are only
/// meaningful when `ext_magic` is [`LK_EXT_MAGIC`].
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawHeader {
    /// Magic value. This should be equal to [`LK_MAGIC`].
    magic: little_endian::U32,
    data_size: little_endian::U32,
    name: [u8; LK_NAME_SIZE],
    addressing_mode: little_endian::U32,
    memory_address: little_endian::U32,
    ext_magic: little_endian::U32,
    header_size: little_endian::U32,
    header_version: little_endian::U32,
    image_type: little_endian::U32,
    image_list_end: little_endian::U32,
    alignment: little_endian::U32,
    data_size_high: little_endian::U32,
    memory_address_high: little_endian::U32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtHeader {
    pub header_size: u32,
    pub header_version: u32,
    pub image_type: u32,
    pub image_list_end: bool,
    pub alignment: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionHeader {
    pub name: String,
    pub data_size: u64,
    pub addressing_mode: u32,
    pub memory_address: u64,
    pub ext: Option<ExtHeader>,
}

impl PartitionHeader {
    /// Create a non-extended header with MediaTek's default addressing mode.
    pub fn new(name: &str, data_size: u64) -> Self {
        Self {
            name: name.to_owned(),
            data_size,
            addressing_mode: u32::MAX,
            memory_address: u64::from(u32::MAX),
            ext: None,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.ext.is_some()
    }

    pub fn header_size(&self) -> u32 {
        self.ext.as_ref().map_or(LK_HEADER_SIZE, |e| e.header_size)
    }

    /// Alignment of the next partition, if any.
    pub fn alignment(&self) -> Option<u32> {
        self.ext
            .as_ref()
            .map(|e| e.alignment)
            .filter(|a| *a != 0)
    }

    pub fn is_list_end(&self) -> bool {
        self.ext.as_ref().is_some_and(|e| e.image_list_end)
    }
}

impl fmt::Display for PartitionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- Name:            {:?}", self.name)?;
        writeln!(f, "- Data size:       {}", self.data_size)?;
        writeln!(f, "- Addressing mode: {:#x}", self.addressing_mode)?;
        write!(f, "- Memory address:  {:#010x}", self.memory_address)?;

        if let Some(ext) = &self.ext {
            writeln!(f)?;
            writeln!(f, "- Header size:     {}", ext.header_size)?;
            writeln!(f, "- Header version:  {}", ext.header_version)?;
            writeln!(f, "- Image type:      {:#x}", ext.image_type)?;
            writeln!(f, "- Image list end:  {}", ext.image_list_end)?;
            write!(f, "- Alignment:       {}", ext.alignment)?;
        }

        Ok(())
    }
}

impl<R: Read> FromReader<R> for PartitionHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let raw = RawHeader::read_from_io(&mut reader)
            .map_err(|e| Error::DataRead("Lk::header", e))?;

        if raw.magic.get() != LK_MAGIC {
            return Err(Error::UnknownMagic(raw.magic.get()));
        }

        // Names are not guaranteed to be UTF-8, but in practice they're ASCII.
        let name = raw.name.trim_end_padding().to_str_lossy().into_owned();

        let (data_size, memory_address, ext) = if raw.ext_magic.get() == LK_EXT_MAGIC {
            let header_size = raw.header_size.get();
            if header_size < mem::size_of::<RawHeader>() as u32 || header_size > HEADER_MAX_SIZE {
                return Err(Error::InvalidHeaderSize(header_size));
            }

            let data_size =
                u64::from(raw.data_size_high.get()) << 32 | u64::from(raw.data_size.get());
            let memory_address = u64::from(raw.memory_address_high.get()) << 32
                | u64::from(raw.memory_address.get());

            let ext = ExtHeader {
                header_size,
                header_version: raw.header_version.get(),
                image_type: raw.image_type.get(),
                image_list_end: raw.image_list_end.get() != 0,
                alignment: raw.alignment.get(),
            };

            (data_size, memory_address, Some(ext))
        } else {
            (
                u64::from(raw.data_size.get()),
                u64::from(raw.memory_address.get()),
                None,
            )
        };

        let header = Self {
            name,
            data_size,
            addressing_mode: raw.addressing_mode.get(),
            memory_address,
            ext,
        };

        let remain = header.header_size() - mem::size_of::<RawHeader>() as u32;
        reader
            .read_discard_exact(remain.into())
            .map_err(|e| Error::DataRead("Lk::header_padding", e))?;

        Ok(header)
    }
}

impl<W: Write> ToWriter<W> for PartitionHeader {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        let name = self
            .name
            .as_bytes()
            .to_padded_array::<LK_NAME_SIZE>()
            .ok_or_else(|| Error::StringTooLong("Lk::name", LK_NAME_SIZE, self.name.clone()))?;

        let header_size = self.header_size();
        if header_size < mem::size_of::<RawHeader>() as u32 || header_size > HEADER_MAX_SIZE {
            return Err(Error::InvalidHeaderSize(header_size));
        }

        let data_size_high = u32::try_from(self.data_size >> 32)
            .map_err(|_| Error::IntOverflow("Lk::data_size"))?;
        let memory_address_high = u32::try_from(self.memory_address >> 32)
            .map_err(|_| Error::IntOverflow("Lk::memory_address"))?;
        if self.ext.is_none() && (data_size_high != 0 || memory_address_high != 0) {
            return Err(Error::IntOverflow("Lk::data_size"));
        }

        let ext = self.ext.as_ref();
        let raw = RawHeader {
            magic: LK_MAGIC.into(),
            data_size: (self.data_size as u32).into(),
            name,
            addressing_mode: self.addressing_mode.into(),
            memory_address: (self.memory_address as u32).into(),
            ext_magic: LK_EXT_MAGIC.into(),
            header_size: header_size.into(),
            header_version: ext.map_or(0, |e| e.header_version).into(),
            image_type: ext.map_or(0, |e| e.image_type).into(),
            image_list_end: u32::from(ext.is_some_and(|e| e.image_list_end)).into(),
            alignment: ext.map_or(0, |e| e.alignment).into(),
            data_size_high: data_size_high.into(),
            memory_address_high: memory_address_high.into(),
        };

        let raw_bytes = if ext.is_some() {
            raw.as_bytes()
        } else {
            &raw.as_bytes()[..EXT_OFFSET]
        };

        writer
            .write_all(raw_bytes)
            .map_err(|e| Error::DataWrite("Lk::header", e))?;
        writer
            .write_fill(0xff, u64::from(header_size) - raw_bytes.len() as u64)
            .map_err(|e| Error::DataWrite("Lk::header_padding", e))?;

        Ok(())
    }
}

/// A partition entry located within an [`LkImage`].
#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    header: PartitionHeader,
    offset: usize,
    data: Range<usize>,
}

/// A borrowed view of a partition. The data always reflects the current
/// contents of the image, including any patches applied after loading.
#[derive(Clone, Copy)]
pub struct Partition<'a> {
    pub header: &'a PartitionHeader,
    /// Offset of the partition header within the image.
    pub offset: usize,
    pub data: &'a [u8],
}

impl fmt::Debug for Partition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("header", self.header)
            .field("offset", &self.offset)
            .field("data", &NumBytes(self.data.len()))
            .finish()
    }
}

impl fmt::Display for Partition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partition at offset {:#x}:", self.offset)?;
        write!(f, "{}", self.header)
    }
}

/// A MediaTek LK image. The raw contents are kept as-is so that trailing data
/// that isn't part of any partition (eg. certificates) survives patching.
#[derive(Clone, PartialEq, Eq)]
pub struct LkImage {
    contents: Vec<u8>,
    entries: Vec<Entry>,
}

impl fmt::Debug for LkImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LkImage")
            .field("contents", &NumBytes(self.contents.len()))
            .field("partitions", &self.partitions().collect::<Vec<_>>())
            .finish()
    }
}

impl LkImage {
    pub fn from_bytes(contents: Vec<u8>) -> Result<Self> {
        if contents.is_empty() {
            return Err(Error::EmptyImage);
        }

        let mut entries = Vec::<Entry>::new();
        let mut offset = 0usize;

        while offset < contents.len() {
            let mut reader = Cursor::new(&contents[offset..]);

            let header = match PartitionHeader::from_reader(&mut reader) {
                Ok(h) => h,
                Err(e @ (Error::UnknownMagic(_) | Error::DataRead(_, _)))
                    if !entries.is_empty() =>
                {
                    debug!(
                        "Stopping at offset {offset:#x} with {} trailing bytes: {e}",
                        contents.len() - offset,
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            let data_start = offset + header.header_size() as usize;
            let data_end = usize::try_from(header.data_size)
                .ok()
                .and_then(|s| data_start.checked_add(s))
                .filter(|end| *end <= contents.len())
                .ok_or_else(|| Error::PartitionOutOfBounds {
                    name: header.name.clone(),
                    offset: offset as u64,
                })?;

            let next = match header.alignment() {
                Some(a) => padding::round(data_end, a as usize)
                    .ok_or(Error::IntOverflow("Lk::alignment"))?,
                None => data_end,
            };
            let list_end = header.is_list_end();

            debug!(
                "Found partition {:?} at {offset:#x} ({} bytes)",
                header.name, header.data_size,
            );

            entries.push(Entry {
                header,
                offset,
                data: data_start..data_end,
            });

            if list_end {
                break;
            }

            offset = next;
        }

        Ok(Self { contents, entries })
    }

    /// Build an image from a list of partitions. The partitions are laid out
    /// back to back, honoring each header's alignment.
    pub fn from_partitions<'a>(
        partitions: impl IntoIterator<Item = (PartitionHeader, &'a [u8])>,
    ) -> Result<Self> {
        let mut writer = Cursor::new(Vec::new());

        for (mut header, data) in partitions {
            header.data_size = data.len() as u64;

            header.to_writer(&mut writer)?;
            writer
                .write_all(data)
                .map_err(|e| Error::DataWrite("Lk::data", e))?;

            if let Some(a) = header.alignment() {
                let pos = writer.position();
                writer
                    .write_fill(0, padding::calc(pos, u64::from(a)))
                    .map_err(|e| Error::DataWrite("Lk::data_padding", e))?;
            }
        }

        Self::from_bytes(writer.into_inner())
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn partitions(&self) -> impl Iterator<Item = Partition<'_>> {
        self.entries.iter().map(|e| Partition {
            header: &e.header,
            offset: e.offset,
            data: &self.contents[e.data.clone()],
        })
    }

    pub fn partition_count(&self) -> usize {
        self.entries.len()
    }

    /// Find a partition by name. If multiple partitions share a name, the first
    /// one is returned.
    pub fn partition(&self, name: &str) -> Option<Partition<'_>> {
        self.partitions().find(|p| p.header.name == name)
    }

    /// Overwrite the bytes at the first occurrence of `needle` with
    /// `replacement`. The replacement may be shorter or longer than the needle.
    /// Returns the offset of the match.
    pub fn apply_patch(&mut self, needle: &[u8], replacement: &[u8]) -> Result<usize> {
        if needle.is_empty() {
            return Err(Error::EmptyNeedle);
        }

        let offset = memmem::find(&self.contents, needle)
            .ok_or_else(|| Error::NeedleNotFound(hex::encode(needle)))?;
        let end = offset
            .checked_add(replacement.len())
            .filter(|end| *end <= self.contents.len())
            .ok_or(Error::ReplacementOutOfBounds {
                offset,
                len: replacement.len(),
            })?;

        self.contents[offset..end].copy_from_slice(replacement);

        Ok(offset)
    }
}

impl<R: Read> FromReader<R> for LkImage {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let mut contents = Vec::new();
        reader
            .read_to_end(&mut contents)
            .map_err(|e| Error::DataRead("Lk::contents", e))?;

        Self::from_bytes(contents)
    }
}

impl<W: Write> ToWriter<W> for LkImage {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(&self.contents)
            .map_err(|e| Error::DataWrite("Lk::contents", e))
    }
}
