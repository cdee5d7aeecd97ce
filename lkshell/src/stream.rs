// SPDX-FileCopyrightText: 2026 lkshell contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Write};

/// Common function for reading a structure from a reader.
pub trait FromReader<R: Read>: Sized {
    type Error;

    fn from_reader(reader: R) -> Result<Self, Self::Error>;
}

/// Common function for writing a structure to a writer.
pub trait ToWriter<W: Write>: Sized {
    type Error;

    fn to_writer(&self, writer: W) -> Result<(), Self::Error>;
}

/// Extensions for readers to read and discard data (eg. for padding).
pub trait ReadDiscardExt {
    fn read_discard(&mut self, size: u64) -> io::Result<u64>;

    fn read_discard_exact(&mut self, size: u64) -> io::Result<()> {
        let n = self.read_discard(size)?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected to read {size} bytes, but reached EOF after {n} bytes"),
            ));
        }
        Ok(())
    }
}

impl<R: Read> ReadDiscardExt for R {
    fn read_discard(&mut self, size: u64) -> io::Result<u64> {
        io::copy(&mut self.take(size), &mut io::sink())
    }
}

/// Extensions for writers to write a repeated filler byte (eg. for reserved
/// header space, which MediaTek tools fill with `0xff`).
pub trait WriteFillExt {
    fn write_fill(&mut self, byte: u8, size: u64) -> io::Result<()>;
}

impl<W: Write> WriteFillExt for W {
    fn write_fill(&mut self, byte: u8, size: u64) -> io::Result<()> {
        let n = io::copy(&mut io::repeat(byte).take(size), self)?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("Expected to write {size} bytes, but only wrote {n} bytes"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn fill_writes_exact_count() {
        let mut buf = Vec::new();
        buf.write_fill(0xff, 5).unwrap();
        assert_eq!(buf, [0xff; 5]);
    }

    #[test]
    fn discard_past_eof() {
        let mut reader = Cursor::new([0u8; 4]);
        assert_eq!(reader.read_discard(8).unwrap(), 4);

        let mut reader = Cursor::new([0u8; 4]);
        let err = reader.read_discard_exact(8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
