//! Binary I/O helpers shared by index persistence.
//!
//! Everything is little-endian. [`ChecksumWriter`] and [`ChecksumReader`]
//! compute a running CRC32 over every byte that passes through them so the
//! trailer can be written and verified without buffering the whole file.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, VicinityError};

/// A writer that hashes everything written through it.
pub struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Append the CRC32 of everything written so far (not itself hashed) and
    /// return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.hasher.clone().finalize();
        self.inner.write_u32::<LittleEndian>(checksum)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A reader that hashes everything read through it.
pub struct ChecksumReader<R: Read> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Read the CRC32 trailer and compare it against the bytes consumed so far.
    pub fn verify(mut self) -> Result<()> {
        let expected = self.hasher.clone().finalize();
        let stored = self.inner.read_u32::<LittleEndian>().map_err(truncated)?;
        if stored != expected {
            return Err(VicinityError::corrupt(format!(
                "Checksum mismatch: stored {stored:#010x}, computed {expected:#010x}"
            )));
        }
        Ok(())
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

/// Map an unexpected EOF to a corrupt-index error; other I/O errors pass through.
pub fn truncated(err: io::Error) -> VicinityError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        VicinityError::corrupt("Index file is truncated")
    } else {
        VicinityError::Io(err)
    }
}

pub fn write_f32_slice<W: Write>(output: &mut W, values: &[f32]) -> Result<()> {
    for &value in values {
        output.write_f32::<LittleEndian>(value)?;
    }
    Ok(())
}

/// Read exactly `len` floats.
pub fn read_f32_vec<R: Read>(input: &mut R, len: usize) -> Result<Vec<f32>> {
    let mut values = vec![0.0f32; len];
    input
        .read_f32_into::<LittleEndian>(&mut values)
        .map_err(truncated)?;
    Ok(values)
}

/// Write a u32 count followed by the ids.
pub fn write_id_list<W: Write>(output: &mut W, ids: &[u32]) -> Result<()> {
    output.write_u32::<LittleEndian>(ids.len() as u32)?;
    for &id in ids {
        output.write_u32::<LittleEndian>(id)?;
    }
    Ok(())
}

/// Read a list written by [`write_id_list`], rejecting lists longer than
/// `max_len` before allocating.
pub fn read_id_list<R: Read>(input: &mut R, max_len: usize) -> Result<Vec<u32>> {
    let len = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    if len > max_len {
        return Err(VicinityError::corrupt(format!(
            "Neighbor list of length {len} exceeds limit {max_len}"
        )));
    }
    let mut ids = vec![0u32; len];
    input
        .read_u32_into::<LittleEndian>(&mut ids)
        .map_err(truncated)?;
    Ok(ids)
}
