use crate::Error;
use memmap::{Mmap, MmapOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::TryInto;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

pub fn open_mmap_file(path: &Path) -> Result<Arc<Mmap>, Error> {
    let file = fs::File::open(path)?;
    let opts = MmapOptions::new();
    let mmap: Mmap = unsafe { opts.map(&file)? };
    Ok(Arc::new(mmap))
}

/// A cheaply-clonable, random-access byte region: either a shared memory map
/// or an owned buffer (RAM storage, and the unmapped-open fallback).
#[derive(Clone)]
pub enum ByteSource {
    Mapped(Arc<Mmap>),
    Owned(Arc<Vec<u8>>),
}

impl ByteSource {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ByteSource::Mapped(m) => &m[..],
            ByteSource::Owned(v) => &v[..],
        }
    }
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteSource::Mapped(m) => write!(f, "ByteSource::Mapped[{}]", m.len()),
            ByteSource::Owned(v) => write!(f, "ByteSource::Owned[{}]", v.len()),
        }
    }
}

fn short_read() -> Error {
    Error::Corrupt("read past end of stream".to_string())
}

/// Typed reader over a [ByteSource] window.
///
/// Sequential reads move an internal cursor; the `get_*` positional methods
/// read at an absolute offset within the window without touching it.
#[derive(Clone, Debug)]
pub struct StructReader {
    source: ByteSource,
    start: usize,
    end: usize,
    position: usize,
}

impl StructReader {
    pub fn new(source: ByteSource) -> StructReader {
        let end = source.len();
        StructReader {
            source,
            start: 0,
            end,
            position: 0,
        }
    }

    /// A fresh cursor over `start..end` of this window; shares the source.
    pub fn substream(&self, start: usize, end: usize) -> Result<StructReader, Error> {
        let sub_start = self.start + start;
        let sub_end = self.start + end;
        if sub_start > sub_end || sub_end > self.end {
            return Err(Error::Corrupt(format!(
                "substream {}..{} outside window of {}",
                start,
                end,
                self.len()
            )));
        }
        Ok(StructReader {
            source: self.source.clone(),
            start: sub_start,
            end: sub_end,
            position: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn tell(&self) -> usize {
        self.position
    }
    pub fn eof(&self) -> bool {
        self.position >= self.len()
    }
    pub fn seek(&mut self, position: usize) -> Result<(), Error> {
        if position > self.len() {
            return Err(short_read());
        }
        self.position = position;
        Ok(())
    }
    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.seek(self.position + n)
    }

    pub fn consume(&mut self, n: usize) -> Result<&[u8], Error> {
        let lhs = self.start + self.position;
        let rhs = lhs + n;
        if rhs > self.end {
            return Err(short_read());
        }
        self.position += n;
        Ok(&self.source.as_bytes()[lhs..rhs])
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.consume(1)?[0])
    }
    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let exact = self.consume(2)?;
        Ok(u16::from_le_bytes(exact.try_into().unwrap()))
    }
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let exact = self.consume(4)?;
        Ok(u32::from_le_bytes(exact.try_into().unwrap()))
    }
    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let exact = self.consume(4)?;
        Ok(i32::from_le_bytes(exact.try_into().unwrap()))
    }
    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let exact = self.consume(8)?;
        Ok(u64::from_le_bytes(exact.try_into().unwrap()))
    }
    pub fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }
    pub fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Vbyte: 7-bit groups low-first; a set high bit marks the last byte.
    pub fn read_vbyte(&mut self) -> Result<u64, Error> {
        let mut result: u64 = 0;
        let mut bit_p: u32 = 0;
        while !self.eof() {
            let byte = self.read_u8()? as u64;
            if byte & 0x80 > 0 {
                result |= (byte & 0x7f) << bit_p;
                return Ok(result);
            }
            result |= byte << bit_p;
            bit_p += 7;
        }
        Err(short_read())
    }

    /// Length-prefixed byte string.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.read_vbyte()? as usize;
        Ok(self.consume(length)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, Error> {
        let length = self.read_vbyte()? as usize;
        let raw = self.consume(length)?;
        Ok(std::str::from_utf8(raw)?.to_string())
    }

    /// Length-prefixed object slot, decoded from its JSON snapshot.
    pub fn read_json<D: DeserializeOwned>(&mut self) -> Result<D, Error> {
        let length = self.read_vbyte()? as usize;
        let raw = self.consume(length)?;
        Ok(serde_json::from_slice(raw)?)
    }

    fn get_exact(&self, offset: usize, n: usize) -> Result<&[u8], Error> {
        let lhs = self.start + offset;
        let rhs = lhs + n;
        if rhs > self.end {
            return Err(short_read());
        }
        Ok(&self.source.as_bytes()[lhs..rhs])
    }

    pub fn get_u16(&self, offset: usize) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.get_exact(offset, 2)?.try_into().unwrap()))
    }
    pub fn get_u32(&self, offset: usize) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.get_exact(offset, 4)?.try_into().unwrap()))
    }
    pub fn get_u64(&self, offset: usize) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.get_exact(offset, 8)?.try_into().unwrap()))
    }
    pub fn get_f32(&self, offset: usize) -> Result<f32, Error> {
        Ok(f32::from_bits(self.get_u32(offset)?))
    }
    pub fn get_slice(&self, start: usize, end: usize) -> Result<&[u8], Error> {
        if end < start {
            return Err(short_read());
        }
        self.get_exact(start, end - start)
    }
}

/// Typed appender over any [io::Write]; counts bytes so callers can record
/// offsets as they go.
pub struct StructWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> StructWriter<W> {
    pub fn new(inner: W) -> StructWriter<W> {
        StructWriter { inner, written: 0 }
    }

    pub fn tell(&self) -> u64 {
        self.written
    }

    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        self.inner.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), Error> {
        self.write_raw(&[v])
    }
    pub fn write_u16(&mut self, v: u16) -> Result<(), Error> {
        self.write_raw(&v.to_le_bytes())
    }
    pub fn write_u32(&mut self, v: u32) -> Result<(), Error> {
        self.write_raw(&v.to_le_bytes())
    }
    pub fn write_i32(&mut self, v: i32) -> Result<(), Error> {
        self.write_raw(&v.to_le_bytes())
    }
    pub fn write_u64(&mut self, v: u64) -> Result<(), Error> {
        self.write_raw(&v.to_le_bytes())
    }
    pub fn write_f32(&mut self, v: f32) -> Result<(), Error> {
        self.write_u32(v.to_bits())
    }
    pub fn write_f64(&mut self, v: f64) -> Result<(), Error> {
        self.write_u64(v.to_bits())
    }

    pub fn write_vbyte(&mut self, v: u64) -> Result<usize, Error> {
        let mut buf = [0u8; 10];
        let mut v = v;
        let mut n = 0;
        loop {
            if v < 0x80 {
                buf[n] = (v as u8) | 0x80;
                n += 1;
                break;
            }
            buf[n] = (v & 0x7f) as u8;
            v >>= 7;
            n += 1;
        }
        self.write_raw(&buf[..n])?;
        Ok(n)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        self.write_vbyte(data.len() as u64)?;
        self.write_raw(data)
    }

    pub fn write_string(&mut self, text: &str) -> Result<(), Error> {
        self.write_bytes(text.as_bytes())
    }

    /// Length-prefixed object slot: a JSON snapshot of any serde value.
    pub fn write_json<S: Serialize>(&mut self, value: &S) -> Result<(), Error> {
        let blob = serde_json::to_vec(value)?;
        self.write_bytes(&blob)
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}
