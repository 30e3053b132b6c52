//! Record reader for the BIFF8 workbook stream inside `.xls` files.
//!
//! A record is a 2-byte type, a 2-byte length and its data. Records longer
//! than the format allows continue in following CONTINUE records; the reader
//! presents a record and its continuations as one sequence of chunks.

use crate::error::RustyTableError;
use crate::helpers::bytes::le_u16;
use crate::helpers::bytes::le_u32;
use crate::helpers::bytes::le_u64;
use encoding_rs::Encoding;
use encoding_rs::UTF_16LE;
use encoding_rs::WINDOWS_1252;
use thiserror::Error;

pub(crate) const CONTINUE: u16 = 0x003C;

/// Errors raised while decoding BIFF8 records
#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in the record")]
    NotEnoughData(usize),
}

pub(crate) struct Biff8Reader {
    /// Encoding of strings stored with one byte per character
    pub(crate) compressed_encoding: &'static Encoding,
    buffer: Vec<u8>,
    /// Position of the next record header
    pointer: usize,
    /// Data ranges of the current record and its continuations
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(buffer: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            compressed_encoding: WINDOWS_1252,
            buffer,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Advances to the next record and returns its type, or `None` at the end of the stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, RustyTableError> {
        let Some((kind, chunk)) = self.header_at(self.pointer) else {
            return Ok(None);
        };
        self.chunks.clear();
        self.index = 0;
        self.offset = 0;
        self.chunks.push(chunk);
        self.pointer = chunk.1;
        while let Some((CONTINUE, chunk)) = self.header_at(self.pointer) {
            self.chunks.push(chunk);
            self.pointer = chunk.1;
        }
        Ok(Some(kind))
    }

    /// Moves to the record header at `pointer` (a stream offset).
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    fn header_at(&self, position: usize) -> Option<(u16, (usize, usize))> {
        let header = self.buffer.get(position..position.checked_add(4)?)?;
        let lower = position + 4;
        let upper = self.buffer.len().min(lower + le_u16(&header[2..]) as usize);
        Some((le_u16(header), (lower, upper)))
    }

    /// Reads up to `length` bytes without crossing into the next chunk.
    fn read(&mut self, length: usize) -> &[u8] {
        while let Some(&(lower, upper)) = self.chunks.get(self.index) {
            let source = lower + self.offset;
            if source >= upper {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let target = upper.min(source + length);
            self.offset += target - source;
            return &self.buffer[source..target];
        }
        &[]
    }

    fn read_exact(&mut self, length: usize) -> Result<&[u8], RustyTableError> {
        let bytes = self.read(length);
        if bytes.len() == length {
            Ok(bytes)
        } else {
            Err(Biff8Error::NotEnoughData(length))?
        }
    }

    fn at_chunk_end(&self) -> bool {
        self.chunks
            .get(self.index)
            .map_or(true, |&(lower, upper)| lower + self.offset >= upper)
    }

    pub(crate) fn skip(&mut self, mut length: usize) -> Result<(), RustyTableError> {
        while length > 0 {
            let skipped = self.read(length).len();
            if skipped == 0 {
                Err(Biff8Error::NotEnoughData(length))?
            }
            length -= skipped;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, RustyTableError> {
        self.read_exact(1).map(|bytes| bytes[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, RustyTableError> {
        self.read_exact(2).map(le_u16)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, RustyTableError> {
        self.read_exact(4).map(le_u32)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, RustyTableError> {
        self.read_exact(8).map(le_u64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, RustyTableError> {
        self.read_u64().map(f64::from_bits)
    }

    /// The trailing 2 bytes of the current record.
    pub(crate) fn last_u16(&self) -> Result<u16, RustyTableError> {
        match self.chunks.last() {
            Some(&(lower, upper)) if upper >= lower + 2 => Ok(le_u16(&self.buffer[upper - 2..upper])),
            _ => Err(Biff8Error::NotEnoughData(2))?,
        }
    }

    /// Decodes an RK value: a 30-bit integer or the high bits of a double,
    /// optionally scaled by 1/100.
    pub(crate) fn read_rk_number(&mut self) -> Result<f64, RustyTableError> {
        let rk = self.read_u32()?;
        let value = if rk & 0x02 != 0 {
            ((rk as i32) >> 2) as f64
        } else {
            f64::from_bits(u64::from(rk & 0xFFFF_FFFC) << 32)
        };
        Ok(if rk & 0x01 != 0 { value / 100.0 } else { value })
    }

    /// String with a 1-byte character count (sheet names).
    pub(crate) fn read_short_string(&mut self) -> Result<String, RustyTableError> {
        let chars = self.read_u8()? as usize;
        let flags = self.read_u8()?;
        let mut text = String::new();
        self.read_characters(chars, flags, &mut text)?;
        Ok(text)
    }

    /// String with a 2-byte character count.
    pub(crate) fn read_string(&mut self) -> Result<String, RustyTableError> {
        let chars = self.read_u16()? as usize;
        let flags = self.read_u8()?;
        let mut text = String::new();
        self.read_characters(chars, flags, &mut text)?;
        Ok(text)
    }

    /// Shared string table entry; formatting runs and phonetic data are skipped.
    pub(crate) fn read_rich_string(&mut self) -> Result<String, RustyTableError> {
        let chars = self.read_u16()? as usize;
        let flags = self.read_u8()?;
        let runs = if flags & 0x08 != 0 { self.read_u16()? as usize } else { 0 };
        let phonetic = if flags & 0x04 != 0 { self.read_u32()? as usize } else { 0 };
        let mut text = String::new();
        self.read_characters(chars, flags, &mut text)?;
        self.skip(4 * runs)?;
        self.skip(phonetic)?;
        Ok(text)
    }

    /// Reads `chars` characters. Text split across a CONTINUE record restarts
    /// with a fresh flags byte, so the width may change midway.
    fn read_characters(&mut self, mut chars: usize, mut flags: u8, text: &mut String) -> Result<(), RustyTableError> {
        let compressed = self.compressed_encoding;
        while chars > 0 {
            if self.at_chunk_end() {
                flags = self.read_u8()?;
            }
            let (width, encoding) = if flags & 0x01 != 0 { (2, UTF_16LE) } else { (1, compressed) };
            let bytes = self.read(chars * width);
            let count = bytes.len() / width;
            text.push_str(&encoding.decode_without_bom_handling(&bytes[..count * width]).0);
            chars -= count;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes one record.
    pub(crate) fn record(kind: u16, data: &[u8]) -> Vec<u8> {
        let mut bytes = kind.to_le_bytes().to_vec();
        bytes.extend((data.len() as u16).to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    /// String with a 2-byte count, one byte per character.
    pub(crate) fn string(text: &str) -> Vec<u8> {
        let mut bytes = (text.len() as u16).to_le_bytes().to_vec();
        bytes.push(0);
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    /// String with a 2-byte count, two bytes per character.
    pub(crate) fn wide_string(text: &str) -> Vec<u8> {
        let mut bytes = (text.encode_utf16().count() as u16).to_le_bytes().to_vec();
        bytes.push(1);
        bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        bytes
    }

    #[test]
    fn walks_records_with_continuations() {
        let mut stream = record(0x0809, &[0; 4]);
        stream.extend(record(0x00FC, b"ab"));
        stream.extend(record(CONTINUE, b"cd"));
        stream.extend(record(0x000A, &[]));
        let mut reader = Biff8Reader::new(stream);

        assert_eq!(reader.next().unwrap(), Some(0x0809));
        assert_eq!(reader.next().unwrap(), Some(0x00FC));
        assert_eq!(reader.read_u8().unwrap(), b'a');
        reader.skip(2).unwrap();
        assert_eq!(reader.read_u8().unwrap(), b'd');
        assert!(reader.read_u8().is_err());
        assert_eq!(reader.next().unwrap(), Some(0x000A));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn decodes_strings_split_across_records() {
        // "Joined" breaks after "Joi"; the continuation repeats the flags byte
        let mut first = vec![6, 0, 0];
        first.extend_from_slice(b"Joi");
        let mut stream = record(0x00FC, &first);
        let mut second = vec![0];
        second.extend_from_slice(b"ned");
        second.extend(wide_string("Zoë"));
        stream.extend(record(CONTINUE, &second));
        let mut reader = Biff8Reader::new(stream);

        reader.next().unwrap();
        assert_eq!(reader.read_rich_string().unwrap(), "Joined");
        assert_eq!(reader.read_rich_string().unwrap(), "Zoë");
    }

    #[test]
    fn skips_formatting_runs() {
        let mut data = vec![2, 0, 0x08, 1, 0];
        data.extend_from_slice(b"Hi");
        data.extend_from_slice(&[0; 4]);
        data.extend(string("next"));
        let mut reader = Biff8Reader::new(record(0x00FC, &data));

        reader.next().unwrap();
        assert_eq!(reader.read_rich_string().unwrap(), "Hi");
        assert_eq!(reader.read_string().unwrap(), "next");
    }

    #[test]
    fn rk_numbers() {
        let rk = |bits: u32| {
            let mut reader = Biff8Reader::new(record(0x027E, &bits.to_le_bytes()));
            reader.next().unwrap();
            reader.read_rk_number().unwrap()
        };
        assert_eq!(rk((7 << 2) | 0x02), 7.0);
        assert_eq!(rk((150 << 2) | 0x03), 1.5);
        assert_eq!(rk(((-3i32 << 2) | 0x02) as u32), -3.0);
        assert_eq!(rk((2.5f64.to_bits() >> 32) as u32), 2.5);
    }
}
