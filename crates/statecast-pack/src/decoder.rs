//! MessagePack decoder over a borrowed byte slice.

use crate::{PackError, PackValue};

/// Deepest array/map nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

pub struct MsgPackDecoder<'a> {
    pub data: &'a [u8],
    pub x: usize,
    depth: usize,
}

impl<'a> MsgPackDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, x: 0, depth: 0 }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.x
    }

    /// Fails when input is left over after the values read so far.
    pub fn finish(&self) -> Result<(), PackError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(PackError::TrailingBytes(n)),
        }
    }

    #[inline]
    fn take(&mut self, n: usize) -> Result<&'a [u8], PackError> {
        if self.x + n > self.data.len() {
            return Err(PackError::UnexpectedEof);
        }
        let slice = &self.data[self.x..self.x + n];
        self.x += n;
        Ok(slice)
    }

    #[inline]
    fn u8(&mut self) -> Result<u8, PackError> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    fn u16(&mut self) -> Result<u16, PackError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    #[inline]
    fn u32(&mut self) -> Result<u32, PackError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    fn u64(&mut self) -> Result<u64, PackError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_be_bytes(bytes))
    }

    #[inline]
    fn utf8(&mut self, size: usize) -> Result<String, PackError> {
        let slice = self.take(size)?;
        std::str::from_utf8(slice)
            .map(str::to_owned)
            .map_err(|_| PackError::InvalidUtf8)
    }

    pub fn read_any(&mut self) -> Result<PackValue, PackError> {
        let byte = self.u8()?;

        // negative fixint: 0xe0..0xff
        if byte >= 0xe0 {
            return Ok(PackValue::Integer(byte as i8 as i64));
        }
        // positive fixint
        if byte <= 0x7f {
            return Ok(PackValue::Integer(byte as i64));
        }
        match byte {
            0x80..=0x8f => self.read_obj(byte as usize & 0xf),
            0x90..=0x9f => self.read_arr(byte as usize & 0xf),
            0xa0..=0xbf => self.utf8(byte as usize & 0x1f).map(PackValue::Str),
            0xc0 => Ok(PackValue::Null),
            0xc1 => Ok(PackValue::Undefined),
            0xc2 => Ok(PackValue::Bool(false)),
            0xc3 => Ok(PackValue::Bool(true)),
            0xc4 => {
                let n = self.u8()? as usize;
                Ok(PackValue::Bytes(self.take(n)?.to_vec()))
            }
            0xc5 => {
                let n = self.u16()? as usize;
                Ok(PackValue::Bytes(self.take(n)?.to_vec()))
            }
            0xc6 => {
                let n = self.u32()? as usize;
                Ok(PackValue::Bytes(self.take(n)?.to_vec()))
            }
            0xc7 => {
                let n = self.u8()? as usize;
                self.read_ext(n)
            }
            0xc8 => {
                let n = self.u16()? as usize;
                self.read_ext(n)
            }
            0xc9 => {
                let n = self.u32()? as usize;
                self.read_ext(n)
            }
            0xca => Ok(PackValue::Float(f32::from_bits(self.u32()?) as f64)),
            0xcb => Ok(PackValue::Float(f64::from_bits(self.u64()?))),
            0xcc => Ok(PackValue::Integer(self.u8()? as i64)),
            0xcd => Ok(PackValue::Integer(self.u16()? as i64)),
            0xce => Ok(PackValue::Integer(self.u32()? as i64)),
            0xcf => {
                let uint = self.u64()?;
                Ok(match i64::try_from(uint) {
                    Ok(int) => PackValue::Integer(int),
                    Err(_) => PackValue::UInteger(uint),
                })
            }
            0xd0 => Ok(PackValue::Integer(self.u8()? as i8 as i64)),
            0xd1 => Ok(PackValue::Integer(self.u16()? as i16 as i64)),
            0xd2 => Ok(PackValue::Integer(self.u32()? as i32 as i64)),
            0xd3 => Ok(PackValue::Integer(self.u64()? as i64)),
            0xd4 => self.read_ext(1),
            0xd5 => self.read_ext(2),
            0xd6 => self.read_ext(4),
            0xd7 => self.read_ext(8),
            0xd8 => self.read_ext(16),
            0xd9 => {
                let n = self.u8()? as usize;
                self.utf8(n).map(PackValue::Str)
            }
            0xda => {
                let n = self.u16()? as usize;
                self.utf8(n).map(PackValue::Str)
            }
            0xdb => {
                let n = self.u32()? as usize;
                self.utf8(n).map(PackValue::Str)
            }
            0xdc => {
                let n = self.u16()? as usize;
                self.read_arr(n)
            }
            0xdd => {
                let n = self.u32()? as usize;
                self.read_arr(n)
            }
            0xde => {
                let n = self.u16()? as usize;
                self.read_obj(n)
            }
            0xdf => {
                let n = self.u32()? as usize;
                self.read_obj(n)
            }
            _ => Err(PackError::InvalidByte(self.x - 1)),
        }
    }

    fn nested<F>(&mut self, read: F) -> Result<PackValue, PackError>
    where
        F: FnOnce(&mut Self) -> Result<PackValue, PackError>,
    {
        if self.depth == MAX_DEPTH {
            return Err(PackError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = read(&mut *self);
        self.depth -= 1;
        value
    }

    fn read_obj(&mut self, size: usize) -> Result<PackValue, PackError> {
        self.nested(|d| d.obj_pairs(size))
    }

    fn read_arr(&mut self, size: usize) -> Result<PackValue, PackError> {
        self.nested(|d| d.arr_items(size))
    }

    fn obj_pairs(&mut self, size: usize) -> Result<PackValue, PackError> {
        let mut pairs = Vec::with_capacity(size.min(self.remaining()));
        for _ in 0..size {
            let key = match self.read_any()? {
                PackValue::Str(key) => key,
                _ => return Err(PackError::NotStr),
            };
            pairs.push((key, self.read_any()?));
        }
        Ok(PackValue::Object(pairs))
    }

    fn arr_items(&mut self, size: usize) -> Result<PackValue, PackError> {
        let mut arr = Vec::with_capacity(size.min(self.remaining()));
        for _ in 0..size {
            arr.push(self.read_any()?);
        }
        Ok(PackValue::Array(arr))
    }

    fn read_ext(&mut self, size: usize) -> Result<PackValue, PackError> {
        let tag = self.u8()? as i8;
        let data = self.take(size)?.to_vec();
        Ok(PackValue::Extension(tag, data))
    }
}
