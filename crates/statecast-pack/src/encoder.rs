//! MessagePack encoder.

use crate::{PackValue, Writer};

#[derive(Debug, Default)]
pub struct MsgPackEncoder {
    pub writer: Writer,
}

impl MsgPackEncoder {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(),
        }
    }

    pub fn encode(&mut self, value: &PackValue) -> Vec<u8> {
        self.writer.reset();
        self.write_any(value);
        self.writer.flush()
    }

    pub fn write_any(&mut self, value: &PackValue) {
        match value {
            PackValue::Null => self.write_null(),
            PackValue::Undefined => self.write_undefined(),
            PackValue::Bool(b) => self.write_boolean(*b),
            PackValue::Integer(i) => self.write_integer(*i),
            PackValue::UInteger(u) => self.write_u_integer(*u),
            PackValue::Float(f) => self.write_float(*f),
            PackValue::Bytes(b) => self.write_bin(b),
            PackValue::Str(s) => self.write_str(s),
            PackValue::Array(arr) => self.write_arr(arr),
            PackValue::Object(pairs) => self.write_obj_pairs(pairs),
            PackValue::Extension(tag, data) => self.write_ext(*tag, data),
        }
    }

    pub fn write_null(&mut self) {
        self.writer.u8(0xc0);
    }

    pub fn write_undefined(&mut self) {
        self.writer.u8(0xc1);
    }

    pub fn write_boolean(&mut self, b: bool) {
        self.writer.u8(if b { 0xc3 } else { 0xc2 });
    }

    pub fn write_float(&mut self, float: f64) {
        self.writer.u8f64(0xcb, float);
    }

    pub fn write_integer(&mut self, int: i64) {
        if int >= 0 {
            self.write_u_integer(int as u64);
        } else if int >= -0x20 {
            // negative fixint: 0xe0..0xff
            self.writer.u8(int as i8 as u8);
        } else if int >= i8::MIN as i64 {
            self.writer.u8(0xd0);
            self.writer.u8(int as i8 as u8);
        } else if int >= i16::MIN as i64 {
            self.writer.u8u16(0xd1, int as i16 as u16);
        } else if int >= i32::MIN as i64 {
            self.writer.u8u32(0xd2, int as i32 as u32);
        } else {
            self.writer.u8u64(0xd3, int as u64);
        }
    }

    pub fn write_u_integer(&mut self, uint: u64) {
        if uint <= 0x7f {
            self.writer.u8(uint as u8);
        } else if uint <= 0xff {
            self.writer.u8(0xcc);
            self.writer.u8(uint as u8);
        } else if uint <= 0xffff {
            self.writer.u8u16(0xcd, uint as u16);
        } else if uint <= 0xffff_ffff {
            self.writer.u8u32(0xce, uint as u32);
        } else {
            self.writer.u8u64(0xcf, uint);
        }
    }

    pub fn write_str_hdr(&mut self, length: usize) {
        if length <= 0x1f {
            self.writer.u8(0xa0 | length as u8);
        } else if length <= 0xff {
            self.writer.u16(0xd900 | length as u16);
        } else if length <= 0xffff {
            self.writer.u8u16(0xda, length as u16);
        } else {
            self.writer.u8u32(0xdb, length as u32);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_str_hdr(s.len());
        self.writer.utf8(s);
    }

    pub fn write_arr_hdr(&mut self, length: usize) {
        if length <= 0xf {
            self.writer.u8(0x90 | length as u8);
        } else if length <= 0xffff {
            self.writer.u8u16(0xdc, length as u16);
        } else {
            self.writer.u8u32(0xdd, length as u32);
        }
    }

    pub fn write_arr(&mut self, arr: &[PackValue]) {
        self.write_arr_hdr(arr.len());
        for item in arr {
            self.write_any(item);
        }
    }

    pub fn write_obj_hdr(&mut self, length: usize) {
        if length <= 0xf {
            self.writer.u8(0x80 | length as u8);
        } else if length <= 0xffff {
            self.writer.u8u16(0xde, length as u16);
        } else {
            self.writer.u8u32(0xdf, length as u32);
        }
    }

    pub fn write_obj_pairs(&mut self, pairs: &[(String, PackValue)]) {
        self.write_obj_hdr(pairs.len());
        for (key, val) in pairs {
            self.write_str(key);
            self.write_any(val);
        }
    }

    pub fn write_bin_hdr(&mut self, length: usize) {
        if length <= 0xff {
            self.writer.u16(0xc400 | length as u16);
        } else if length <= 0xffff {
            self.writer.u8u16(0xc5, length as u16);
        } else {
            self.writer.u8u32(0xc6, length as u32);
        }
    }

    pub fn write_bin(&mut self, buf: &[u8]) {
        self.write_bin_hdr(buf.len());
        self.writer.buf(buf);
    }

    pub fn write_ext_hdr(&mut self, tag: i8, length: usize) {
        let tag = tag as u8;
        match length {
            1 => self.writer.u16(0xd400 | tag as u16),
            2 => self.writer.u16(0xd500 | tag as u16),
            4 => self.writer.u16(0xd600 | tag as u16),
            8 => self.writer.u16(0xd700 | tag as u16),
            16 => self.writer.u16(0xd800 | tag as u16),
            _ => {
                if length <= 0xff {
                    self.writer.u16(0xc700 | length as u16);
                } else if length <= 0xffff {
                    self.writer.u8u16(0xc8, length as u16);
                } else {
                    self.writer.u8u32(0xc9, length as u32);
                }
                self.writer.u8(tag);
            }
        }
    }

    pub fn write_ext(&mut self, tag: i8, data: &[u8]) {
        self.write_ext_hdr(tag, data.len());
        self.writer.buf(data);
    }
}

#[cfg(test)]
mod tests {
    use super::MsgPackEncoder;
    use crate::PackValue;

    #[test]
    fn integers_pick_the_smallest_marker() {
        let mut encoder = MsgPackEncoder::new();
        let cases: Vec<(i64, Vec<u8>)> = vec![
            (0, vec![0x00]),
            (127, vec![0x7f]),
            (128, vec![0xcc, 0x80]),
            (256, vec![0xcd, 0x01, 0x00]),
            (-1, vec![0xff]),
            (-32, vec![0xe0]),
            (-33, vec![0xd0, 0xdf]),
            (-129, vec![0xd1, 0xff, 0x7f]),
            (70_000, vec![0xce, 0x00, 0x01, 0x11, 0x70]),
        ];
        for (int, bytes) in cases {
            assert_eq!(encoder.encode(&PackValue::Integer(int)), bytes, "int {int}");
        }
    }

    #[test]
    fn ext_uses_fixext_for_power_of_two_lengths() {
        let mut encoder = MsgPackEncoder::new();
        assert_eq!(
            encoder.encode(&PackValue::Extension(1, vec![9])),
            vec![0xd4, 0x01, 0x09]
        );
        assert_eq!(
            encoder.encode(&PackValue::Extension(1, vec![1, 2, 3])),
            vec![0xc7, 0x03, 0x01, 1, 2, 3]
        );
    }
}
