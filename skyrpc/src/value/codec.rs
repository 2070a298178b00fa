/*
 * Created on Fri Mar 01 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The three transcoders for the value system. Which one runs is decided by
//! the packet's endian flag against the host: matching endianness uses the
//! bulk `Copy` path, otherwise fields are converted one by one.
//!
//! Encoding emits the value count, the type string, then each value by tag.
//! Arrays emit a length followed by element storage; strings and blobs emit a
//! length followed by raw bytes. Decoding checks the remaining length before
//! every read and fails the entire decode on any under-run; a successful
//! decode that leaves residual bytes in the declared region is also a failure.
//! On failure the remaining bytes of the declared region are consumed so the
//! stream stays framed.

use {
    super::{
        Value, Values, TAG_DATA, TAG_DATA_ARR, TAG_F32, TAG_F32_ARR, TAG_F64, TAG_F64_ARR,
        TAG_STR, TAG_STR_ARR, TAG_U16, TAG_U16_ARR, TAG_U32, TAG_U32_ARR, TAG_U64, TAG_U64_ARR,
        TAG_U8, TAG_U8_ARR,
    },
    crate::mem::Scanner,
    bytes::{BufMut, BytesMut},
};

const SIZE_U32: usize = core::mem::size_of::<u32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Byte order selector for one encode or decode run
pub enum Wire {
    /// the packet's byte order matches the host: bulk copies in native order
    Copy,
    /// field-wise network byte order
    Big,
    /// field-wise little-endian
    Little,
}

/*
    field primitives
*/

fn wr_u16(wire: Wire, dst: &mut BytesMut, v: u16) {
    match wire {
        Wire::Copy => dst.put_u16_ne(v),
        Wire::Big => dst.put_u16(v),
        Wire::Little => dst.put_u16_le(v),
    }
}

pub(crate) fn wr_u32(wire: Wire, dst: &mut BytesMut, v: u32) {
    match wire {
        Wire::Copy => dst.put_u32_ne(v),
        Wire::Big => dst.put_u32(v),
        Wire::Little => dst.put_u32_le(v),
    }
}

fn wr_u64(wire: Wire, dst: &mut BytesMut, v: u64) {
    match wire {
        Wire::Copy => dst.put_u64_ne(v),
        Wire::Big => dst.put_u64(v),
        Wire::Little => dst.put_u64_le(v),
    }
}

fn rd_u16(wire: Wire, src: &mut Scanner) -> Option<u16> {
    let c = src.try_next_chunk::<2>()?;
    Some(match wire {
        Wire::Copy => u16::from_ne_bytes(c),
        Wire::Big => u16::from_be_bytes(c),
        Wire::Little => u16::from_le_bytes(c),
    })
}

pub(crate) fn rd_u32(wire: Wire, src: &mut Scanner) -> Option<u32> {
    let c = src.try_next_chunk::<4>()?;
    Some(match wire {
        Wire::Copy => u32::from_ne_bytes(c),
        Wire::Big => u32::from_be_bytes(c),
        Wire::Little => u32::from_le_bytes(c),
    })
}

fn rd_u64(wire: Wire, src: &mut Scanner) -> Option<u64> {
    let c = src.try_next_chunk::<8>()?;
    Some(match wire {
        Wire::Copy => u64::from_ne_bytes(c),
        Wire::Big => u64::from_be_bytes(c),
        Wire::Little => u64::from_le_bytes(c),
    })
}

/// Read one length-prefixed UTF-8 string
fn rd_str<'a>(wire: Wire, src: &mut Scanner<'a>) -> Option<&'a str> {
    let len = rd_u32(wire, src)? as usize;
    let block = src.try_next_block(len)?;
    core::str::from_utf8(block).ok()
}

/// Reinterpret a plain-old-data slice as its raw bytes (native order)
fn pod_bytes<T: Copy>(s: &[T]) -> &[u8] {
    unsafe {
        // UNSAFE(@ohsayan): POD element types only; size_of_val covers the exact span
        core::slice::from_raw_parts(s.as_ptr().cast(), core::mem::size_of_val(s))
    }
}

macro_rules! wr_num_array {
    ($wire:expr, $dst:expr, $arr:expr, $wr:ident) => {{
        wr_u32($wire, $dst, $arr.len() as u32);
        match $wire {
            Wire::Copy => $dst.put_slice(pod_bytes($arr)),
            _ => {
                for &v in $arr.iter() {
                    $wr($wire, $dst, v);
                }
            }
        }
    }};
}

macro_rules! rd_num_array {
    ($wire:expr, $src:expr, $size:literal, $rd:ident) => {{
        let len = rd_u32($wire, $src)? as usize;
        if !$src.has_left(len.checked_mul($size)?) {
            return None;
        }
        let mut arr = Vec::with_capacity(len);
        for _ in 0..len {
            arr.push($rd($wire, $src)?);
        }
        arr
    }};
}

fn encode_value(wire: Wire, dst: &mut BytesMut, v: &Value) {
    match v {
        Value::U8(v) => dst.put_u8(*v),
        Value::U8Array(a) => {
            wr_u32(wire, dst, a.len() as u32);
            dst.put_slice(a);
        }
        Value::U16(v) => wr_u16(wire, dst, *v),
        Value::U16Array(a) => wr_num_array!(wire, dst, a, wr_u16),
        Value::U32(v) => wr_u32(wire, dst, *v),
        Value::U32Array(a) => wr_num_array!(wire, dst, a, wr_u32),
        Value::U64(v) => wr_u64(wire, dst, *v),
        Value::U64Array(a) => wr_num_array!(wire, dst, a, wr_u64),
        // floats travel as their integer bit patterns
        Value::F32(v) => wr_u32(wire, dst, v.to_bits()),
        Value::F32Array(a) => {
            wr_u32(wire, dst, a.len() as u32);
            match wire {
                Wire::Copy => dst.put_slice(pod_bytes(a)),
                _ => {
                    for v in a.iter() {
                        wr_u32(wire, dst, v.to_bits());
                    }
                }
            }
        }
        Value::F64(v) => wr_u64(wire, dst, v.to_bits()),
        Value::F64Array(a) => {
            wr_u32(wire, dst, a.len() as u32);
            match wire {
                Wire::Copy => dst.put_slice(pod_bytes(a)),
                _ => {
                    for v in a.iter() {
                        wr_u64(wire, dst, v.to_bits());
                    }
                }
            }
        }
        Value::Str(s) => {
            wr_u32(wire, dst, s.len() as u32);
            dst.put_slice(s.as_bytes());
        }
        Value::StrArray(a) => {
            wr_u32(wire, dst, a.len() as u32);
            for s in a.iter() {
                wr_u32(wire, dst, s.len() as u32);
                dst.put_slice(s.as_bytes());
            }
        }
        Value::Data(d) => {
            wr_u32(wire, dst, d.len() as u32);
            dst.put_slice(d.bytes());
        }
        Value::DataArray(a) => {
            wr_u32(wire, dst, a.len() as u32);
            for d in a.iter() {
                wr_u32(wire, dst, d.len() as u32);
                dst.put_slice(d.bytes());
            }
        }
    }
}

impl Values {
    /// Encode the container into `dst` using the given transcoder
    pub fn encode(&self, wire: Wire, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        wr_u32(wire, dst, self.len() as u32);
        dst.put_slice(self.type_string());
        for v in &self.values {
            encode_value(wire, dst, v);
        }
    }
    /// Decode `len` bytes from `src`, appending the decoded values to the
    /// container. Returns false on any under-run, unknown tag, malformed
    /// string or residual bytes; the declared region is consumed either way
    pub fn decode(&mut self, wire: Wire, src: &mut Scanner, len: usize) -> bool {
        let region = match src.try_next_block(len) {
            Some(region) => region,
            None => {
                // the buffer is shorter than the declared region; consume what
                // is there to keep the stream framed
                src.skip_remaining();
                return false;
            }
        };
        let mut rs = Scanner::new(region);
        self.decode_region(wire, &mut rs).is_some() && rs.eof()
    }
    fn decode_region(&mut self, wire: Wire, src: &mut Scanner) -> Option<()> {
        let count = rd_u32(wire, src)? as usize;
        if !src.has_left(count) {
            return None;
        }
        let tags = src.try_next_block(count)?.to_vec();
        self.ensure_free(count);
        for tag in tags {
            match tag {
                TAG_U8 => {
                    let v = src.try_next_byte()?;
                    self.add_u8(v);
                }
                TAG_U8_ARR => {
                    let len = rd_u32(wire, src)? as usize;
                    let block = src.try_next_block(len)?;
                    self.add_u8_array(block);
                }
                TAG_U16 => {
                    let v = rd_u16(wire, src)?;
                    self.add_u16(v);
                }
                TAG_U16_ARR => {
                    let arr = rd_num_array!(wire, src, 2, rd_u16);
                    self.add_u16_array(&arr);
                }
                TAG_U32 => {
                    let v = rd_u32(wire, src)?;
                    self.add_u32(v);
                }
                TAG_U32_ARR => {
                    let arr = rd_num_array!(wire, src, 4, rd_u32);
                    self.add_u32_array(&arr);
                }
                TAG_U64 => {
                    let v = rd_u64(wire, src)?;
                    self.add_u64(v);
                }
                TAG_U64_ARR => {
                    let arr = rd_num_array!(wire, src, 8, rd_u64);
                    self.add_u64_array(&arr);
                }
                TAG_F32 => {
                    let v = f32::from_bits(rd_u32(wire, src)?);
                    self.add_f32(v);
                }
                TAG_F32_ARR => {
                    let arr = rd_num_array!(wire, src, 4, rd_u32);
                    let arr: Vec<f32> = arr.into_iter().map(f32::from_bits).collect();
                    self.add_f32_array(&arr);
                }
                TAG_F64 => {
                    let v = f64::from_bits(rd_u64(wire, src)?);
                    self.add_f64(v);
                }
                TAG_F64_ARR => {
                    let arr = rd_num_array!(wire, src, 8, rd_u64);
                    let arr: Vec<f64> = arr.into_iter().map(f64::from_bits).collect();
                    self.add_f64_array(&arr);
                }
                TAG_STR => {
                    let s = rd_str(wire, src)?;
                    self.add_str(s);
                }
                TAG_STR_ARR => {
                    let len = rd_u32(wire, src)? as usize;
                    // every element needs at least a length field
                    if !src.has_left(len.checked_mul(SIZE_U32)?) {
                        return None;
                    }
                    let mut arr: Vec<&str> = Vec::with_capacity(len);
                    for _ in 0..len {
                        arr.push(rd_str(wire, src)?);
                    }
                    self.add_str_array(&arr);
                }
                TAG_DATA => {
                    let len = rd_u32(wire, src)? as usize;
                    let block = src.try_next_block(len)?;
                    self.add_data(block);
                }
                TAG_DATA_ARR => {
                    let len = rd_u32(wire, src)? as usize;
                    if !src.has_left(len.checked_mul(SIZE_U32)?) {
                        return None;
                    }
                    let mut arr: Vec<&[u8]> = Vec::with_capacity(len);
                    for _ in 0..len {
                        let dlen = rd_u32(wire, src)? as usize;
                        arr.push(src.try_next_block(dlen)?);
                    }
                    self.add_data_array(&arr);
                }
                _ => return None,
            }
        }
        Some(())
    }
}
