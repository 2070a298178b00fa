/*
 * Created on Thu Feb 29 2024
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

//! The typed on-wire value system. A [`Values`] container is an ordered,
//! self-describing sequence of scalars, arrays, strings and byte blobs paired
//! with a type string: one printable tag byte per value, uppercase for the
//! array variant of a tag.

mod blob;
pub mod codec;
#[cfg(test)]
mod tests;

pub use {
    blob::{LocalBlob, SharedBlob, SHARED_LIMIT},
    codec::Wire,
};

use {
    core::fmt,
    std::{fmt::Write, sync::Arc},
};

/*
    type tags
*/

pub const TAG_U8: u8 = b'b';
pub const TAG_U8_ARR: u8 = b'B';
pub const TAG_U16: u8 = b'h';
pub const TAG_U16_ARR: u8 = b'H';
pub const TAG_U32: u8 = b'i';
pub const TAG_U32_ARR: u8 = b'I';
pub const TAG_U64: u8 = b'l';
pub const TAG_U64_ARR: u8 = b'L';
pub const TAG_F32: u8 = b'f';
pub const TAG_F32_ARR: u8 = b'F';
pub const TAG_F64: u8 = b'd';
pub const TAG_F64_ARR: u8 = b'D';
pub const TAG_STR: u8 = b's';
pub const TAG_STR_ARR: u8 = b'S';
pub const TAG_DATA: u8 = b'x';
pub const TAG_DATA_ARR: u8 = b'X';

/*
    data values
*/

#[derive(Clone)]
/// An opaque byte payload. Small payloads are inlined; payloads above
/// [`SHARED_LIMIT`] are carried behind a shared blob so that they can move
/// between components without being copied
pub enum DataValue {
    Inline(Box<[u8]>),
    Shared(Arc<dyn SharedBlob>),
}

impl DataValue {
    /// Copy or wrap `data`, depending on the shared-blob threshold
    pub fn new(data: &[u8]) -> Self {
        if data.len() > SHARED_LIMIT {
            Self::Shared(LocalBlob::shared(data))
        } else {
            Self::Inline(data.into())
        }
    }
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Inline(d) => d,
            Self::Shared(b) => b.bytes(),
        }
    }
    pub fn len(&self) -> usize {
        self.bytes().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl fmt::Debug for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(d) => write!(f, "DataValue::Inline({}B)", d.len()),
            Self::Shared(b) => write!(f, "DataValue::Shared({}B)", b.len()),
        }
    }
}

/*
    values
*/

#[derive(Debug, PartialEq, Clone)]
/// A single typed value. The variant always matches the tag byte recorded in
/// the owning container's type string
pub enum Value {
    U8(u8),
    U8Array(Box<[u8]>),
    U16(u16),
    U16Array(Box<[u16]>),
    U32(u32),
    U32Array(Box<[u32]>),
    U64(u64),
    U64Array(Box<[u64]>),
    F32(f32),
    F32Array(Box<[f32]>),
    F64(f64),
    F64Array(Box<[f64]>),
    Str(Box<str>),
    StrArray(Box<[Box<str>]>),
    Data(DataValue),
    DataArray(Box<[DataValue]>),
}

impl Value {
    pub const fn tag(&self) -> u8 {
        match self {
            Self::U8(_) => TAG_U8,
            Self::U8Array(_) => TAG_U8_ARR,
            Self::U16(_) => TAG_U16,
            Self::U16Array(_) => TAG_U16_ARR,
            Self::U32(_) => TAG_U32,
            Self::U32Array(_) => TAG_U32_ARR,
            Self::U64(_) => TAG_U64,
            Self::U64Array(_) => TAG_U64_ARR,
            Self::F32(_) => TAG_F32,
            Self::F32Array(_) => TAG_F32_ARR,
            Self::F64(_) => TAG_F64,
            Self::F64Array(_) => TAG_F64_ARR,
            Self::Str(_) => TAG_STR,
            Self::StrArray(_) => TAG_STR_ARR,
            Self::Data(_) => TAG_DATA,
            Self::DataArray(_) => TAG_DATA_ARR,
        }
    }
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::U8(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_data(&self) -> Option<&DataValue> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }
    pub fn as_str_array(&self) -> Option<&[Box<str>]> {
        match self {
            Self::StrArray(a) => Some(a),
            _ => None,
        }
    }
    pub fn as_data_array(&self) -> Option<&[DataValue]> {
        match self {
            Self::DataArray(a) => Some(a),
            _ => None,
        }
    }
    /// The number of bytes this value occupies on the wire
    fn wire_len(&self) -> usize {
        const LEN: usize = core::mem::size_of::<u32>();
        match self {
            Self::U8(_) => 1,
            Self::U8Array(a) => LEN + a.len(),
            Self::U16(_) => 2,
            Self::U16Array(a) => LEN + a.len() * 2,
            Self::U32(_) | Self::F32(_) => 4,
            Self::U32Array(a) => LEN + a.len() * 4,
            Self::F32Array(a) => LEN + a.len() * 4,
            Self::U64(_) | Self::F64(_) => 8,
            Self::U64Array(a) => LEN + a.len() * 8,
            Self::F64Array(a) => LEN + a.len() * 8,
            Self::Str(s) => LEN + s.len(),
            Self::StrArray(a) => LEN + a.iter().map(|s| LEN + s.len()).sum::<usize>(),
            Self::Data(d) => LEN + d.len(),
            Self::DataArray(a) => LEN + a.iter().map(|d| LEN + d.len()).sum::<usize>(),
        }
    }
}

#[derive(Debug, PartialEq, Default)]
/// An ordered sequence of [`Value`]s paired with its type string. The type
/// string always has exactly one tag byte per value, and the tag at position
/// `i` matches the variant stored at position `i`
pub struct Values {
    type_string: Vec<u8>,
    values: Vec<Value>,
}

impl Values {
    const GROWTH_FLOOR: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }
    /// Drop every value and all storage owned by the container
    pub fn reset(&mut self) {
        self.type_string = Vec::new();
        self.values = Vec::new();
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// The tag bytes describing this container, one byte per value
    pub fn type_string(&self) -> &[u8] {
        &self.type_string
    }
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
    /// Grow the backing storage so that `need` more values fit. The new
    /// capacity is max(16, 2·cap, len + need)
    pub(crate) fn ensure_free(&mut self, need: usize) {
        let cap = self.values.capacity();
        if self.values.len() + need <= cap {
            return;
        }
        let target = (cap * 2)
            .max(self.values.len() + need)
            .max(Self::GROWTH_FLOOR);
        self.values.reserve_exact(target - self.values.len());
        self.type_string
            .reserve_exact(target - self.type_string.len());
    }
    fn push_value(&mut self, v: Value) {
        self.ensure_free(1);
        self.type_string.push(v.tag());
        self.values.push(v);
    }

    /*
        append ops
    */

    pub fn add_u8(&mut self, v: u8) {
        self.push_value(Value::U8(v));
    }
    pub fn add_u16(&mut self, v: u16) {
        self.push_value(Value::U16(v));
    }
    pub fn add_u32(&mut self, v: u32) {
        self.push_value(Value::U32(v));
    }
    pub fn add_u64(&mut self, v: u64) {
        self.push_value(Value::U64(v));
    }
    pub fn add_f32(&mut self, v: f32) {
        self.push_value(Value::F32(v));
    }
    pub fn add_f64(&mut self, v: f64) {
        self.push_value(Value::F64(v));
    }
    pub fn add_u8_array(&mut self, a: &[u8]) {
        self.push_value(Value::U8Array(a.into()));
    }
    pub fn add_u16_array(&mut self, a: &[u16]) {
        self.push_value(Value::U16Array(a.into()));
    }
    pub fn add_u32_array(&mut self, a: &[u32]) {
        self.push_value(Value::U32Array(a.into()));
    }
    pub fn add_u64_array(&mut self, a: &[u64]) {
        self.push_value(Value::U64Array(a.into()));
    }
    pub fn add_f32_array(&mut self, a: &[f32]) {
        self.push_value(Value::F32Array(a.into()));
    }
    pub fn add_f64_array(&mut self, a: &[f64]) {
        self.push_value(Value::F64Array(a.into()));
    }
    pub fn add_str(&mut self, s: &str) {
        self.push_value(Value::Str(s.into()));
    }
    pub fn add_string(&mut self, s: String) {
        self.push_value(Value::Str(s.into_boxed_str()));
    }
    pub fn add_str_array<S: AsRef<str>>(&mut self, items: &[S]) {
        self.push_value(Value::StrArray(
            items.iter().map(|s| s.as_ref().into()).collect(),
        ));
    }
    /// Append a data value; payloads above the shared-blob threshold are
    /// wrapped instead of copied into the container
    pub fn add_data(&mut self, data: &[u8]) {
        self.push_value(Value::Data(DataValue::new(data)));
    }
    /// Append a data value backed by an externally owned shared blob
    pub fn add_shared_data(&mut self, blob: Arc<dyn SharedBlob>) {
        self.push_value(Value::Data(DataValue::Shared(blob)));
    }
    pub fn add_data_array<B: AsRef<[u8]>>(&mut self, items: &[B]) {
        self.push_value(Value::DataArray(
            items.iter().map(|d| DataValue::new(d.as_ref())).collect(),
        ));
    }

    /*
        slot mutation
    */

    /// Replace one element of a string array in place. Returns false if the
    /// slot does not name a string array element
    pub fn set_str_elem(&mut self, idx: usize, elem: usize, s: &str) -> bool {
        match self.values.get_mut(idx) {
            Some(Value::StrArray(a)) if elem < a.len() => {
                a[elem] = s.into();
                true
            }
            _ => false,
        }
    }
    /// Replace one element of a data array in place, applying the shared-blob
    /// threshold. Returns false if the slot does not name a data array element
    pub fn set_data_elem(&mut self, idx: usize, elem: usize, data: &[u8]) -> bool {
        match self.values.get_mut(idx) {
            Some(Value::DataArray(a)) if elem < a.len() => {
                a[elem] = DataValue::new(data);
                true
            }
            _ => false,
        }
    }

    /*
        inspection
    */

    /// Total number of bytes an encoding of this container occupies: the value
    /// count, the type string and every value
    pub fn wire_len(&self) -> usize {
        core::mem::size_of::<u32>()
            + self.values.len()
            + self.values.iter().map(Value::wire_len).sum::<usize>()
    }
    /// Match an expected type spec against an actual one. A spec of `*`
    /// matches anything; otherwise the specs must be byte equal
    pub fn check_types(spec: &[u8], actual: &[u8]) -> bool {
        spec == b"*" || spec == actual
    }
    /// Render an indented, human readable form. Only used for status reporting
    pub fn dump(&self, indent: usize) -> String {
        let mut out = String::new();
        let pad = " ".repeat(indent);
        let _ = writeln!(out, "{pad}Values {{");
        if self.is_empty() {
            let _ = writeln!(out, "{pad}  [(empty)]");
        } else {
            // the type string is all printable ASCII tags
            let tags = String::from_utf8_lossy(&self.type_string);
            let _ = writeln!(out, "{pad}  [{tags}]");
        }
        for v in &self.values {
            let _ = writeln!(out, "{pad}  {}", dump_value(v));
        }
        let _ = writeln!(out, "{pad}}}");
        out
    }
}

impl core::ops::Index<usize> for Values {
    type Output = Value;
    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump(0))
    }
}

const DUMP_ARRAY_LIMIT: usize = 16;

fn dump_array<T: fmt::Display>(label: &str, a: &[T]) -> String {
    let mut out = format!("{label}[{}]: ", a.len());
    for (i, v) in a.iter().take(DUMP_ARRAY_LIMIT).enumerate() {
        if i != 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{v}");
    }
    if a.len() > DUMP_ARRAY_LIMIT {
        out.push_str(", ...");
    }
    out
}

fn dump_value(v: &Value) -> String {
    match v {
        Value::U8(v) => format!("u8: {v}"),
        Value::U8Array(a) => dump_array("u8", a),
        Value::U16(v) => format!("u16: {v}"),
        Value::U16Array(a) => dump_array("u16", a),
        Value::U32(v) => format!("u32: {v}"),
        Value::U32Array(a) => dump_array("u32", a),
        Value::U64(v) => format!("u64: {v}"),
        Value::U64Array(a) => dump_array("u64", a),
        Value::F32(v) => format!("f32: {v}"),
        Value::F32Array(a) => dump_array("f32", a),
        Value::F64(v) => format!("f64: {v}"),
        Value::F64Array(a) => dump_array("f64", a),
        Value::Str(s) => format!("str: {s:?}"),
        Value::StrArray(a) => {
            let strs: Vec<String> = a.iter().map(|s| format!("{s:?}")).collect();
            dump_array("str", &strs)
        }
        Value::Data(d) => format!("data: {}B{}", d.len(), if d.is_shared() { " (shared)" } else { "" }),
        Value::DataArray(a) => {
            let lens: Vec<String> = a.iter().map(|d| format!("{}B", d.len())).collect();
            dump_array("data", &lens)
        }
    }
}
