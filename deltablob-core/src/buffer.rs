// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Binary buffer management with the deltablob wire encoding.
//!
//! Integers are encoded as variable-length quantities: 7 data bits per byte,
//! continuation flag in the high bit, most-significant group first. Signed
//! values are zig-zag transformed before encoding so small-magnitude
//! negatives stay compact. The single byte `0x80` (continuation bit set,
//! zero payload, no following byte) is the reserved null sentinel; a minimal
//! encoding never begins with it, so null is always distinguishable from the
//! start of a value.
//!
//! FLOAT and DOUBLE are fixed-width big-endian with one reserved NaN bit
//! pattern meaning null. Strings are a VarInt character count followed by
//! one VarInt per UTF-16 code unit.

use byteorder::{BigEndian, ByteOrder};

/// Reserved byte denoting a null value.
pub const NULL_BYTE: u8 = 0x80;

/// Reserved FLOAT bit pattern denoting a null value (a quiet NaN).
pub const FLOAT_NULL_BITS: u32 = 0x7FF4_F4F4;

/// Reserved DOUBLE bit pattern denoting a null value (a quiet NaN).
pub const DOUBLE_NULL_BITS: u64 = 0x7FF4_F4F4_F4F4_F4F4;

/// Number of bytes `write_varuint64` emits for `value`.
///
/// Must exactly match encoder output; maximum-blob-length bookkeeping
/// depends on it.
#[inline]
pub const fn varuint_len(value: u64) -> usize {
    match value.checked_ilog2() {
        Some(bits) => (bits as usize) / 7 + 1,
        None => 1,
    }
}

/// Number of bytes `write_varint64` emits for `value`.
#[inline]
pub const fn varint_len(value: i64) -> usize {
    varuint_len(zigzag64(value))
}

/// Number of bytes `write_varint32` emits for `value`.
#[inline]
pub const fn varint32_len(value: i32) -> usize {
    varuint_len(zigzag32(value) as u64)
}

#[inline]
pub const fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
pub const fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub const fn unzigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[inline]
pub const fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Counts how many VarInt-encoded values (null sentinels included) occupy
/// `bytes`.
///
/// Collection payloads are packed back-to-back with only a total byte length,
/// so the receiver recovers the element count by scanning.
pub fn count_varints(bytes: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        count += 1;
        if bytes[i] == NULL_BYTE {
            i += 1;
            continue;
        }
        while i < bytes.len() && bytes[i] & 0x80 != 0 {
            i += 1;
        }
        i += 1;
    }
    count
}

use crate::error::Error;

#[derive(Default)]
pub struct Writer {
    pub(crate) bf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer::default()
    }

    pub fn with_capacity(cap: usize) -> Writer {
        Writer {
            bf: Vec::with_capacity(cap),
        }
    }

    /// Keeps capacity and resets len to 0.
    pub fn reset(&mut self) {
        self.bf.clear();
    }

    pub fn dump(&self) -> Vec<u8> {
        self.bf.clone()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bf
    }

    pub fn len(&self) -> usize {
        self.bf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bf
    }

    pub fn reserve(&mut self, additional: usize) {
        self.bf.reserve(additional);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bf.push(value);
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> usize {
        self.bf.extend_from_slice(v);
        v.len()
    }

    /// Writes the reserved null sentinel byte.
    pub fn write_null(&mut self) {
        self.bf.push(NULL_BYTE);
    }

    /// Fixed 4-byte big-endian signed integer, used only for the blob
    /// header format version.
    pub fn write_i32_be(&mut self, value: i32) {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.bf.extend_from_slice(&buf);
    }

    pub fn write_varuint64(&mut self, value: u64) {
        let groups = varuint_len(value);
        for i in (0..groups).rev() {
            let mut b = ((value >> (7 * i)) & 0x7F) as u8;
            if i != 0 {
                b |= 0x80;
            }
            self.bf.push(b);
        }
    }

    pub fn write_varuint32(&mut self, value: u32) {
        self.write_varuint64(value as u64);
    }

    pub fn write_varint32(&mut self, value: i32) {
        self.write_varuint64(zigzag32(value) as u64);
    }

    pub fn write_varint64(&mut self, value: i64) {
        self.write_varuint64(zigzag64(value));
    }

    pub fn write_nullable_varuint32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => self.write_varuint32(v),
            None => self.write_null(),
        }
    }

    pub fn write_nullable_varint32(&mut self, value: Option<i32>) {
        match value {
            Some(v) => self.write_varint32(v),
            None => self.write_null(),
        }
    }

    pub fn write_nullable_varint64(&mut self, value: Option<i64>) {
        match value {
            Some(v) => self.write_varint64(v),
            None => self.write_null(),
        }
    }

    /// Fixed 4 bytes big-endian; the reserved NaN pattern encodes null.
    pub fn write_float(&mut self, value: Option<f32>) {
        let bits = match value {
            Some(v) => v.to_bits(),
            None => FLOAT_NULL_BITS,
        };
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, bits);
        self.bf.extend_from_slice(&buf);
    }

    /// Fixed 8 bytes big-endian; the reserved NaN pattern encodes null.
    pub fn write_double(&mut self, value: Option<f64>) {
        let bits = match value {
            Some(v) => v.to_bits(),
            None => DOUBLE_NULL_BITS,
        };
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, bits);
        self.bf.extend_from_slice(&buf);
    }

    /// VarInt character count, then one VarInt per UTF-16 code unit.
    pub fn write_utf16_string(&mut self, s: &str) {
        let count = s.encode_utf16().count();
        self.write_varuint64(count as u64);
        for unit in s.encode_utf16() {
            self.write_varuint64(unit as u64);
        }
    }

    /// VarInt byte length then raw UTF-8 bytes. Used for control metadata
    /// (type names, header tags), not for record STRING fields.
    pub fn write_utf8_string(&mut self, s: &str) {
        self.write_varuint64(s.len() as u64);
        self.bf.extend_from_slice(s.as_bytes());
    }
}

pub struct Reader<'a> {
    bf: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bf: &'a [u8]) -> Reader<'a> {
        Reader { bf, cursor: 0 }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bf.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn check(&self, len: usize) -> Result<(), Error> {
        // `len` may come straight from a corrupt length prefix; the add
        // must not wrap
        match self.cursor.checked_add(len) {
            Some(end) if end <= self.bf.len() => Ok(()),
            _ => Err(Error::corrupt_stream("unexpected end of stream")),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        self.check(1)?;
        let v = self.bf[self.cursor];
        self.cursor += 1;
        Ok(v)
    }

    pub fn peek_u8(&self) -> Result<u8, Error> {
        self.check(1)?;
        Ok(self.bf[self.cursor])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        self.check(len)?;
        let v = &self.bf[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(v)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.check(len)?;
        self.cursor += len;
        Ok(())
    }

    pub fn read_i32_be(&mut self) -> Result<i32, Error> {
        Ok(BigEndian::read_i32(self.read_bytes(4)?))
    }

    /// Reads a VarInt; the null sentinel here is a corrupt-stream error
    /// because the caller required a concrete value.
    pub fn read_varuint64(&mut self) -> Result<u64, Error> {
        match self.read_nullable_varuint64()? {
            Some(v) => Ok(v),
            None => Err(Error::corrupt_stream(
                "null sentinel where a concrete value was required",
            )),
        }
    }

    pub fn read_nullable_varuint64(&mut self) -> Result<Option<u64>, Error> {
        let first = self.read_u8()?;
        if first == NULL_BYTE {
            return Ok(None);
        }
        let mut value = (first & 0x7F) as u64;
        let mut b = first;
        let mut read = 1;
        while b & 0x80 != 0 {
            if read == 10 {
                return Err(Error::corrupt_stream("varint longer than 10 bytes"));
            }
            if value >> 57 != 0 {
                return Err(Error::corrupt_stream("varint exceeds 64 bits"));
            }
            b = self.read_u8()?;
            value = (value << 7) | (b & 0x7F) as u64;
            read += 1;
        }
        Ok(Some(value))
    }

    pub fn read_varuint32(&mut self) -> Result<u32, Error> {
        let v = self.read_varuint64()?;
        u32::try_from(v).map_err(|_| Error::corrupt_stream("varint exceeds 32 bits"))
    }

    pub fn read_nullable_varuint32(&mut self) -> Result<Option<u32>, Error> {
        match self.read_nullable_varuint64()? {
            Some(v) => u32::try_from(v)
                .map(Some)
                .map_err(|_| Error::corrupt_stream("varint exceeds 32 bits")),
            None => Ok(None),
        }
    }

    pub fn read_varint32(&mut self) -> Result<i32, Error> {
        let v = self.read_varuint64()?;
        let v = u32::try_from(v).map_err(|_| Error::corrupt_stream("varint exceeds 32 bits"))?;
        Ok(unzigzag32(v))
    }

    pub fn read_varint64(&mut self) -> Result<i64, Error> {
        Ok(unzigzag64(self.read_varuint64()?))
    }

    pub fn read_nullable_varint32(&mut self) -> Result<Option<i32>, Error> {
        match self.read_nullable_varuint64()? {
            Some(v) => {
                let v =
                    u32::try_from(v).map_err(|_| Error::corrupt_stream("varint exceeds 32 bits"))?;
                Ok(Some(unzigzag32(v)))
            }
            None => Ok(None),
        }
    }

    pub fn read_nullable_varint64(&mut self) -> Result<Option<i64>, Error> {
        Ok(self.read_nullable_varuint64()?.map(unzigzag64))
    }

    pub fn read_float(&mut self) -> Result<Option<f32>, Error> {
        let bits = BigEndian::read_u32(self.read_bytes(4)?);
        if bits == FLOAT_NULL_BITS {
            Ok(None)
        } else {
            Ok(Some(f32::from_bits(bits)))
        }
    }

    pub fn read_double(&mut self) -> Result<Option<f64>, Error> {
        let bits = BigEndian::read_u64(self.read_bytes(8)?);
        if bits == DOUBLE_NULL_BITS {
            Ok(None)
        } else {
            Ok(Some(f64::from_bits(bits)))
        }
    }

    pub fn read_utf16_string(&mut self) -> Result<String, Error> {
        let count = self.read_varuint64()? as usize;
        let mut units = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let unit = self.read_varuint64()?;
            let unit = u16::try_from(unit)
                .map_err(|_| Error::corrupt_stream("UTF-16 code unit exceeds 16 bits"))?;
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| Error::corrupt_stream("invalid UTF-16 sequence"))
    }

    pub fn read_utf8_string(&mut self) -> Result<String, Error> {
        let len = self.read_varuint64()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::corrupt_stream("invalid UTF-8 sequence"))
    }

    /// Advances past one VarInt (or null sentinel) without decoding it.
    pub fn skip_varint(&mut self) -> Result<(), Error> {
        let first = self.read_u8()?;
        if first == NULL_BYTE {
            return Ok(());
        }
        let mut b = first;
        while b & 0x80 != 0 {
            b = self.read_u8()?;
        }
        Ok(())
    }
}
