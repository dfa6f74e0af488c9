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

//! Append-friendly byte storage addressed by 0-based `u64` offsets.
//!
//! Bytes live in power-of-two segments allocated on first touch and never
//! moved or reallocated afterwards. Offset stability across growth is the
//! whole point: the ordinal map publishes offsets into this store to
//! lock-free readers, so a published byte must stay at its address for the
//! lifetime of the store (until compaction rewrites it under exclusion).
//!
//! Concurrency contract: at most one writer at a time (the ordinal map
//! serializes its writers); any number of readers may run concurrently with
//! that writer as long as they only touch offsets below the published size.
//! Segment pointers are published with release ordering and loaded with
//! acquire ordering to make freshly-allocated segments visible.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::buffer::{Writer, NULL_BYTE};
use crate::error::Error;

/// Fixed spine length. With the default 1 MiB segments this addresses 4 TiB,
/// far beyond the 36-bit offsets the ordinal map can publish.
const SPINE_LEN: usize = 4096;

/// Segment size for per-record scratch stores.
pub const SMALL_SEGMENT_BYTES: usize = 1 << 8;

/// Segment size for the shared ordinal-map backing store.
pub const LARGE_SEGMENT_BYTES: usize = 1 << 20;

pub struct SegmentedByteStore {
    shift: u32,
    mask: u64,
    spine: Box<[AtomicPtr<u8>]>,
}

unsafe impl Send for SegmentedByteStore {}
unsafe impl Sync for SegmentedByteStore {}

impl SegmentedByteStore {
    /// `segment_bytes` must be a power of two.
    pub fn new(segment_bytes: usize) -> SegmentedByteStore {
        assert!(segment_bytes.is_power_of_two());
        let spine: Vec<AtomicPtr<u8>> = (0..SPINE_LEN)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        SegmentedByteStore {
            shift: segment_bytes.trailing_zeros(),
            mask: (segment_bytes as u64) - 1,
            spine: spine.into_boxed_slice(),
        }
    }

    pub fn segment_bytes(&self) -> usize {
        1usize << self.shift
    }

    #[inline]
    fn segment_index(&self, offset: u64) -> usize {
        (offset >> self.shift) as usize
    }

    #[inline]
    fn segment_offset(&self, offset: u64) -> usize {
        (offset & self.mask) as usize
    }

    /// Loads the segment holding `offset`, allocating it if absent.
    /// Writer-side only; callers must be externally serialized.
    fn segment_for_write(&self, offset: u64) -> *mut u8 {
        let idx = self.segment_index(offset);
        assert!(idx < SPINE_LEN, "segmented store address space exhausted");
        let p = self.spine[idx].load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let seg: Box<[u8]> = vec![0u8; self.segment_bytes()].into_boxed_slice();
        let raw = Box::into_raw(seg) as *mut u8;
        self.spine[idx].store(raw, Ordering::Release);
        raw
    }

    #[inline]
    fn segment_for_read(&self, offset: u64) -> *const u8 {
        let idx = self.segment_index(offset);
        let p = self.spine[idx].load(Ordering::Acquire);
        debug_assert!(!p.is_null(), "read past allocated segments");
        p
    }

    /// Writer-side single-byte store.
    pub fn set(&self, offset: u64, value: u8) {
        let seg = self.segment_for_write(offset);
        unsafe { *seg.add(self.segment_offset(offset)) = value };
    }

    pub fn get(&self, offset: u64) -> u8 {
        let seg = self.segment_for_read(offset);
        unsafe { *seg.add(self.segment_offset(offset)) }
    }

    /// Writer-side bulk store, crossing segment boundaries as needed.
    pub fn put_slice(&self, mut offset: u64, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let seg = self.segment_for_write(offset);
            let at = self.segment_offset(offset);
            let room = self.segment_bytes() - at;
            let n = room.min(bytes.len());
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), seg.add(at), n);
            }
            offset += n as u64;
            bytes = &bytes[n..];
        }
    }

    /// Compares `bytes` against the range starting at `offset`.
    pub fn range_eq(&self, mut offset: u64, bytes: &[u8]) -> bool {
        let mut rest = bytes;
        while !rest.is_empty() {
            let seg = self.segment_for_read(offset);
            let at = self.segment_offset(offset);
            let room = self.segment_bytes() - at;
            let n = room.min(rest.len());
            let stored = unsafe { std::slice::from_raw_parts(seg.add(at), n) };
            if stored != &rest[..n] {
                return false;
            }
            offset += n as u64;
            rest = &rest[n..];
        }
        true
    }

    /// Copies a byte range from another store into this one.
    pub fn copy_from(&self, src: &SegmentedByteStore, src_pos: u64, dest_pos: u64, len: u64) {
        let mut buf = [0u8; 512];
        let mut copied = 0u64;
        while copied < len {
            let n = ((len - copied) as usize).min(buf.len());
            src.read_into(src_pos + copied, &mut buf[..n]);
            self.put_slice(dest_pos + copied, &buf[..n]);
            copied += n as u64;
        }
    }

    /// In-place leftward copy used by compaction. Requires `dest_pos <=
    /// src_pos`; copying forward through a bounce buffer keeps overlapping
    /// ranges safe.
    pub fn copy_within(&self, src_pos: u64, dest_pos: u64, len: u64) {
        debug_assert!(dest_pos <= src_pos);
        if dest_pos == src_pos || len == 0 {
            return;
        }
        let mut buf = [0u8; 512];
        let mut copied = 0u64;
        while copied < len {
            let n = ((len - copied) as usize).min(buf.len());
            self.read_into(src_pos + copied, &mut buf[..n]);
            self.put_slice(dest_pos + copied, &buf[..n]);
            copied += n as u64;
        }
    }

    pub fn read_into(&self, mut offset: u64, mut out: &mut [u8]) {
        while !out.is_empty() {
            let seg = self.segment_for_read(offset);
            let at = self.segment_offset(offset);
            let room = self.segment_bytes() - at;
            let n = room.min(out.len());
            unsafe {
                std::ptr::copy_nonoverlapping(seg.add(at), out.as_mut_ptr(), n);
            }
            offset += n as u64;
            out = &mut out[n..];
        }
    }

    /// Reads one most-significant-group-first VarInt starting at `offset`,
    /// returning the value and the number of bytes consumed. Null sentinels
    /// are reported as `(0, 1)` with `is_null` true.
    pub fn read_varuint_at(&self, offset: u64) -> (u64, usize, bool) {
        let first = self.get(offset);
        if first == NULL_BYTE {
            return (0, 1, true);
        }
        let mut value = (first & 0x7F) as u64;
        let mut b = first;
        let mut read = 1usize;
        while b & 0x80 != 0 {
            b = self.get(offset + read as u64);
            value = (value << 7) | (b & 0x7F) as u64;
            read += 1;
        }
        (value, read, false)
    }

    /// Appends the range to a heap writer.
    pub fn copy_to_writer(&self, w: &mut Writer, start: u64, len: u64) {
        let mut buf = [0u8; 512];
        let mut copied = 0u64;
        while copied < len {
            let n = ((len - copied) as usize).min(buf.len());
            self.read_into(start + copied, &mut buf[..n]);
            w.write_bytes(&buf[..n]);
            copied += n as u64;
        }
    }

    /// Streams the range to an output sink; I/O errors propagate to the
    /// caller, which also keeps responsibility for closing the sink.
    pub fn write_to<W: std::io::Write>(&self, sink: &mut W, start: u64, len: u64) -> Result<(), Error> {
        let mut buf = [0u8; 512];
        let mut copied = 0u64;
        while copied < len {
            let n = ((len - copied) as usize).min(buf.len());
            self.read_into(start + copied, &mut buf[..n]);
            sink.write_all(&buf[..n])?;
            copied += n as u64;
        }
        Ok(())
    }
}

impl Drop for SegmentedByteStore {
    fn drop(&mut self) {
        let seg_len = self.segment_bytes();
        for slot in self.spine.iter() {
            let p = slot.load(Ordering::Acquire);
            if !p.is_null() {
                unsafe {
                    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(p, seg_len)));
                }
            }
        }
    }
}
