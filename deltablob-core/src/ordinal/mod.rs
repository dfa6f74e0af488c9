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

//! Ordinal map: content-addressed deduplication of serialized records.
//!
//! Maps a serialized byte sequence to a stable non-negative ordinal.
//! Byte-identical sequences always share one ordinal and one stored
//! payload; that deduplication is what makes snapshot and delta blobs
//! compact.
//!
//! ## Layout
//!
//! Payloads live length-prefixed in a shared append-only
//! [`SegmentedByteStore`]; the index is an open-addressed, linear-probing
//! table of `AtomicU64` slots, each packing `(ordinal, offset)`, keyed by a
//! 32-bit content hash. The hash is not stored: rehashing re-derives it
//! from the payload bytes.
//!
//! ## Concurrency
//!
//! `get_or_assign_ordinal` is the serialization hot path. Readers probe the
//! current table with acquire loads and never take a lock; a slot, once
//! published with release ordering, is immutable. Writers serialize against
//! each other on a spinlock, re-probe after acquiring it (another writer
//! may have inserted the same bytes first), then append the payload and
//! publish the slot. Table growth builds a new table and swaps it in via
//! `ArcSwap`; readers mid-probe keep their consistent old table, miss, and
//! retry through the writer path, which always probes the current table.
//!
//! Lifecycle operations (`compact`, `prepare_for_write`, `serialize`) are
//! single-writer by contract: the caller guarantees no `get_or_assign`
//! calls are in flight.

mod free;

pub use free::FreeOrdinalPool;

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHasher;

use crate::bitset::ImageBitSet;
use crate::buffer::{varuint_len, Reader, Writer};
use crate::error::Error;
use crate::store::{SegmentedByteStore, LARGE_SEGMENT_BYTES};
use crate::util::Spinlock;

const EMPTY_SLOT: u64 = u64::MAX;
const OFFSET_BITS: u32 = 36;
const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;
/// 28 bits of ordinal, 36 bits of byte offset per slot.
pub const MAX_ORDINAL: u32 = (1u32 << 28) - 2;
const LOAD_FACTOR_PCT: usize = 70;
const INITIAL_CAPACITY: usize = 256;

#[inline]
fn pack(ordinal: u32, offset: u64) -> u64 {
    debug_assert!(offset <= OFFSET_MASK);
    ((ordinal as u64) << OFFSET_BITS) | offset
}

#[inline]
fn unpack(slot: u64) -> (u32, u64) {
    ((slot >> OFFSET_BITS) as u32, slot & OFFSET_MASK)
}

fn content_hash(bytes: &[u8]) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    let h = hasher.finish();
    (h ^ (h >> 32)) as u32
}

struct ProbeTable {
    slots: Vec<AtomicU64>,
    mask: usize,
}

impl ProbeTable {
    fn with_capacity(capacity: usize) -> ProbeTable {
        debug_assert!(capacity.is_power_of_two());
        ProbeTable {
            slots: (0..capacity).map(|_| AtomicU64::new(EMPTY_SLOT)).collect(),
            mask: capacity - 1,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Capacity needed to keep `entries` under the load factor.
fn capacity_for(entries: usize) -> usize {
    let min = entries * 100 / LOAD_FACTOR_PCT + 1;
    min.next_power_of_two().max(INITIAL_CAPACITY)
}

struct WriterState {
    size: u64,
    count: usize,
    free: FreeOrdinalPool,
}

pub struct OrdinalMap {
    store: SegmentedByteStore,
    table: ArcSwap<ProbeTable>,
    writer: Spinlock<WriterState>,
    /// Dense ordinal→offset index built by `prepare_for_write`
    /// (offset of the length prefix; `u64::MAX` marks a dead ordinal).
    pointers: ArcSwap<Vec<u64>>,
}

impl Default for OrdinalMap {
    fn default() -> OrdinalMap {
        OrdinalMap::new()
    }
}

impl OrdinalMap {
    pub fn new() -> OrdinalMap {
        OrdinalMap::with_segment_bytes(LARGE_SEGMENT_BYTES)
    }

    pub fn with_segment_bytes(segment_bytes: usize) -> OrdinalMap {
        OrdinalMap {
            store: SegmentedByteStore::new(segment_bytes),
            table: ArcSwap::from_pointee(ProbeTable::with_capacity(INITIAL_CAPACITY)),
            writer: Spinlock::new(WriterState {
                size: 0,
                count: 0,
                free: FreeOrdinalPool::new(),
            }),
            pointers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.writer.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently appended to the backing store.
    pub fn store_size(&self) -> u64 {
        self.writer.lock().size
    }

    /// Lock-free lookup; `None` when the bytes have no assigned ordinal.
    pub fn get(&self, bytes: &[u8]) -> Option<u32> {
        self.find(&self.table.load(), bytes, content_hash(bytes))
    }

    /// Returns the ordinal for `bytes`, assigning a new one if absent.
    ///
    /// Safe to call from many threads concurrently. The read path takes no
    /// lock; racing writers for the same novel bytes are serialized and the
    /// losers observe the winner's ordinal on re-probe.
    pub fn get_or_assign_ordinal(&self, bytes: &[u8]) -> Result<u32, Error> {
        let hash = content_hash(bytes);
        if let Some(ordinal) = self.find(&self.table.load(), bytes, hash) {
            return Ok(ordinal);
        }
        let mut writer = self.writer.lock();
        // double-check: another thread may have published this entry while
        // we were waiting on the lock
        if let Some(ordinal) = self.find(&self.table.load(), bytes, hash) {
            return Ok(ordinal);
        }
        if (writer.count + 1) * 100 > self.table.load().capacity() * LOAD_FACTOR_PCT {
            self.grow(writer.count);
        }
        let ordinal = writer.free.next();
        if ordinal > MAX_ORDINAL {
            writer.free.free(ordinal);
            return Err(Error::protocol_misuse("ordinal space exhausted"));
        }
        let offset = match self.append_payload(&mut writer, bytes) {
            Ok(offset) => offset,
            Err(e) => {
                // nothing was published for it; hand the ordinal back
                writer.free.free(ordinal);
                return Err(e);
            }
        };
        self.publish(&self.table.load(), hash, pack(ordinal, offset));
        writer.count += 1;
        Ok(ordinal)
    }

    /// Pre-seeds an externally-known assignment. Single-threaded use only;
    /// the caller guarantees no concurrent access.
    pub fn put(&self, bytes: &[u8], ordinal: u32) -> Result<(), Error> {
        let hash = content_hash(bytes);
        let mut writer = self.writer.lock();
        if self.find(&self.table.load(), bytes, hash).is_some() {
            return Err(Error::protocol_misuse(
                "put() for bytes that already have an ordinal",
            ));
        }
        if (writer.count + 1) * 100 > self.table.load().capacity() * LOAD_FACTOR_PCT {
            self.grow(writer.count);
        }
        writer.free.reserve_through(ordinal);
        let offset = self.append_payload(&mut writer, bytes)?;
        self.publish(&self.table.load(), hash, pack(ordinal, offset));
        writer.count += 1;
        Ok(())
    }

    fn find(&self, table: &ProbeTable, bytes: &[u8], hash: u32) -> Option<u32> {
        let mut idx = hash as usize & table.mask;
        loop {
            let slot = table.slots[idx].load(Ordering::Acquire);
            if slot == EMPTY_SLOT {
                return None;
            }
            let (ordinal, offset) = unpack(slot);
            let (len, prefix, _) = self.store.read_varuint_at(offset);
            if len as usize == bytes.len() && self.store.range_eq(offset + prefix as u64, bytes) {
                return Some(ordinal);
            }
            idx = (idx + 1) & table.mask;
        }
    }

    /// Appends `varint(len) + bytes` to the store, returning the prefix
    /// offset. Caller holds the writer lock.
    fn append_payload(&self, writer: &mut WriterState, bytes: &[u8]) -> Result<u64, Error> {
        let offset = writer.size;
        let prefix_len = varuint_len(bytes.len() as u64);
        let total = prefix_len as u64 + bytes.len() as u64;
        if offset + total > OFFSET_MASK {
            return Err(Error::protocol_misuse("ordinal map byte space exhausted"));
        }
        let mut prefix = Writer::with_capacity(prefix_len);
        prefix.write_varuint64(bytes.len() as u64);
        self.store.put_slice(offset, prefix.as_slice());
        self.store.put_slice(offset + prefix_len as u64, bytes);
        writer.size = offset + total;
        Ok(offset)
    }

    /// Publishes a packed slot into the first empty probe position.
    /// Caller holds the writer lock.
    fn publish(&self, table: &ProbeTable, hash: u32, packed: u64) {
        let mut idx = hash as usize & table.mask;
        while table.slots[idx].load(Ordering::Relaxed) != EMPTY_SLOT {
            idx = (idx + 1) & table.mask;
        }
        table.slots[idx].store(packed, Ordering::Release);
    }

    /// Builds a double-size table from live slots. The hash is re-derived
    /// from each entry's stored bytes rather than cached in the slot.
    /// Caller holds the writer lock.
    fn grow(&self, count: usize) {
        let old = self.table.load();
        let new = ProbeTable::with_capacity(capacity_for(count).max(old.capacity() * 2));
        for slot in &old.slots {
            let value = slot.load(Ordering::Acquire);
            if value == EMPTY_SLOT {
                continue;
            }
            let (_, offset) = unpack(value);
            let hash = self.hash_at(offset);
            let mut idx = hash as usize & new.mask;
            while new.slots[idx].load(Ordering::Relaxed) != EMPTY_SLOT {
                idx = (idx + 1) & new.mask;
            }
            new.slots[idx].store(value, Ordering::Relaxed);
        }
        self.table.store(Arc::new(new));
    }

    fn hash_at(&self, offset: u64) -> u32 {
        let (len, prefix, _) = self.store.read_varuint_at(offset);
        let mut payload = vec![0u8; len as usize];
        self.store.read_into(offset + prefix as u64, &mut payload);
        content_hash(&payload)
    }

    /// All live `(ordinal, prefix_offset)` pairs.
    fn entries(&self) -> Vec<(u32, u64)> {
        let table = self.table.load();
        let mut out = Vec::new();
        for slot in &table.slots {
            let value = slot.load(Ordering::Acquire);
            if value != EMPTY_SLOT {
                out.push(unpack(value));
            }
        }
        out
    }

    /// Reclaims byte-store space and ordinals not set in `used`.
    ///
    /// Surviving payloads slide leftward to close gaps (ascending offset
    /// order, so a copy can never clobber a payload not yet moved);
    /// ordinals never change, only offsets. Freed ordinals go back to the
    /// pool in ascending order. The probe table is rebuilt from the
    /// survivors. Single-writer operation.
    pub fn compact(&self, used: &ImageBitSet) {
        let mut writer = self.writer.lock();
        let mut entries = self.entries();
        entries.sort_unstable_by_key(|&(_, offset)| offset);

        let mut cursor = 0u64;
        let mut survivors: Vec<(u32, u64)> = Vec::with_capacity(entries.len());
        let mut freed: Vec<u32> = Vec::new();
        for (ordinal, offset) in entries {
            if used.get(ordinal) {
                let (len, prefix, _) = self.store.read_varuint_at(offset);
                let total = prefix as u64 + len;
                self.store.copy_within(offset, cursor, total);
                survivors.push((ordinal, cursor));
                cursor += total;
            } else {
                freed.push(ordinal);
            }
        }
        freed.sort_unstable();
        let freed_count = freed.len();
        for ordinal in freed {
            writer.free.free(ordinal);
        }

        let new = ProbeTable::with_capacity(capacity_for(survivors.len()));
        for &(ordinal, offset) in &survivors {
            let hash = self.hash_at(offset);
            let mut idx = hash as usize & new.mask;
            while new.slots[idx].load(Ordering::Relaxed) != EMPTY_SLOT {
                idx = (idx + 1) & new.mask;
            }
            new.slots[idx].store(pack(ordinal, offset), Ordering::Relaxed);
        }
        writer.count -= freed_count;
        writer.size = cursor;
        self.table.store(Arc::new(new));
        self.pointers.store(Arc::new(Vec::new()));

        tracing::debug!(
            survivors = survivors.len(),
            freed = freed_count,
            bytes = cursor,
            "compacted ordinal map"
        );
    }

    /// Builds the dense ordinal→offset index for O(1) payload emission and
    /// returns the largest single payload length (callers size streamed
    /// decode scratch buffers from it). Single-writer operation.
    pub fn prepare_for_write(&self) -> usize {
        let writer = self.writer.lock();
        let high = writer.free.high_water_mark() as usize;
        drop(writer);
        let mut pointers = vec![u64::MAX; high];
        let mut max_payload = 0usize;
        for (ordinal, offset) in self.entries() {
            pointers[ordinal as usize] = offset;
            let (len, _, _) = self.store.read_varuint_at(offset);
            max_payload = max_payload.max(len as usize);
        }
        self.pointers.store(Arc::new(pointers));
        max_payload
    }

    /// Highest assigned ordinal plus one (including dead ordinals).
    pub fn ordinal_space(&self) -> u32 {
        self.writer.lock().free.high_water_mark()
    }

    /// Copies `varint(len) + payload` for `ordinal` into `out`. Requires a
    /// preceding `prepare_for_write`. Returns false for dead ordinals.
    pub fn copy_record_to_writer(&self, ordinal: u32, out: &mut Writer) -> bool {
        let pointers = self.pointers.load();
        let Some(&offset) = pointers.get(ordinal as usize) else {
            return false;
        };
        if offset == u64::MAX {
            return false;
        }
        let (len, prefix, _) = self.store.read_varuint_at(offset);
        self.store.copy_to_writer(out, offset, prefix as u64 + len);
        true
    }

    /// Payload bytes for `ordinal` (no length prefix). Requires a preceding
    /// `prepare_for_write`.
    pub fn payload(&self, ordinal: u32) -> Option<Vec<u8>> {
        let pointers = self.pointers.load();
        let &offset = pointers.get(ordinal as usize)?;
        if offset == u64::MAX {
            return None;
        }
        let (len, prefix, _) = self.store.read_varuint_at(offset);
        let mut out = vec![0u8; len as usize];
        self.store.read_into(offset + prefix as u64, &mut out);
        Some(out)
    }

    /// Persists the full map (entries ascending by ordinal, then the free
    /// pool) so a restarted process can resume the delta chain.
    pub fn serialize(&self, w: &mut Writer) {
        let writer = self.writer.lock();
        let mut entries = self.entries();
        entries.sort_unstable_by_key(|&(ordinal, _)| ordinal);
        w.write_varuint64(entries.len() as u64);
        for (ordinal, offset) in entries {
            let (len, prefix, _) = self.store.read_varuint_at(offset);
            w.write_varuint32(ordinal);
            w.write_varuint64(len);
            self.store.copy_to_writer(w, offset + prefix as u64, len);
        }
        writer.free.serialize(w);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<OrdinalMap, Error> {
        let map = OrdinalMap::new();
        map.load_from(r)?;
        Ok(map)
    }

    /// Restores persisted entries and free-pool state into this (empty)
    /// map in place. Single-threaded use only.
    pub fn load_from(&self, r: &mut Reader<'_>) -> Result<(), Error> {
        let mut writer = self.writer.lock();
        if writer.count != 0 {
            return Err(Error::protocol_misuse(
                "load_from() on a non-empty ordinal map",
            ));
        }
        let count = r.read_varuint64()? as usize;
        for _ in 0..count {
            let ordinal = r.read_varuint32()?;
            let len = r.read_varuint64()? as usize;
            let bytes = r.read_bytes(len)?;
            if (writer.count + 1) * 100 > self.table.load().capacity() * LOAD_FACTOR_PCT {
                self.grow(writer.count);
            }
            let offset = self.append_payload(&mut writer, bytes)?;
            self.publish(&self.table.load(), content_hash(bytes), pack(ordinal, offset));
            writer.count += 1;
        }
        writer.free = FreeOrdinalPool::deserialize(r)?;
        Ok(())
    }
}
