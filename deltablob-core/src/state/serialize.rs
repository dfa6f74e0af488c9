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

//! Write-side state for one registered type.
//!
//! Coordinates the pooled serialization records, the ordinal map, and the
//! per-image membership bitsets through the two-phase cycle:
//!
//! 1. **Accepting**: concurrent `add` calls encode objects, deduplicate
//!    them through the ordinal map and OR image flags into the current
//!    membership bitsets.
//! 2. **Write-ready** (after `prepare_for_write`): membership is frozen,
//!    the ordinal map's dense emission index is built, and `add` is a
//!    protocol-misuse error until `prepare_for_next_cycle` compacts the
//!    map, swaps the membership double buffer and re-opens the state.
//!
//! Lifecycle transitions are not safe concurrently with `add` or with each
//! other; a single coordinating thread drives cycle boundaries (the phase
//! flag is a defensive check, not a lock).

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

use crate::bitset::ImageBitSet;
use crate::buffer::Writer;
use crate::error::Error;
use crate::ordinal::OrdinalMap;
use crate::pool::ScratchPool;
use crate::record::{BinaryRecordSink, FieldScratch};
use crate::schema::Schema;
use crate::serializer::{OrdinalAssigner, SharedObject, TypeSerializer};
use crate::util::Spinlock;

const PHASE_ACCEPTING: u8 = 0;
const PHASE_WRITE_READY: u8 = 1;

struct Scratch {
    fields: FieldScratch,
    flat: Writer,
}

struct Membership {
    current: Vec<ImageBitSet>,
    previous: Vec<ImageBitSet>,
}

/// Identity cache entry: last-known ordinal, the image mask already
/// recorded for it, and the object itself. Retaining the `Arc` pins the
/// allocation, so the keying address cannot be reused by a different
/// object before the wholesale clear at the cycle boundary.
type IdentityCache = FxHashMap<usize, (u32, u64, SharedObject)>;

pub struct TypeSerializationState {
    type_name: String,
    schema: ArcSwap<Schema>,
    previous_schema: Spinlock<Option<Arc<Schema>>>,
    ordinal_map: OrdinalMap,
    membership: Spinlock<Membership>,
    identity: Spinlock<IdentityCache>,
    identity_cache_enabled: bool,
    scratch: ScratchPool<Scratch>,
    phase: AtomicU8,
    max_payload_len: AtomicUsize,
}

impl TypeSerializationState {
    pub fn new(schema: Schema, num_images: usize, identity_cache: bool) -> TypeSerializationState {
        let num_fields = schema.num_fields();
        TypeSerializationState {
            type_name: schema.name().to_string(),
            schema: ArcSwap::from_pointee(schema),
            previous_schema: Spinlock::new(None),
            ordinal_map: OrdinalMap::new(),
            membership: Spinlock::new(Membership {
                current: vec![ImageBitSet::new(); num_images],
                previous: vec![ImageBitSet::new(); num_images],
            }),
            identity: Spinlock::new(IdentityCache::default()),
            identity_cache_enabled: identity_cache,
            scratch: ScratchPool::new(move || Scratch {
                fields: FieldScratch::new(num_fields),
                flat: Writer::new(),
            }),
            phase: AtomicU8::new(PHASE_ACCEPTING),
            max_payload_len: AtomicUsize::new(0),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.schema.load_full()
    }

    pub fn previous_schema(&self) -> Option<Arc<Schema>> {
        self.previous_schema.lock().clone()
    }

    pub fn ordinal_map(&self) -> &OrdinalMap {
        &self.ordinal_map
    }

    fn check_accepting(&self) -> Result<(), Error> {
        if self.phase.load(Ordering::Acquire) != PHASE_ACCEPTING {
            return Err(Error::protocol_misuse(format!(
                "add() for type '{}' outside the accepting-objects phase",
                self.type_name
            )));
        }
        Ok(())
    }

    fn record_membership(&self, ordinal: u32, image_mask: u64) {
        let mut membership = self.membership.lock();
        for (image, bits) in membership.current.iter_mut().enumerate() {
            if image_mask & (1u64 << image) != 0 {
                bits.set(ordinal);
            }
        }
    }

    /// Encodes `obj` (unless the identity cache short-circuits it), assigns
    /// its ordinal and records image membership. Concurrent-safe.
    pub fn add(
        &self,
        obj: &SharedObject,
        image_mask: u64,
        serializer: &dyn TypeSerializer,
        assigner: &dyn OrdinalAssigner,
    ) -> Result<u32, Error> {
        self.check_accepting()?;

        let identity_key = Arc::as_ptr(obj) as *const () as usize;
        if self.identity_cache_enabled {
            let cached = self
                .identity
                .lock()
                .get(&identity_key)
                .map(|&(ordinal, seen_mask, _)| (ordinal, seen_mask));
            if let Some((ordinal, seen_mask)) = cached {
                if image_mask & !seen_mask != 0 {
                    self.record_membership(ordinal, image_mask);
                    self.identity.lock().insert(
                        identity_key,
                        (ordinal, seen_mask | image_mask, obj.clone()),
                    );
                }
                return Ok(ordinal);
            }
        }

        let schema = self.schema.load_full();
        let ordinal = self.scratch.with(|scratch| {
            let mut sink =
                BinaryRecordSink::new(&schema, &mut scratch.fields, assigner, image_mask);
            serializer.serialize(obj, &mut sink)?;
            scratch.flat.reset();
            scratch.fields.concat(&schema, &mut scratch.flat);
            self.ordinal_map.get_or_assign_ordinal(scratch.flat.as_slice())
        })?;
        self.record_membership(ordinal, image_mask);
        if self.identity_cache_enabled {
            self.identity
                .lock()
                .insert(identity_key, (ordinal, image_mask, obj.clone()));
        }
        Ok(ordinal)
    }

    /// Freezes the cycle and builds write-ready metadata. Returns the
    /// largest single payload length for this type.
    pub fn prepare_for_write(&self) -> Result<usize, Error> {
        if self
            .phase
            .compare_exchange(
                PHASE_ACCEPTING,
                PHASE_WRITE_READY,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::protocol_misuse(format!(
                "prepare_for_write() for type '{}' while already write-ready",
                self.type_name
            )));
        }
        let max = self.ordinal_map.prepare_for_write();
        self.max_payload_len.store(max, Ordering::Release);
        Ok(max)
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len.load(Ordering::Acquire)
    }

    pub fn is_write_ready(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_WRITE_READY
    }

    /// Compacts the ordinal map against the union of all images' current
    /// membership, swaps the membership double buffer, clears the identity
    /// cache and re-opens the state for adds. Optionally swaps in a fresh
    /// schema when the type's field layout changed.
    pub fn prepare_for_next_cycle(&self, next_schema: Option<Schema>) -> Result<(), Error> {
        if self
            .phase
            .compare_exchange(
                PHASE_WRITE_READY,
                PHASE_ACCEPTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::protocol_misuse(format!(
                "prepare_for_next_cycle() for type '{}' without prepare_for_write()",
                self.type_name
            )));
        }

        let mut used = ImageBitSet::new();
        {
            let membership = self.membership.lock();
            for bits in &membership.current {
                used.or_with(bits);
            }
        }
        self.ordinal_map.compact(&used);

        {
            let mut membership = self.membership.lock();
            let membership = &mut *membership;
            std::mem::swap(&mut membership.current, &mut membership.previous);
            for bits in &mut membership.current {
                bits.clear();
            }
        }
        self.identity.lock().clear();

        if let Some(schema) = next_schema {
            let old = self.schema.swap(Arc::new(schema));
            *self.previous_schema.lock() = Some(old);
            // field layouts changed; pooled scratch must not keep the old
            // shape
            self.scratch.clear();
        }
        Ok(())
    }

    /// Current-cycle membership for one image.
    pub fn membership(&self, image: usize) -> ImageBitSet {
        self.membership.lock().current[image].clone()
    }

    /// Previous-cycle membership for one image.
    pub fn previous_membership(&self, image: usize) -> ImageBitSet {
        self.membership.lock().previous[image].clone()
    }

    /// Union of all images' current membership.
    pub fn membership_union(&self) -> ImageBitSet {
        let membership = self.membership.lock();
        let mut union = ImageBitSet::new();
        for bits in &membership.current {
            union.or_with(bits);
        }
        union
    }

    /// Image mask an ordinal currently belongs to.
    pub fn image_mask_of(&self, ordinal: u32) -> u64 {
        let membership = self.membership.lock();
        let mut mask = 0u64;
        for (image, bits) in membership.current.iter().enumerate() {
            if bits.get(ordinal) {
                mask |= 1u64 << image;
            }
        }
        mask
    }

    /// Persists ordinal map and membership so a restart can resume the
    /// delta chain.
    pub fn save(&self, w: &mut Writer) {
        self.ordinal_map.serialize(w);
        let membership = self.membership.lock();
        w.write_varuint64(membership.current.len() as u64);
        for bits in &membership.current {
            bits.serialize(w);
        }
        for bits in &membership.previous {
            bits.serialize(w);
        }
    }

    /// Restores persisted state. Only valid on a fresh state, before any
    /// adds of the first cycle.
    pub fn load(&self, r: &mut crate::buffer::Reader<'_>) -> Result<(), Error> {
        self.ordinal_map.load_from(r)?;
        let num_images = r.read_varuint64()? as usize;
        let mut membership = self.membership.lock();
        if num_images != membership.current.len() {
            return Err(Error::corrupt_stream(
                "persisted image count does not match engine configuration",
            ));
        }
        for bits in membership.current.iter_mut() {
            *bits = ImageBitSet::deserialize(r)?;
        }
        for bits in membership.previous.iter_mut() {
            *bits = ImageBitSet::deserialize(r)?;
        }
        Ok(())
    }
}
