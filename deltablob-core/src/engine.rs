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

//! The state engine: one instance per application object model.
//!
//! Owns the per-type serialization and deserialization states, fans the
//! cycle lifecycle out to them in dependency order, and carries the blob
//! header metadata. The application registers one [`TypeSerializer`] per
//! type up front; after registration the engine is shared (`Arc`) across
//! worker threads, which call [`StateEngine::add`] concurrently during the
//! accepting phase of each cycle.
//!
//! Cycle lifecycle:
//!
//! ```text
//! add* → prepare_for_write → write_snapshot/write_delta* → prepare_for_next_cycle
//! ```
//!
//! Lifecycle transitions must be driven by a single coordinating thread
//! with no `add` in flight; the engine enforces this only with defensive
//! phase checks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::buffer::{Reader, Writer};
use crate::error::Error;
use crate::record::RecordReader;
use crate::serializer::{
    OrdinalAssigner, OrdinalResolver, SharedObject, TypeSerializer,
};
use crate::state::{TypeDeserializationState, TypeSerializationState};
use crate::util::Spinlock;

pub(crate) struct TypeEntry {
    pub(crate) serializer: Spinlock<Arc<dyn TypeSerializer>>,
    pub(crate) ser_state: TypeSerializationState,
    pub(crate) deser_state: Spinlock<TypeDeserializationState>,
}

impl TypeEntry {
    pub(crate) fn serializer(&self) -> Arc<dyn TypeSerializer> {
        self.serializer.lock().clone()
    }
}

pub struct StateEngine {
    num_images: usize,
    pub(crate) types: FxHashMap<String, Arc<TypeEntry>>,
    registration_order: Vec<String>,
    pub(crate) header_tags: Spinlock<BTreeMap<String, String>>,
    pub(crate) latest_version: Spinlock<String>,
    /// Serializers staged by `stage_reconfiguration`, applied at the next
    /// cycle boundary.
    staged: Spinlock<FxHashMap<String, Arc<dyn TypeSerializer>>>,
    max_single_object_len: AtomicUsize,
    identity_cache: bool,
}

impl StateEngine {
    pub fn new(num_images: usize) -> StateEngine {
        assert!(num_images >= 1 && num_images <= 64, "1..=64 images");
        StateEngine {
            num_images,
            types: FxHashMap::default(),
            registration_order: Vec::new(),
            header_tags: Spinlock::new(BTreeMap::new()),
            latest_version: Spinlock::new(String::new()),
            staged: Spinlock::new(FxHashMap::default()),
            max_single_object_len: AtomicUsize::new(0),
            identity_cache: true,
        }
    }

    /// Disables the identity-based write cache (enabled by default). The
    /// cache short-circuits re-encoding of an object handle added
    /// unchanged in consecutive cycles; it is only sound when callers keep
    /// handles alive and treat held objects as immutable.
    pub fn identity_cache(mut self, enabled: bool) -> StateEngine {
        self.identity_cache = enabled;
        self
    }

    /// Registers a type. All registrations happen before the engine is
    /// shared; re-registering a name is a protocol-misuse error.
    pub fn register(&mut self, serializer: Arc<dyn TypeSerializer>) -> Result<(), Error> {
        let name = serializer.type_name().to_string();
        if self.types.contains_key(&name) {
            return Err(Error::protocol_misuse(format!(
                "type '{name}' registered twice"
            )));
        }
        let schema = serializer.schema();
        if schema.name() != name {
            return Err(Error::protocol_misuse(format!(
                "serializer for '{name}' built a schema named '{}'",
                schema.name()
            )));
        }
        let entry = TypeEntry {
            serializer: Spinlock::new(serializer),
            ser_state: TypeSerializationState::new(schema, self.num_images, self.identity_cache),
            deser_state: Spinlock::new(TypeDeserializationState::new()),
        };
        self.types.insert(name.clone(), Arc::new(entry));
        self.registration_order.push(name);
        Ok(())
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn set_header_tag(&self, key: &str, value: &str) {
        self.header_tags
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    pub fn header_tags(&self) -> BTreeMap<String, String> {
        self.header_tags.lock().clone()
    }

    pub fn set_latest_version(&self, version: &str) {
        *self.latest_version.lock() = version.to_string();
    }

    pub fn latest_version(&self) -> String {
        self.latest_version.lock().clone()
    }

    /// Global maximum single-object payload length across all types, as of
    /// the last `prepare_for_write`. Sizes streamed-decode lookahead
    /// windows.
    pub fn max_single_object_len(&self) -> usize {
        self.max_single_object_len.load(Ordering::Acquire)
    }

    pub(crate) fn entry(&self, type_name: &str) -> Result<&Arc<TypeEntry>, Error> {
        self.types
            .get(type_name)
            .ok_or_else(|| Error::unknown_type(type_name.to_string()))
    }

    /// Types in dependency order: a type referencing another through a
    /// reference field sorts after it. Registration order breaks ties and
    /// reference cycles are tolerated (the later record's dangling
    /// references decode as dropped values).
    pub(crate) fn type_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.types.len());
        let mut visited: FxHashMap<String, bool> = FxHashMap::default(); // false = in progress
        fn visit(
            engine: &StateEngine,
            name: &str,
            visited: &mut FxHashMap<String, bool>,
            order: &mut Vec<String>,
        ) {
            if visited.contains_key(name) {
                // done, or in progress (a reference cycle; break it here)
                return;
            }
            visited.insert(name.to_string(), false);
            if let Some(entry) = engine.types.get(name) {
                let schema = entry.ser_state.schema();
                for dep in schema.dependencies() {
                    if dep != name && engine.types.contains_key(dep) {
                        visit(engine, dep, visited, order);
                    }
                }
            }
            visited.insert(name.to_string(), true);
            order.push(name.to_string());
        }
        for name in &self.registration_order {
            visit(self, name, &mut visited, &mut order);
        }
        order
    }

    /// Adds one object (and, recursively, the objects it references) to the
    /// current cycle under the given image mask. Returns its ordinal.
    ///
    /// Safe to call from many threads concurrently during the accepting
    /// phase.
    pub fn add(&self, type_name: &str, obj: &SharedObject, image_mask: u64) -> Result<u32, Error> {
        let entry = self.entry(type_name)?;
        let serializer = entry.serializer();
        entry
            .ser_state
            .add(obj, image_mask, serializer.as_ref(), &EngineAssigner(self))
    }

    /// Freezes the cycle across all types and derives write-ready metadata.
    pub fn prepare_for_write(&self) -> Result<(), Error> {
        let mut max = 0usize;
        for name in self.type_order() {
            let entry = self.entry(&name)?;
            max = max.max(entry.ser_state.prepare_for_write()?);
        }
        self.max_single_object_len.store(max, Ordering::Release);
        debug!(max_object_len = max, "engine prepared for write");
        Ok(())
    }

    /// Stages a replacement serializer (typically with a changed schema)
    /// for an already-registered type; it takes effect at the next
    /// `prepare_for_next_cycle`.
    pub fn stage_reconfiguration(
        &self,
        serializer: Arc<dyn TypeSerializer>,
    ) -> Result<(), Error> {
        let name = serializer.type_name().to_string();
        if !self.types.contains_key(&name) {
            return Err(Error::unknown_type(name));
        }
        self.staged.lock().insert(name, serializer);
        Ok(())
    }

    /// Compacts every type against its live membership, swaps membership
    /// double buffers, applies staged reconfigurations and re-opens the
    /// engine for adds.
    pub fn prepare_for_next_cycle(&self) -> Result<(), Error> {
        let staged: FxHashMap<String, Arc<dyn TypeSerializer>> =
            std::mem::take(&mut *self.staged.lock());
        for name in self.type_order() {
            let entry = self.entry(&name)?;
            match staged.get(&name) {
                Some(serializer) => {
                    let schema = serializer.schema();
                    entry.ser_state.prepare_for_next_cycle(Some(schema))?;
                    *entry.serializer.lock() = serializer.clone();
                }
                None => entry.ser_state.prepare_for_next_cycle(None)?,
            }
        }
        info!("engine advanced to next cycle");
        Ok(())
    }

    /// Objects currently decoded for `type_name`, ascending by ordinal.
    pub fn decoded_objects(&self, type_name: &str) -> Result<Vec<SharedObject>, Error> {
        let entry = self.entry(type_name)?;
        let state = entry.deser_state.lock();
        Ok(state.iter().map(|(_, obj)| obj.clone()).collect())
    }

    /// The decoded object for one ordinal of `type_name`.
    pub fn decoded_object(&self, type_name: &str, ordinal: u32) -> Result<Option<SharedObject>, Error> {
        let entry = self.entry(type_name)?;
        Ok(entry.deser_state.lock().get(ordinal))
    }

    /// Persists every type's ordinal map and membership so a restarted
    /// process can continue the delta chain. Call between cycles with no
    /// adds in flight.
    pub fn save_state(&self, w: &mut Writer) {
        let order = self.type_order();
        w.write_varuint64(order.len() as u64);
        for name in order {
            let entry = &self.types[&name];
            w.write_utf8_string(&name);
            entry.ser_state.save(w);
        }
    }

    pub fn load_state(&self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.read_varuint64()? as usize;
        for _ in 0..count {
            let name = r.read_utf8_string()?;
            let entry = self.entry(&name)?;
            entry.ser_state.load(r)?;
        }
        Ok(())
    }

    /// Copies the whole serialization state of this engine into `dest`,
    /// re-exploding serialized records into objects and re-adding them
    /// (used for warm failover / engine replacement).
    ///
    /// Requires this engine to be write-ready. Worker threads fan out over
    /// per-type ordinal ranges and join before this returns. Types listed
    /// in `ignore`, or not registered at the destination, are skipped.
    pub fn copy_to(&self, dest: &StateEngine, ignore: &[&str]) -> Result<(), Error> {
        // decode pass: dependency order so references resolve
        let mut decoded: FxHashMap<String, Vec<(u32, SharedObject, u64)>> = FxHashMap::default();
        let resolver_tables = Spinlock::new(FxHashMap::<String, FxHashMap<u32, SharedObject>>::default());

        for name in self.type_order() {
            if ignore.contains(&name.as_str()) || !dest.is_registered(&name) {
                debug!(type_name = %name, "copy_to: skipping type");
                continue;
            }
            let entry = self.entry(&name)?;
            let schema = entry.ser_state.schema();
            let serializer = entry.serializer();
            let union = entry.ser_state.membership_union();
            let mut objects = Vec::with_capacity(union.cardinality());
            for ordinal in union.ones() {
                let Some(payload) = entry.ser_state.ordinal_map().payload(ordinal) else {
                    continue;
                };
                let resolver = TableResolver(&resolver_tables);
                let obj = {
                    let view = RecordReader::parse(&schema, &payload, &resolver)?;
                    match serializer.deserialize(&view) {
                        Ok(obj) => obj,
                        Err(_) => continue, // unresolvable record: dropped
                    }
                };
                resolver_tables
                    .lock()
                    .entry(name.clone())
                    .or_default()
                    .insert(ordinal, obj.clone());
                let mask = entry.ser_state.image_mask_of(ordinal);
                objects.push((ordinal, obj, mask));
            }
            decoded.insert(name, objects);
        }

        // re-add pass: parallel per-type, per-ordinal-range workers with
        // join-before-return semantics
        const CHUNK: usize = 1024;
        std::thread::scope(|scope| -> Result<(), Error> {
            let mut handles = Vec::new();
            for (name, objects) in &decoded {
                for chunk in objects.chunks(CHUNK) {
                    let name = name.as_str();
                    handles.push(scope.spawn(move || -> Result<(), Error> {
                        for (_, obj, mask) in chunk {
                            dest.add(name, obj, *mask)?;
                        }
                        Ok(())
                    }));
                }
            }
            for handle in handles {
                handle.join().expect("copy worker panicked")?;
            }
            Ok(())
        })?;
        info!(types = decoded.len(), "copied engine state");
        Ok(())
    }
}

/// Ordinal assignment for nested objects: recurse into `StateEngine::add`
/// under the parent's image mask.
struct EngineAssigner<'a>(&'a StateEngine);

impl OrdinalAssigner for EngineAssigner<'_> {
    fn assign(&self, type_name: &str, obj: &SharedObject, image_mask: u64) -> Result<u32, Error> {
        self.0.add(type_name, obj, image_mask)
    }
}

/// Resolver over the engine's deserialization states, used while decoding
/// blobs.
pub(crate) struct EngineResolver<'a>(pub(crate) &'a StateEngine);

impl OrdinalResolver for EngineResolver<'_> {
    fn resolve(&self, type_name: &str, ordinal: u32) -> Option<SharedObject> {
        let entry = self.0.types.get(type_name)?;
        let state = entry.deser_state.lock();
        state.get(ordinal)
    }
}

/// Resolver over the transient decode tables built during `copy_to`.
struct TableResolver<'a>(&'a Spinlock<FxHashMap<String, FxHashMap<u32, SharedObject>>>);

impl OrdinalResolver for TableResolver<'_> {
    fn resolve(&self, type_name: &str, ordinal: u32) -> Option<SharedObject> {
        self.0.lock().get(type_name)?.get(&ordinal).cloned()
    }
}
