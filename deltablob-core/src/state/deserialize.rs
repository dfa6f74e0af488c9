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

//! Read-side state for one type: a dense ordinal-indexed table of
//! deserialized objects, used to resolve object and collection references
//! while decoding snapshot and delta blobs.

use std::sync::Arc;

use crate::schema::Schema;
use crate::serializer::SharedObject;

#[derive(Default)]
pub struct TypeDeserializationState {
    /// Stream schema from the most recently decoded blob.
    schema: Option<Arc<Schema>>,
    objects: Vec<Option<SharedObject>>,
    population: usize,
}

impl TypeDeserializationState {
    pub fn new() -> TypeDeserializationState {
        TypeDeserializationState::default()
    }

    pub fn set_schema(&mut self, schema: Arc<Schema>) {
        self.schema = Some(schema);
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Installs the object decoded for `ordinal`, growing the table lazily.
    pub fn add(&mut self, ordinal: u32, obj: SharedObject) {
        let idx = ordinal as usize;
        if idx >= self.objects.len() {
            self.objects.resize(idx + 1, None);
        }
        if self.objects[idx].is_none() {
            self.population += 1;
        }
        self.objects[idx] = Some(obj);
    }

    pub fn remove(&mut self, ordinal: u32) {
        if let Some(slot) = self.objects.get_mut(ordinal as usize) {
            if slot.take().is_some() {
                self.population -= 1;
            }
        }
    }

    pub fn get(&self, ordinal: u32) -> Option<SharedObject> {
        self.objects.get(ordinal as usize)?.clone()
    }

    /// Number of live ordinals.
    pub fn population(&self) -> usize {
        self.population
    }

    /// All live `(ordinal, object)` pairs in ascending ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SharedObject)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|obj| (i as u32, obj)))
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.population = 0;
    }
}
