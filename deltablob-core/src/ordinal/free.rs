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

use crate::buffer::{Reader, Writer};
use crate::error::Error;

/// Tracker of reusable ordinals.
///
/// Reclaimed ordinals are handed out most-recently-freed first; once the
/// pool is empty, fresh ordinals are assigned monotonically. Every freed
/// ordinal is therefore reassigned to new content before any
/// never-yet-assigned ordinal is used, which keeps the ordinal space (and
/// the membership bitsets indexed by it) dense.
#[derive(Default, Debug, Clone)]
pub struct FreeOrdinalPool {
    free: Vec<u32>,
    next: u32,
}

impl FreeOrdinalPool {
    pub fn new() -> FreeOrdinalPool {
        FreeOrdinalPool::default()
    }

    pub fn next(&mut self) -> u32 {
        match self.free.pop() {
            Some(ordinal) => ordinal,
            None => {
                let ordinal = self.next;
                self.next += 1;
                ordinal
            }
        }
    }

    pub fn free(&mut self, ordinal: u32) {
        self.free.push(ordinal);
    }

    /// Marks `ordinal` as externally assigned so it is never handed out.
    /// Used when pre-seeding a map with known assignments.
    pub fn reserve_through(&mut self, ordinal: u32) {
        if ordinal >= self.next {
            self.next = ordinal + 1;
        }
        self.free.retain(|&o| o != ordinal);
    }

    /// Highest ordinal ever assigned plus one.
    pub fn high_water_mark(&self) -> u32 {
        self.next
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_varuint32(self.next);
        w.write_varuint64(self.free.len() as u64);
        for &ordinal in &self.free {
            w.write_varuint32(ordinal);
        }
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<FreeOrdinalPool, Error> {
        let next = r.read_varuint32()?;
        let count = r.read_varuint64()? as usize;
        let mut free = Vec::with_capacity(count);
        for _ in 0..count {
            free.push(r.read_varuint32()?);
        }
        Ok(FreeOrdinalPool { free, next })
    }
}
