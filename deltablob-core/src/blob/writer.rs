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

//! Blob emission: snapshot, delta and reverse-delta writers.
//!
//! All writers require the engine to be write-ready (between
//! `prepare_for_write` and `prepare_for_next_cycle`), when membership is
//! frozen and the ordinal maps' dense emission indexes exist.
//!
//! Snapshot type block, after the common name + schema prefix:
//!
//! ```text
//! varuint ordinal space N
//! N entries, one per ordinal: varuint(len) + record, or the null byte
//!   for an ordinal not in this image
//! ```
//!
//! Delta type block:
//!
//! ```text
//! varuint changed count
//! per changed ordinal, ascending, delta-encoded against the previous
//! changed ordinal: varuint(ordinal delta), then varuint(len) + record
//! for an addition or the null byte for a removal
//! ```
//!
//! A reverse delta uses the same block layout with the roles of the
//! current and previous cycles swapped; applying it to the new snapshot
//! state rolls a consumer back to the previous cycle.

use std::io;

use tracing::debug;

use crate::buffer::Writer;
use crate::engine::StateEngine;
use crate::error::Error;

use super::{BlobHeader, BlobKind};

impl StateEngine {
    pub fn write_snapshot(&self, image: usize) -> Result<Vec<u8>, Error> {
        self.write_blob(BlobKind::Snapshot, image)
    }

    /// Delta from the previous cycle's image state to the current one.
    pub fn write_delta(&self, image: usize) -> Result<Vec<u8>, Error> {
        self.write_blob(BlobKind::Delta, image)
    }

    /// Delta from the current cycle's image state back to the previous one.
    pub fn write_reverse_delta(&self, image: usize) -> Result<Vec<u8>, Error> {
        self.write_blob(BlobKind::ReverseDelta, image)
    }

    pub fn write_snapshot_to<W: io::Write>(&self, image: usize, sink: &mut W) -> Result<(), Error> {
        sink.write_all(&self.write_snapshot(image)?)?;
        Ok(())
    }

    pub fn write_delta_to<W: io::Write>(&self, image: usize, sink: &mut W) -> Result<(), Error> {
        sink.write_all(&self.write_delta(image)?)?;
        Ok(())
    }

    pub fn write_reverse_delta_to<W: io::Write>(
        &self,
        image: usize,
        sink: &mut W,
    ) -> Result<(), Error> {
        sink.write_all(&self.write_reverse_delta(image)?)?;
        Ok(())
    }

    fn write_blob(&self, kind: BlobKind, image: usize) -> Result<Vec<u8>, Error> {
        if image >= self.num_images() {
            return Err(Error::protocol_misuse(format!(
                "image index {image} out of range"
            )));
        }
        let order = self.type_order();
        let mut w = Writer::new();
        BlobHeader {
            kind,
            image: image as u32,
            latest_version: self.latest_version(),
            tags: self.header_tags(),
            num_types: order.len() as u32,
        }
        .write(&mut w);

        for name in order {
            let entry = self.entry(&name)?;
            let state = &entry.ser_state;
            if !state.is_write_ready() {
                return Err(Error::protocol_misuse(format!(
                    "blob write for type '{name}' outside the write-ready phase"
                )));
            }
            w.write_utf8_string(&name);
            state.schema().serialize(&mut w);

            match kind {
                BlobKind::Snapshot => {
                    let membership = state.membership(image);
                    let space = state.ordinal_map().ordinal_space();
                    w.write_varuint32(space);
                    for ordinal in 0..space {
                        if !(membership.get(ordinal)
                            && state.ordinal_map().copy_record_to_writer(ordinal, &mut w))
                        {
                            w.write_null();
                        }
                    }
                }
                BlobKind::Delta | BlobKind::ReverseDelta => {
                    let current = state.membership(image);
                    let previous = state.previous_membership(image);
                    // adds come from the cycle the blob moves the consumer to
                    let target = match kind {
                        BlobKind::Delta => &current,
                        _ => &previous,
                    };
                    let changed = current.symmetric_difference(&previous);
                    w.write_varuint32(changed.len() as u32);
                    let mut last = 0u32;
                    for &ordinal in &changed {
                        w.write_varuint32(ordinal - last);
                        last = ordinal;
                        if !(target.get(ordinal)
                            && state.ordinal_map().copy_record_to_writer(ordinal, &mut w))
                        {
                            w.write_null();
                        }
                    }
                    debug!(
                        type_name = %name,
                        changed = changed.len(),
                        ?kind,
                        "wrote delta block"
                    );
                }
            }
        }
        Ok(w.into_vec())
    }
}
