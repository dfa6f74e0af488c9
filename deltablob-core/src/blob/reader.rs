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

//! Blob consumption: decodes snapshot and delta blobs into the engine's
//! per-type deserialization states.
//!
//! Decoding follows stream order, which the writer arranged so that
//! referenced types come before referencing types; an object reference is
//! resolved against whatever the target type's table holds at that point.
//! Type blocks for types this engine never registered are skipped (the
//! stream schema makes every block self-delimiting).

use std::sync::Arc;

use tracing::warn;

use crate::buffer::{Reader, NULL_BYTE};
use crate::engine::{EngineResolver, StateEngine};
use crate::error::Error;
use crate::record::RecordReader;
use crate::schema::Schema;

use super::{BlobHeader, BlobKind};

/// Skips one snapshot/delta record entry (either the null byte or a
/// length-prefixed record).
fn skip_record(r: &mut Reader<'_>) -> Result<(), Error> {
    if r.peek_u8()? == NULL_BYTE {
        r.skip(1)
    } else {
        let len = r.read_varuint64()? as usize;
        r.skip(len)
    }
}

impl StateEngine {
    /// Replaces all deserialization state with the snapshot's population.
    pub fn read_snapshot(&self, bytes: &[u8]) -> Result<BlobHeader, Error> {
        let mut r = Reader::new(bytes);
        let header = BlobHeader::read(&mut r)?;
        if header.kind != BlobKind::Snapshot {
            return Err(Error::protocol_misuse(
                "read_snapshot() on a non-snapshot blob",
            ));
        }
        for _ in 0..header.num_types {
            let name = r.read_utf8_string()?;
            let schema = Arc::new(Schema::deserialize(&mut r)?);
            let space = r.read_varuint32()?;
            let Some(entry) = self.types.get(&name) else {
                warn!(type_name = %name, "skipping unregistered type in snapshot");
                for _ in 0..space {
                    skip_record(&mut r)?;
                }
                continue;
            };
            {
                let mut deser = entry.deser_state.lock();
                deser.clear();
                deser.set_schema(schema.clone());
            }
            let serializer = entry.serializer();
            for ordinal in 0..space {
                if r.peek_u8()? == NULL_BYTE {
                    r.skip(1)?;
                    continue;
                }
                let len = r.read_varuint64()? as usize;
                let payload = r.read_bytes(len)?;
                let resolver = EngineResolver(self);
                let obj = {
                    let view = RecordReader::parse(&schema, payload, &resolver)?;
                    match serializer.deserialize(&view) {
                        Ok(obj) => obj,
                        Err(Error::Unresolvable(reason)) => {
                            // unresolvable at record top level drops the
                            // record, not the blob
                            warn!(type_name = %name, ordinal, %reason, "dropping unresolvable record");
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                };
                entry.deser_state.lock().add(ordinal, obj);
            }
        }
        if r.remaining() != 0 {
            return Err(Error::corrupt_stream("trailing bytes after last type block"));
        }
        Ok(header)
    }

    /// Applies a delta (or reverse-delta) blob on top of the current
    /// deserialization state.
    pub fn read_delta(&self, bytes: &[u8]) -> Result<BlobHeader, Error> {
        let mut r = Reader::new(bytes);
        let header = BlobHeader::read(&mut r)?;
        if header.kind == BlobKind::Snapshot {
            return Err(Error::protocol_misuse("read_delta() on a snapshot blob"));
        }
        for _ in 0..header.num_types {
            let name = r.read_utf8_string()?;
            let schema = Arc::new(Schema::deserialize(&mut r)?);
            let changed = r.read_varuint32()?;
            let Some(entry) = self.types.get(&name) else {
                warn!(type_name = %name, "skipping unregistered type in delta");
                for _ in 0..changed {
                    r.skip_varint()?;
                    skip_record(&mut r)?;
                }
                continue;
            };
            entry.deser_state.lock().set_schema(schema.clone());
            let serializer = entry.serializer();
            let mut last = 0u32;
            for _ in 0..changed {
                let ordinal = last + r.read_varuint32()?;
                last = ordinal;
                if r.peek_u8()? == NULL_BYTE {
                    r.skip(1)?;
                    entry.deser_state.lock().remove(ordinal);
                    continue;
                }
                let len = r.read_varuint64()? as usize;
                let payload = r.read_bytes(len)?;
                let resolver = EngineResolver(self);
                let obj = {
                    let view = RecordReader::parse(&schema, payload, &resolver)?;
                    match serializer.deserialize(&view) {
                        Ok(obj) => obj,
                        Err(Error::Unresolvable(reason)) => {
                            // the ordinal's old occupant is stale either way
                            warn!(type_name = %name, ordinal, %reason, "dropping unresolvable record");
                            entry.deser_state.lock().remove(ordinal);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                };
                entry.deser_state.lock().add(ordinal, obj);
            }
        }
        if r.remaining() != 0 {
            return Err(Error::corrupt_stream("trailing bytes after last type block"));
        }
        Ok(header)
    }
}
