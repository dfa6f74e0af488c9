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

//! Serialization-record scratch space and the binary `RecordSink`.
//!
//! A [`FieldScratch`] holds one growable byte buffer per schema field.
//! Serializers write fields in any order; `concat` then emits them in
//! declaration order, inserting the VarInt byte-length prefix for
//! variable-length fields, producing the contiguous byte sequence that is
//! one object instance on the wire.
//!
//! Scratch instances are pooled per type and per thread (see
//! `crate::pool`); they are reset on borrow and never shared mid-use.

use crate::buffer::Writer;
use crate::error::Error;
use crate::schema::{FieldType, Schema};
use crate::serializer::{OrdinalAssigner, RecordSink, SharedObject};

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldState {
    /// Never written this record; encoded as null.
    Unset,
    /// Explicitly written as null.
    Null,
    /// Buffer holds the field payload.
    Set,
}

pub struct FieldScratch {
    states: Vec<FieldState>,
    buffers: Vec<Writer>,
}

impl FieldScratch {
    pub fn new(num_fields: usize) -> FieldScratch {
        FieldScratch {
            states: vec![FieldState::Unset; num_fields],
            buffers: (0..num_fields).map(|_| Writer::new()).collect(),
        }
    }

    /// Resets for a new record, adjusting to the schema's field count
    /// (buffers keep their capacity).
    pub fn reset(&mut self, num_fields: usize) {
        if self.buffers.len() != num_fields {
            self.buffers.resize_with(num_fields, Writer::new);
            self.states.resize(num_fields, FieldState::Unset);
        }
        for state in &mut self.states {
            *state = FieldState::Unset;
        }
        for buffer in &mut self.buffers {
            buffer.reset();
        }
    }

    fn mark(&mut self, pos: usize, state: FieldState) -> &mut Writer {
        self.states[pos] = state;
        let buffer = &mut self.buffers[pos];
        buffer.reset();
        buffer
    }

    /// Emits all fields in declaration order into `out`.
    ///
    /// Self-delimiting fields (fixed-width values, VarInts, strings) are
    /// appended raw; length-prefixed fields (bytes, list, set, map) get a
    /// VarInt byte-length prefix. Unset fields encode as null so a schema
    /// can grow fields without breaking old serializers.
    pub fn concat(&self, schema: &Schema, out: &mut Writer) {
        for (pos, field) in schema.fields().iter().enumerate() {
            let set = self.states[pos] == FieldState::Set;
            match field.field_type {
                FieldType::Float => {
                    if set {
                        out.write_bytes(self.buffers[pos].as_slice());
                    } else {
                        out.write_float(None);
                    }
                }
                FieldType::Double => {
                    if set {
                        out.write_bytes(self.buffers[pos].as_slice());
                    } else {
                        out.write_double(None);
                    }
                }
                FieldType::Boolean
                | FieldType::Int
                | FieldType::Long
                | FieldType::Object
                | FieldType::String => {
                    if set {
                        out.write_bytes(self.buffers[pos].as_slice());
                    } else {
                        out.write_null();
                    }
                }
                FieldType::Bytes | FieldType::List | FieldType::Set | FieldType::Map => {
                    if set {
                        let payload = self.buffers[pos].as_slice();
                        out.write_varuint64(payload.len() as u64);
                        out.write_bytes(payload);
                    } else {
                        out.write_null();
                    }
                }
            }
        }
    }
}

/// Binary implementation of [`RecordSink`] for one record of one type.
///
/// Nested objects reached through reference fields are handed to the
/// `OrdinalAssigner` (the engine), which serializes them recursively under
/// the same image mask and returns the ordinal this record embeds.
pub struct BinaryRecordSink<'a> {
    schema: &'a Schema,
    scratch: &'a mut FieldScratch,
    assigner: &'a dyn OrdinalAssigner,
    image_mask: u64,
}

impl<'a> BinaryRecordSink<'a> {
    pub fn new(
        schema: &'a Schema,
        scratch: &'a mut FieldScratch,
        assigner: &'a dyn OrdinalAssigner,
        image_mask: u64,
    ) -> BinaryRecordSink<'a> {
        scratch.reset(schema.num_fields());
        BinaryRecordSink {
            schema,
            scratch,
            assigner,
            image_mask,
        }
    }

    fn position(&self, field: &str, expected: FieldType) -> Result<usize, Error> {
        let pos = self.schema.require_position(field)?;
        let actual = self.schema.field(pos).field_type;
        if actual != expected {
            return Err(Error::protocol_misuse(format!(
                "field '{field}' of type '{}' is {actual:?}, written as {expected:?}",
                self.schema.name()
            )));
        }
        Ok(pos)
    }

    fn sub_type(&self, pos: usize) -> Result<&'a str, Error> {
        self.schema.field(pos).sub_type.as_deref().ok_or_else(|| {
            Error::protocol_misuse(format!(
                "reference field '{}' has no declared sub-type",
                self.schema.field(pos).name
            ))
        })
    }

    fn assign(&self, type_name: &str, obj: &SharedObject) -> Result<u32, Error> {
        self.assigner.assign(type_name, obj, self.image_mask)
    }
}

impl RecordSink for BinaryRecordSink<'_> {
    fn write_boolean(&mut self, field: &str, value: Option<bool>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Boolean)?;
        match value {
            Some(v) => self.scratch.mark(pos, FieldState::Set).write_u8(v as u8),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_int(&mut self, field: &str, value: Option<i32>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Int)?;
        match value {
            Some(v) => self
                .scratch
                .mark(pos, FieldState::Set)
                .write_varint32(v),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_long(&mut self, field: &str, value: Option<i64>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Long)?;
        match value {
            Some(v) => self
                .scratch
                .mark(pos, FieldState::Set)
                .write_varint64(v),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_float(&mut self, field: &str, value: Option<f32>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Float)?;
        match value {
            Some(v) => self.scratch.mark(pos, FieldState::Set).write_float(Some(v)),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_double(&mut self, field: &str, value: Option<f64>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Double)?;
        match value {
            Some(v) => self
                .scratch
                .mark(pos, FieldState::Set)
                .write_double(Some(v)),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_string(&mut self, field: &str, value: Option<&str>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::String)?;
        match value {
            Some(v) => self
                .scratch
                .mark(pos, FieldState::Set)
                .write_utf16_string(v),
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_bytes(&mut self, field: &str, value: Option<&[u8]>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Bytes)?;
        match value {
            Some(v) => {
                self.scratch.mark(pos, FieldState::Set).write_bytes(v);
            }
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_object(&mut self, field: &str, value: Option<&SharedObject>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Object)?;
        match value {
            Some(obj) => {
                let ordinal = self.assign(self.sub_type(pos)?, obj)?;
                self.scratch
                    .mark(pos, FieldState::Set)
                    .write_varuint32(ordinal);
            }
            None => {
                self.scratch.mark(pos, FieldState::Null);
            }
        }
        Ok(())
    }

    fn write_list(
        &mut self,
        field: &str,
        value: Option<&[Option<SharedObject>]>,
    ) -> Result<(), Error> {
        let pos = self.position(field, FieldType::List)?;
        let Some(elements) = value else {
            self.scratch.mark(pos, FieldState::Null);
            return Ok(());
        };
        let element_type = self.sub_type(pos)?;
        // encode through a local buffer: element ordinals must be assigned
        // (which may recurse into this type's pool) before the scratch
        // buffer is touched
        let mut ordinals = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Some(obj) => ordinals.push(Some(self.assign(element_type, obj)?)),
                None => ordinals.push(None),
            }
        }
        let buffer = self.scratch.mark(pos, FieldState::Set);
        for ordinal in ordinals {
            buffer.write_nullable_varuint32(ordinal);
        }
        Ok(())
    }

    fn write_set(&mut self, field: &str, value: Option<&[SharedObject]>) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Set)?;
        let Some(elements) = value else {
            self.scratch.mark(pos, FieldState::Null);
            return Ok(());
        };
        let element_type = self.sub_type(pos)?;
        let mut ordinals = Vec::with_capacity(elements.len());
        for element in elements {
            ordinals.push(self.assign(element_type, element)?);
        }
        // sorted + delta-encoded: successive differences keep the varints
        // small
        ordinals.sort_unstable();
        ordinals.dedup();
        let buffer = self.scratch.mark(pos, FieldState::Set);
        let mut previous = 0u32;
        for ordinal in ordinals {
            buffer.write_varuint32(ordinal - previous);
            previous = ordinal;
        }
        Ok(())
    }

    fn write_map(
        &mut self,
        field: &str,
        value: Option<&[(SharedObject, SharedObject)]>,
    ) -> Result<(), Error> {
        let pos = self.position(field, FieldType::Map)?;
        let Some(entries) = value else {
            self.scratch.mark(pos, FieldState::Null);
            return Ok(());
        };
        let field_def = self.schema.field(pos);
        let key_type = field_def
            .key_type
            .clone()
            .ok_or_else(|| Error::protocol_misuse("map field has no declared key type"))?;
        let value_type = field_def
            .value_type
            .clone()
            .ok_or_else(|| Error::protocol_misuse("map field has no declared value type"))?;
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, val) in entries {
            let key_ordinal = self.assign(&key_type, key)?;
            let value_ordinal = self.assign(&value_type, val)?;
            pairs.push((key_ordinal, value_ordinal));
        }
        // sorted by value ordinal; values delta-encoded, keys written plain
        pairs.sort_unstable_by_key(|&(k, v)| (v, k));
        let buffer = self.scratch.mark(pos, FieldState::Set);
        let mut previous_value = 0u32;
        for (key_ordinal, value_ordinal) in pairs {
            buffer.write_varuint32(key_ordinal);
            buffer.write_varuint32(value_ordinal - previous_value);
            previous_value = value_ordinal;
        }
        Ok(())
    }
}
