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

//! Deserialization record: field-offset computation over one record's
//! bytes.
//!
//! Records carry no per-field offset table; offsets are recovered by
//! walking fields in declaration order, advancing by each field's encoded
//! length. The walk happens once at construction; afterwards every field is
//! a byte-range lookup.
//!
//! The schema used here is the *stream* schema (it travels in the blob), so
//! a reader can walk records written by an older or newer writer. Fields
//! the stream lacks read as `None`.

use crate::buffer::{count_varints, Reader, NULL_BYTE};
use crate::error::Error;
use crate::schema::{FieldType, Schema};
use crate::serializer::{OrdinalResolver, RecordView, SharedObject};

pub struct RecordReader<'a> {
    schema: &'a Schema,
    data: &'a [u8],
    spans: Vec<(u32, u32)>,
    resolver: &'a dyn OrdinalResolver,
}

impl<'a> RecordReader<'a> {
    /// Walks `data` (exactly one record) computing per-field spans.
    pub fn parse(
        schema: &'a Schema,
        data: &'a [u8],
        resolver: &'a dyn OrdinalResolver,
    ) -> Result<RecordReader<'a>, Error> {
        let mut reader = Reader::new(data);
        let mut spans = Vec::with_capacity(schema.num_fields());
        for field in schema.fields() {
            let start = reader.cursor();
            match field.field_type {
                FieldType::Boolean => reader.skip(1)?,
                FieldType::Float => reader.skip(4)?,
                FieldType::Double => reader.skip(8)?,
                FieldType::Int | FieldType::Long | FieldType::Object => reader.skip_varint()?,
                FieldType::String => {
                    match reader.read_nullable_varuint64()? {
                        Some(chars) => {
                            for _ in 0..chars {
                                reader.skip_varint()?;
                            }
                        }
                        None => {}
                    }
                }
                FieldType::Bytes | FieldType::List | FieldType::Set | FieldType::Map => {
                    match reader.read_nullable_varuint64()? {
                        Some(len) => reader.skip(len as usize)?,
                        None => {}
                    }
                }
            }
            spans.push((start as u32, reader.cursor() as u32));
        }
        if reader.remaining() != 0 {
            return Err(Error::corrupt_stream("trailing bytes after last field"));
        }
        Ok(RecordReader {
            schema,
            data,
            spans,
            resolver,
        })
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Field span if the stream schema declares `field` with the expected
    /// type; `None` means "read as null" (schema evolution).
    fn span(&self, field: &str, expected: FieldType) -> Option<&'a [u8]> {
        let pos = self.schema.position(field)?;
        if self.schema.field(pos).field_type != expected {
            return None;
        }
        let (start, end) = self.spans[pos];
        Some(&self.data[start as usize..end as usize])
    }

    fn sub_type(&self, field: &str) -> Option<&str> {
        let pos = self.schema.position(field)?;
        self.schema.field(pos).sub_type.as_deref()
    }

    fn resolve(&self, type_name: &str, ordinal: u32) -> Option<SharedObject> {
        self.resolver.resolve(type_name, ordinal)
    }
}

impl RecordView for RecordReader<'_> {
    fn read_boolean(&self, field: &str) -> Result<Option<bool>, Error> {
        let Some(span) = self.span(field, FieldType::Boolean) else {
            return Ok(None);
        };
        match span[0] {
            0 => Ok(Some(false)),
            1 => Ok(Some(true)),
            NULL_BYTE => Ok(None),
            other => Err(Error::corrupt_stream(format!(
                "invalid boolean byte {other:#04x}"
            ))),
        }
    }

    fn read_int(&self, field: &str) -> Result<Option<i32>, Error> {
        let Some(span) = self.span(field, FieldType::Int) else {
            return Ok(None);
        };
        Reader::new(span).read_nullable_varint32()
    }

    fn read_long(&self, field: &str) -> Result<Option<i64>, Error> {
        let Some(span) = self.span(field, FieldType::Long) else {
            return Ok(None);
        };
        Reader::new(span).read_nullable_varint64()
    }

    fn read_float(&self, field: &str) -> Result<Option<f32>, Error> {
        let Some(span) = self.span(field, FieldType::Float) else {
            return Ok(None);
        };
        Reader::new(span).read_float()
    }

    fn read_double(&self, field: &str) -> Result<Option<f64>, Error> {
        let Some(span) = self.span(field, FieldType::Double) else {
            return Ok(None);
        };
        Reader::new(span).read_double()
    }

    fn read_string(&self, field: &str) -> Result<Option<String>, Error> {
        let Some(span) = self.span(field, FieldType::String) else {
            return Ok(None);
        };
        if span[0] == NULL_BYTE {
            return Ok(None);
        }
        Reader::new(span).read_utf16_string().map(Some)
    }

    fn read_bytes(&self, field: &str) -> Result<Option<Vec<u8>>, Error> {
        let Some(span) = self.span(field, FieldType::Bytes) else {
            return Ok(None);
        };
        if span[0] == NULL_BYTE {
            return Ok(None);
        }
        let mut reader = Reader::new(span);
        let len = reader.read_varuint64()? as usize;
        Ok(Some(reader.read_bytes(len)?.to_vec()))
    }

    fn read_object(&self, field: &str) -> Result<Option<SharedObject>, Error> {
        let Some(span) = self.span(field, FieldType::Object) else {
            return Ok(None);
        };
        let Some(ordinal) = Reader::new(span).read_nullable_varuint32()? else {
            return Ok(None);
        };
        let Some(type_name) = self.sub_type(field) else {
            return Ok(None);
        };
        // unresolvable references read as null rather than failing the record
        Ok(self.resolve(type_name, ordinal))
    }

    fn read_list(&self, field: &str) -> Result<Option<Vec<Option<SharedObject>>>, Error> {
        let Some(span) = self.span(field, FieldType::List) else {
            return Ok(None);
        };
        if span[0] == NULL_BYTE {
            return Ok(None);
        }
        let mut reader = Reader::new(span);
        let len = reader.read_varuint64()? as usize;
        let payload = reader.read_bytes(len)?;
        let Some(type_name) = self.sub_type(field) else {
            return Ok(Some(Vec::new()));
        };
        let count = count_varints(payload);
        let mut elements = Vec::with_capacity(count);
        let mut payload_reader = Reader::new(payload);
        for _ in 0..count {
            match payload_reader.read_nullable_varuint32()? {
                // explicit nulls are preserved; unresolvable elements are
                // dropped from the collection
                None => elements.push(None),
                Some(ordinal) => {
                    if let Some(obj) = self.resolve(type_name, ordinal) {
                        elements.push(Some(obj));
                    }
                }
            }
        }
        Ok(Some(elements))
    }

    fn read_set(&self, field: &str) -> Result<Option<Vec<SharedObject>>, Error> {
        let Some(span) = self.span(field, FieldType::Set) else {
            return Ok(None);
        };
        if span[0] == NULL_BYTE {
            return Ok(None);
        }
        let mut reader = Reader::new(span);
        let len = reader.read_varuint64()? as usize;
        let payload = reader.read_bytes(len)?;
        let Some(type_name) = self.sub_type(field) else {
            return Ok(Some(Vec::new()));
        };
        let count = count_varints(payload);
        let mut elements = Vec::with_capacity(count);
        let mut payload_reader = Reader::new(payload);
        let mut previous = 0u32;
        for _ in 0..count {
            let delta = payload_reader.read_varuint32()?;
            let ordinal = previous + delta;
            previous = ordinal;
            if let Some(obj) = self.resolve(type_name, ordinal) {
                elements.push(obj);
            }
        }
        Ok(Some(elements))
    }

    fn read_map(&self, field: &str) -> Result<Option<Vec<(SharedObject, SharedObject)>>, Error> {
        let Some(span) = self.span(field, FieldType::Map) else {
            return Ok(None);
        };
        if span[0] == NULL_BYTE {
            return Ok(None);
        }
        let pos = match self.schema.position(field) {
            Some(p) => p,
            None => return Ok(None),
        };
        let field_def = self.schema.field(pos);
        let (Some(key_type), Some(value_type)) =
            (field_def.key_type.as_deref(), field_def.value_type.as_deref())
        else {
            return Ok(Some(Vec::new()));
        };
        let mut reader = Reader::new(span);
        let len = reader.read_varuint64()? as usize;
        let payload = reader.read_bytes(len)?;
        let count = count_varints(payload) / 2;
        let mut entries = Vec::with_capacity(count);
        let mut payload_reader = Reader::new(payload);
        let mut previous_value = 0u32;
        for _ in 0..count {
            let key_ordinal = payload_reader.read_varuint32()?;
            let value_delta = payload_reader.read_varuint32()?;
            let value_ordinal = previous_value + value_delta;
            previous_value = value_ordinal;
            let key = self.resolve(key_type, key_ordinal);
            let value = self.resolve(value_type, value_ordinal);
            // an entry survives only if both sides materialize
            if let (Some(key), Some(value)) = (key, value) {
                entries.push((key, value));
            }
        }
        Ok(Some(entries))
    }
}
