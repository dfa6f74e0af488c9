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

//! Schema: an ordered, named list of typed fields for one object type.
//!
//! Field positions are stable for the lifetime of a schema instance and the
//! name→position table is built once at construction, so lookups during
//! encode are a probe or two with no locking. Schemas are immutable after
//! construction; a type whose layout changes between cycles gets a fresh
//! schema swapped in at the cycle boundary while the previous one is
//! retained for mid-flight readers.

use std::hash::{Hash, Hasher};

use num_enum::TryFromPrimitive;
use rustc_hash::FxHasher;

use crate::buffer::{Reader, Writer};
use crate::error::Error;

/// Wire codes for field types. Codes are part of the blob format; do not
/// renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Object = 0,
    Boolean = 1,
    Int = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    String = 6,
    Bytes = 7,
    List = 8,
    Set = 9,
    Map = 10,
}

impl FieldType {
    /// Fixed encoded length in bytes, if this type has one.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            FieldType::Boolean => Some(1),
            FieldType::Float => Some(4),
            FieldType::Double => Some(8),
            _ => None,
        }
    }

    /// Whether the field references other serialized objects by ordinal.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            FieldType::Object | FieldType::List | FieldType::Set | FieldType::Map
        )
    }
}

/// One field of a schema.
///
/// `sub_type` names the referenced type for Object/List/Set fields;
/// `key_type`/`value_type` name the entry types for Map fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub sub_type: Option<String>,
    pub key_type: Option<String>,
    pub value_type: Option<String>,
}

impl FieldDef {
    pub fn scalar(name: &str, field_type: FieldType) -> FieldDef {
        debug_assert!(!field_type.is_reference());
        FieldDef {
            name: name.to_string(),
            field_type,
            sub_type: None,
            key_type: None,
            value_type: None,
        }
    }

    pub fn object(name: &str, sub_type: &str) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type: FieldType::Object,
            sub_type: Some(sub_type.to_string()),
            key_type: None,
            value_type: None,
        }
    }

    pub fn list(name: &str, element_type: &str) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type: FieldType::List,
            sub_type: Some(element_type.to_string()),
            key_type: None,
            value_type: None,
        }
    }

    pub fn set(name: &str, element_type: &str) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type: FieldType::Set,
            sub_type: Some(element_type.to_string()),
            key_type: None,
            value_type: None,
        }
    }

    pub fn map(name: &str, key_type: &str, value_type: &str) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type: FieldType::Map,
            sub_type: None,
            key_type: Some(key_type.to_string()),
            value_type: Some(value_type.to_string()),
        }
    }

    /// Type names this field depends on.
    pub fn referenced_types(&self) -> impl Iterator<Item = &str> {
        self.sub_type
            .iter()
            .chain(self.key_type.iter())
            .chain(self.value_type.iter())
            .map(|s| s.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDef>,
    // open-addressed name→position table, ~10/7 of field count, never resized
    positions: Vec<i32>,
}

impl Schema {
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Schema {
        let table_len = (fields.len() * 10 / 7 + 1).max(1);
        let mut positions = vec![-1i32; table_len];
        for (pos, field) in fields.iter().enumerate() {
            let mut idx = Self::name_hash(&field.name) as usize % table_len;
            while positions[idx] >= 0 {
                idx = (idx + 1) % table_len;
            }
            positions[idx] = pos as i32;
        }
        Schema {
            name: name.to_string(),
            fields,
            positions,
        }
    }

    fn name_hash(name: &str) -> u32 {
        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        let h = hasher.finish();
        (h ^ (h >> 32)) as u32
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, pos: usize) -> &FieldDef {
        &self.fields[pos]
    }

    /// Position of `name`, or `None` when the schema has no such field.
    pub fn position(&self, name: &str) -> Option<usize> {
        let table_len = self.positions.len();
        let mut idx = Self::name_hash(name) as usize % table_len;
        loop {
            let pos = self.positions[idx];
            if pos < 0 {
                return None;
            }
            if self.fields[pos as usize].name == name {
                return Some(pos as usize);
            }
            idx = (idx + 1) % table_len;
        }
    }

    /// Position of `name`, or a protocol-misuse error naming the type.
    pub fn require_position(&self, name: &str) -> Result<usize, Error> {
        self.position(name)
            .ok_or_else(|| Error::unknown_field(self.name.clone(), name.to_string()))
    }

    /// All type names referenced by Object/List/Set/Map fields.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .fields
            .iter()
            .flat_map(|f| f.referenced_types())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_utf8_string(&self.name);
        w.write_varuint64(self.fields.len() as u64);
        for field in &self.fields {
            w.write_utf8_string(&field.name);
            w.write_u8(field.field_type as u8);
            match field.field_type {
                FieldType::Object | FieldType::List | FieldType::Set => {
                    w.write_utf8_string(field.sub_type.as_deref().unwrap_or(""));
                }
                FieldType::Map => {
                    w.write_utf8_string(field.key_type.as_deref().unwrap_or(""));
                    w.write_utf8_string(field.value_type.as_deref().unwrap_or(""));
                }
                _ => {}
            }
        }
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Schema, Error> {
        let name = r.read_utf8_string()?;
        let num_fields = r.read_varuint64()? as usize;
        let mut fields = Vec::with_capacity(num_fields);
        for _ in 0..num_fields {
            let field_name = r.read_utf8_string()?;
            let code = r.read_u8()?;
            let field_type = FieldType::try_from(code)
                .map_err(|_| Error::corrupt_stream(format!("invalid field type code {code}")))?;
            let mut sub_type = None;
            let mut key_type = None;
            let mut value_type = None;
            match field_type {
                FieldType::Object | FieldType::List | FieldType::Set => {
                    sub_type = Some(r.read_utf8_string()?);
                }
                FieldType::Map => {
                    key_type = Some(r.read_utf8_string()?);
                    value_type = Some(r.read_utf8_string()?);
                }
                _ => {}
            }
            fields.push(FieldDef {
                name: field_name,
                field_type,
                sub_type,
                key_type,
                value_type,
            });
        }
        Ok(Schema::new(&name, fields))
    }
}
