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

//! Flattening sink: drives the same `TypeSerializer::serialize` callbacks
//! the binary encoder uses, but collects `path → leaf values` instead of
//! bytes. Nested object, list, set and map fields recurse through the
//! referenced type's serializer under an extended path.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::schema::Schema;
use crate::serializer::{RecordSink, SharedObject, TypeSerializer};

use super::path::{PathId, PathTable};
use super::SerializerLookup;

/// Nesting bound; a deeper walk means the object graph has a reference
/// cycle, which the record model cannot represent.
const MAX_DEPTH: usize = 64;

/// A primitive leaf value, hashable so multisets can be compared by
/// counting. Floats are compared by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeafValue {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
}

pub(crate) struct FlattenCtx<'a> {
    registry: &'a dyn SerializerLookup,
    table: &'a mut PathTable,
    out: FxHashMap<PathId, Vec<LeafValue>>,
    schemas: FxHashMap<String, Arc<Schema>>,
}

impl<'a> FlattenCtx<'a> {
    fn serializer(&self, type_name: &str) -> Result<Arc<dyn TypeSerializer>, Error> {
        self.registry
            .lookup(type_name)
            .ok_or_else(|| Error::unknown_type(type_name.to_string()))
    }

    fn schema(&mut self, type_name: &str) -> Result<Arc<Schema>, Error> {
        if let Some(schema) = self.schemas.get(type_name) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(self.serializer(type_name)?.schema());
        self.schemas.insert(type_name.to_string(), schema.clone());
        Ok(schema)
    }
}

/// Flattens one object's full field hierarchy into a path→multiset map.
pub(crate) fn flatten(
    registry: &dyn SerializerLookup,
    table: &mut PathTable,
    type_name: &str,
    obj: &SharedObject,
) -> Result<FxHashMap<PathId, Vec<LeafValue>>, Error> {
    let mut ctx = FlattenCtx {
        registry,
        table,
        out: FxHashMap::default(),
        schemas: FxHashMap::default(),
    };
    let serializer = ctx.serializer(type_name)?;
    let schema = ctx.schema(type_name)?;
    let root = ctx.table.root(type_name);
    let mut sink = Flattener {
        ctx: &mut ctx,
        schema,
        path: root,
        depth: 0,
    };
    serializer.serialize(obj, &mut sink)?;
    Ok(ctx.out)
}

struct Flattener<'a, 'b> {
    ctx: &'a mut FlattenCtx<'b>,
    schema: Arc<Schema>,
    path: PathId,
    depth: usize,
}

impl Flattener<'_, '_> {
    fn push(&mut self, field: &str, value: LeafValue) {
        let path = self.ctx.table.child(self.path, field);
        self.ctx.out.entry(path).or_default().push(value);
    }

    fn sub_type(&self, field: &str) -> Result<String, Error> {
        let pos = self.schema.require_position(field)?;
        self.schema
            .field(pos)
            .sub_type
            .clone()
            .ok_or_else(|| Error::protocol_misuse(format!("field '{field}' has no element type")))
    }

    fn recurse(&mut self, path: PathId, type_name: &str, obj: &SharedObject) -> Result<(), Error> {
        if self.depth + 1 >= MAX_DEPTH {
            return Err(Error::protocol_misuse(
                "object graph too deep; reference cycle suspected",
            ));
        }
        let serializer = self.ctx.serializer(type_name)?;
        let schema = self.ctx.schema(type_name)?;
        let mut sink = Flattener {
            ctx: &mut *self.ctx,
            schema,
            path,
            depth: self.depth + 1,
        };
        serializer.serialize(obj, &mut sink)
    }
}

impl RecordSink for Flattener<'_, '_> {
    fn write_boolean(&mut self, field: &str, value: Option<bool>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Bool(v));
        }
        Ok(())
    }

    fn write_int(&mut self, field: &str, value: Option<i32>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Int(v as i64));
        }
        Ok(())
    }

    fn write_long(&mut self, field: &str, value: Option<i64>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Int(v));
        }
        Ok(())
    }

    fn write_float(&mut self, field: &str, value: Option<f32>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Float((v as f64).to_bits()));
        }
        Ok(())
    }

    fn write_double(&mut self, field: &str, value: Option<f64>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Float(v.to_bits()));
        }
        Ok(())
    }

    fn write_string(&mut self, field: &str, value: Option<&str>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Str(v.to_string()));
        }
        Ok(())
    }

    fn write_bytes(&mut self, field: &str, value: Option<&[u8]>) -> Result<(), Error> {
        if let Some(v) = value {
            self.push(field, LeafValue::Bytes(v.to_vec()));
        }
        Ok(())
    }

    fn write_object(&mut self, field: &str, value: Option<&SharedObject>) -> Result<(), Error> {
        let Some(obj) = value else { return Ok(()) };
        let sub_type = self.sub_type(field)?;
        let path = self.ctx.table.child(self.path, field);
        self.recurse(path, &sub_type, obj)
    }

    fn write_list(
        &mut self,
        field: &str,
        value: Option<&[Option<SharedObject>]>,
    ) -> Result<(), Error> {
        let Some(elements) = value else { return Ok(()) };
        let sub_type = self.sub_type(field)?;
        let path = self.ctx.table.child(self.path, field);
        // elements aggregate under the field path; ordering is not part of
        // the multiset comparison
        for element in elements.iter().flatten() {
            self.recurse(path, &sub_type, element)?;
        }
        Ok(())
    }

    fn write_set(&mut self, field: &str, value: Option<&[SharedObject]>) -> Result<(), Error> {
        let Some(elements) = value else { return Ok(()) };
        let sub_type = self.sub_type(field)?;
        let path = self.ctx.table.child(self.path, field);
        for element in elements {
            self.recurse(path, &sub_type, element)?;
        }
        Ok(())
    }

    fn write_map(
        &mut self,
        field: &str,
        value: Option<&[(SharedObject, SharedObject)]>,
    ) -> Result<(), Error> {
        let Some(entries) = value else { return Ok(()) };
        let pos = self.schema.require_position(field)?;
        let field_def = self.schema.field(pos).clone();
        let (Some(key_type), Some(value_type)) = (field_def.key_type, field_def.value_type) else {
            return Err(Error::protocol_misuse(format!(
                "field '{field}' has no key/value types"
            )));
        };
        let field_path = self.ctx.table.child(self.path, field);
        let key_path = self.ctx.table.child(field_path, "key");
        let value_path = self.ctx.table.child(field_path, "value");
        for (key, val) in entries {
            self.recurse(key_path, &key_type, key)?;
            self.recurse(value_path, &value_type, val)?;
        }
        Ok(())
    }
}
