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

//! The collaborator seam between the engine and the application object
//! model.
//!
//! The engine never sees application types directly. Each registered type
//! supplies a [`TypeSerializer`]: a schema plus a pair of callbacks that
//! walk one object, writing typed fields into a [`RecordSink`] or reading
//! them back from a [`RecordView`]. Nested typed fields are reached back
//! through the sink/view, which resolves the referenced type's serializer
//! from the registry built at startup — there is no per-call string
//! dispatch beyond the field's declared sub-type.
//!
//! The same `RecordSink` trait is implemented by both the binary encoder
//! (emitting ordinals and varints) and the structural diff flattener
//! (emitting path→value entries), so one `serialize` implementation serves
//! both machines.

use std::any::Any;
use std::sync::Arc;

use crate::error::Error;
use crate::schema::Schema;

/// A deserialized object instance, shared so that reference topology
/// (one ordinal referenced from many places) survives a round trip.
pub type SharedObject = Arc<dyn Any + Send + Sync>;

/// Downcast helper for deserializers and key extractors.
pub fn downcast<T: 'static>(obj: &SharedObject) -> Result<&T, Error> {
    obj.downcast_ref::<T>()
        .ok_or_else(|| Error::unresolvable("object has unexpected concrete type"))
}

/// Typed field writer handed to `TypeSerializer::serialize`.
///
/// Writing to a field name the schema does not declare is a protocol-misuse
/// error. `None` writes the field as null.
pub trait RecordSink {
    fn write_boolean(&mut self, field: &str, value: Option<bool>) -> Result<(), Error>;
    fn write_int(&mut self, field: &str, value: Option<i32>) -> Result<(), Error>;
    fn write_long(&mut self, field: &str, value: Option<i64>) -> Result<(), Error>;
    fn write_float(&mut self, field: &str, value: Option<f32>) -> Result<(), Error>;
    fn write_double(&mut self, field: &str, value: Option<f64>) -> Result<(), Error>;
    fn write_string(&mut self, field: &str, value: Option<&str>) -> Result<(), Error>;
    fn write_bytes(&mut self, field: &str, value: Option<&[u8]>) -> Result<(), Error>;
    fn write_object(&mut self, field: &str, value: Option<&SharedObject>) -> Result<(), Error>;
    fn write_list(
        &mut self,
        field: &str,
        value: Option<&[Option<SharedObject>]>,
    ) -> Result<(), Error>;
    fn write_set(&mut self, field: &str, value: Option<&[SharedObject]>) -> Result<(), Error>;
    fn write_map(
        &mut self,
        field: &str,
        value: Option<&[(SharedObject, SharedObject)]>,
    ) -> Result<(), Error>;
}

/// Typed field reader handed to `TypeSerializer::deserialize`.
///
/// A field name absent from the *stream* schema reads as `None` — that is
/// how forward/backward schema evolution stays non-fatal. Unresolvable
/// elements inside collections are dropped, not propagated.
pub trait RecordView {
    fn read_boolean(&self, field: &str) -> Result<Option<bool>, Error>;
    fn read_int(&self, field: &str) -> Result<Option<i32>, Error>;
    fn read_long(&self, field: &str) -> Result<Option<i64>, Error>;
    fn read_float(&self, field: &str) -> Result<Option<f32>, Error>;
    fn read_double(&self, field: &str) -> Result<Option<f64>, Error>;
    fn read_string(&self, field: &str) -> Result<Option<String>, Error>;
    fn read_bytes(&self, field: &str) -> Result<Option<Vec<u8>>, Error>;
    fn read_object(&self, field: &str) -> Result<Option<SharedObject>, Error>;
    #[allow(clippy::type_complexity)]
    fn read_list(&self, field: &str) -> Result<Option<Vec<Option<SharedObject>>>, Error>;
    fn read_set(&self, field: &str) -> Result<Option<Vec<SharedObject>>, Error>;
    #[allow(clippy::type_complexity)]
    fn read_map(&self, field: &str) -> Result<Option<Vec<(SharedObject, SharedObject)>>, Error>;
}

/// Per-type callbacks plugged in by the application object model.
pub trait TypeSerializer: Send + Sync {
    fn type_name(&self) -> &str;

    /// Builds the schema for this type. Called once at registration (and
    /// again if the type is reconfigured at a cycle boundary).
    fn schema(&self) -> Schema;

    /// Walks `obj`, writing every schema field into `sink`.
    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error>;

    /// Materializes an object from `view`. Returning an error marks the
    /// value unresolvable: dropped from containing collections, skipped at
    /// record top level.
    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error>;
}

/// Assigns ordinals for nested objects reached through a binary
/// [`RecordSink`]. Implemented by the state engine.
pub trait OrdinalAssigner {
    fn assign(&self, type_name: &str, obj: &SharedObject, image_mask: u64) -> Result<u32, Error>;
}

/// Resolves ordinals back to objects for a binary [`RecordView`].
/// Implemented over the engine's per-type deserialization states.
pub trait OrdinalResolver {
    fn resolve(&self, type_name: &str, ordinal: u32) -> Option<SharedObject>;
}
