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

//! # Deltablob
//!
//! Deltablob is a schema-driven binary object-graph serialization engine
//! producing full **snapshot** blobs and compact **delta** blobs between
//! successive cycles of an application's in-memory state. Byte-identical
//! objects deduplicate to one stable **ordinal** per type, so a consumer
//! holding the previous cycle's state applies a delta touching only the
//! objects that actually changed.
//!
//! ## Producing blobs
//!
//! Register one [`TypeSerializer`] per application type, then drive the
//! cycle lifecycle:
//!
//! ```rust
//! use std::sync::Arc;
//! use deltablob::{
//!     Error, FieldDef, FieldType, RecordSink, RecordView, Schema,
//!     SharedObject, StateEngine, TypeSerializer, downcast,
//! };
//!
//! struct Counter {
//!     value: i32,
//! }
//!
//! struct CounterSerializer;
//!
//! impl TypeSerializer for CounterSerializer {
//!     fn type_name(&self) -> &str {
//!         "Counter"
//!     }
//!
//!     fn schema(&self) -> Schema {
//!         Schema::new("Counter", vec![FieldDef::scalar("value", FieldType::Int)])
//!     }
//!
//!     fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
//!         let counter = downcast::<Counter>(obj)?;
//!         sink.write_int("value", Some(counter.value))
//!     }
//!
//!     fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
//!         let value = view.read_int("value")?.unwrap_or(0);
//!         Ok(Arc::new(Counter { value }))
//!     }
//! }
//!
//! # fn main() -> Result<(), Error> {
//! let mut engine = StateEngine::new(1);
//! engine.register(Arc::new(CounterSerializer))?;
//!
//! let one: SharedObject = Arc::new(Counter { value: 1 });
//! engine.add("Counter", &one, 0b1)?;
//! engine.prepare_for_write()?;
//! let snapshot = engine.write_snapshot(0)?;
//! engine.prepare_for_next_cycle()?;
//!
//! let mut consumer = StateEngine::new(1);
//! consumer.register(Arc::new(CounterSerializer))?;
//! consumer.read_snapshot(&snapshot)?;
//! assert_eq!(consumer.decoded_objects("Counter")?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! Subsequent cycles repeat `add`/`prepare_for_write` and emit
//! [`StateEngine::write_delta`] blobs, which a consumer applies with
//! [`StateEngine::read_delta`].
//!
//! ## Diffing populations
//!
//! [`diff_type`] matches two decoded populations by key and scores every
//! field path by multiset symmetric difference; see the `diff` module in
//! `deltablob-core` for the report types.

pub use deltablob_core::blob::{BlobHeader, BlobKind, BLOB_FORMAT_VERSION};
pub use deltablob_core::buffer::{Reader, Writer};
pub use deltablob_core::diff::{
    diff_type, DiffHeader, DiffReport, FieldDiff, KeyExtractor, LeafValue, ObjectDiff,
};
pub use deltablob_core::engine::StateEngine;
pub use deltablob_core::error::Error;
pub use deltablob_core::schema::{FieldDef, FieldType, Schema};
pub use deltablob_core::serializer::{
    downcast, OrdinalAssigner, OrdinalResolver, RecordSink, RecordView, SharedObject,
    TypeSerializer,
};
