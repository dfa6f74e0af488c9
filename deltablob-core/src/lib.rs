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

//! # Deltablob Core
//!
//! Core implementation of the deltablob snapshot/delta serialization
//! engine: a schema-driven binary object-graph serializer producing full
//! snapshot blobs and compact delta blobs between successive cycles of an
//! application's in-memory state.
//!
//! ## Architecture
//!
//! - **`buffer`**: varint codec plus the `Writer`/`Reader` byte primitives
//! - **`store`**: growable segmented byte store with stable addresses
//! - **`schema`**: per-type field layout and name→position lookup
//! - **`record`**: per-object encode scratch and field-offset decoding
//! - **`ordinal`**: content-addressed ordinal map with compaction
//! - **`state`**: per-type write-side cycle machine and read-side tables
//! - **`engine`**: whole-model orchestration and the cycle lifecycle
//! - **`blob`**: snapshot/delta framing, emission and consumption
//! - **`diff`**: structural diff over two deserialized populations
//! - **`serializer`**: the collaborator traits the application implements
//! - **`error`**: error taxonomy shared across the crate
//!
//! ## Key Concepts
//!
//! An **ordinal** is a stable integer assigned to each distinct serialized
//! byte sequence of a type; byte-identical objects share one ordinal, which
//! is what makes deltas small. A **cycle** is one
//! `add* → prepare_for_write → write blobs → prepare_for_next_cycle`
//! iteration; an **image** is one of up to 64 independently produced output
//! blobs over the same engine state.
//!
//! This crate is typically used through the higher-level `deltablob` crate.

pub mod bitset;
pub mod blob;
pub mod buffer;
pub mod diff;
pub mod engine;
pub mod error;
pub mod ordinal;
pub mod pool;
pub mod record;
pub mod schema;
pub mod serializer;
pub mod state;
pub mod store;
pub mod util;
