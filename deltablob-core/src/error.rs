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

//! Error type for deltablob serialization, deserialization and lifecycle
//! operations.
//!
//! Error variants fall into four families:
//!
//! - **Corrupt stream**: the input bytes cannot be what a well-formed writer
//!   produced (truncated varint, null sentinel where a value was required,
//!   blob format version mismatch). Fatal for the read operation; types
//!   decoded earlier in the same stream remain decoded.
//! - **Protocol misuse**: the caller violated the engine lifecycle (`add`
//!   outside the accepting phase, writing to a schema field that does not
//!   exist). Surfaced immediately, never retried.
//! - **Unknown type/field**: registry lookups that failed where presence is
//!   required. Note that an *unregistered type found in a stream* is not an
//!   error — the reader skips it to allow schema evolution.
//! - **Io**: propagated unchanged from the underlying sink/source; stream
//!   cleanup stays the caller's responsibility.
//!
//! Construct variants through the static constructor functions; they accept
//! `Into<Cow<'static, str>>` and keep the error paths out of the hot-path
//! inlining budget via `#[cold]`.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The stream bytes are not a well-formed blob.
    ///
    /// Do not construct this variant directly; use [`Error::corrupt_stream`].
    #[error("corrupt stream: {0}")]
    CorruptStream(Cow<'static, str>),

    /// Blob format version does not match this engine build.
    ///
    /// Do not construct this variant directly; use [`Error::version_mismatch`].
    #[error("blob format version mismatch: stream has {0}, engine expects {1}")]
    VersionMismatch(i32, i32),

    /// Engine lifecycle or schema contract violated by the caller.
    ///
    /// Do not construct this variant directly; use [`Error::protocol_misuse`].
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(Cow<'static, str>),

    /// A schema field required by the caller does not exist.
    ///
    /// Do not construct this variant directly; use [`Error::unknown_field`].
    #[error("unknown field '{field}' for type '{type_name}'")]
    UnknownField {
        type_name: Cow<'static, str>,
        field: Cow<'static, str>,
    },

    /// A type name required by the caller is not registered.
    ///
    /// Do not construct this variant directly; use [`Error::unknown_type`].
    #[error("unknown type '{0}'")]
    UnknownType(Cow<'static, str>),

    /// A user deserializer could not materialize a value.
    ///
    /// Inside collections this is swallowed (the element is dropped); at the
    /// top level of a record it aborts that record only.
    ///
    /// Do not construct this variant directly; use [`Error::unresolvable`].
    #[error("unresolvable value: {0}")]
    Unresolvable(Cow<'static, str>),

    /// I/O failure on the underlying byte sink or source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn corrupt_stream<S: Into<Cow<'static, str>>>(msg: S) -> Error {
        Error::CorruptStream(msg.into())
    }

    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn version_mismatch(stream: i32, expected: i32) -> Error {
        Error::VersionMismatch(stream, expected)
    }

    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn protocol_misuse<S: Into<Cow<'static, str>>>(msg: S) -> Error {
        Error::ProtocolMisuse(msg.into())
    }

    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn unknown_field<T, F>(type_name: T, field: F) -> Error
    where
        T: Into<Cow<'static, str>>,
        F: Into<Cow<'static, str>>,
    {
        Error::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn unknown_type<S: Into<Cow<'static, str>>>(name: S) -> Error {
        Error::UnknownType(name.into())
    }

    #[inline(always)]
    #[cold]
    #[track_caller]
    pub fn unresolvable<S: Into<Cow<'static, str>>>(msg: S) -> Error {
        Error::Unresolvable(msg.into())
    }
}
