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

//! Blob framing: the header shared by snapshot, delta and reverse-delta
//! blobs, plus the per-type block layout.
//!
//! A blob is:
//!
//! ```text
//! i32-BE format version
//! u8 blob kind (snapshot / delta / reverse delta)
//! varuint image index
//! utf8 latest-version label
//! varuint tag count, then utf8 key + utf8 value per tag
//! varuint type count, then one type block per registered type,
//!   in dependency order
//! ```
//!
//! Each type block starts with the utf8 type name and the serialized
//! stream schema, so a reader can walk (or skip) a block for a type it
//! never registered.

mod reader;
mod writer;

use std::collections::BTreeMap;

use num_enum::TryFromPrimitive;

use crate::buffer::{Reader, Writer};
use crate::error::Error;

/// Bump when the framing above changes incompatibly.
pub const BLOB_FORMAT_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BlobKind {
    Snapshot = 0,
    Delta = 1,
    ReverseDelta = 2,
}

/// Decoded blob header, returned to the application after every read.
#[derive(Debug, Clone)]
pub struct BlobHeader {
    pub kind: BlobKind,
    /// Index of the image this blob was produced for.
    pub image: u32,
    /// Producer's announced data version label.
    pub latest_version: String,
    pub tags: BTreeMap<String, String>,
    pub num_types: u32,
}

impl BlobHeader {
    pub(crate) fn write(&self, w: &mut Writer) {
        w.write_i32_be(BLOB_FORMAT_VERSION);
        w.write_u8(self.kind as u8);
        w.write_varuint32(self.image);
        w.write_utf8_string(&self.latest_version);
        w.write_varuint64(self.tags.len() as u64);
        for (key, value) in &self.tags {
            w.write_utf8_string(key);
            w.write_utf8_string(value);
        }
        w.write_varuint32(self.num_types);
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<BlobHeader, Error> {
        let version = r.read_i32_be()?;
        if version != BLOB_FORMAT_VERSION {
            return Err(Error::version_mismatch(version, BLOB_FORMAT_VERSION));
        }
        let kind_code = r.read_u8()?;
        let kind = BlobKind::try_from(kind_code)
            .map_err(|_| Error::corrupt_stream(format!("invalid blob kind {kind_code:#04x}")))?;
        let image = r.read_varuint32()?;
        let latest_version = r.read_utf8_string()?;
        let tag_count = r.read_varuint64()? as usize;
        let mut tags = BTreeMap::new();
        for _ in 0..tag_count {
            let key = r.read_utf8_string()?;
            let value = r.read_utf8_string()?;
            tags.insert(key, value);
        }
        let num_types = r.read_varuint32()?;
        Ok(BlobHeader {
            kind,
            image,
            latest_version,
            tags,
            num_types,
        })
    }
}
