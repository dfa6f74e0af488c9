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

//! Structural diff engine.
//!
//! Given two deserialized populations of one top-level type and a key
//! extractor, matches objects across the populations by key, flattens each
//! matched pair's full field hierarchy into path→multiset-of-leaf-values
//! maps, and scores every path by multiset symmetric difference. A pair
//! scoring zero is not reported as different; cardinality matters, so two
//! occurrences of the same value never cancel against one.

mod flatten;
mod path;

pub use flatten::LeafValue;
pub use path::{PathId, PathTable};

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::engine::StateEngine;
use crate::error::Error;
use crate::serializer::{SharedObject, TypeSerializer};

use flatten::flatten;

/// Resolves a type name to its registered serializer.
pub trait SerializerLookup {
    fn lookup(&self, type_name: &str) -> Option<Arc<dyn TypeSerializer>>;
}

impl SerializerLookup for StateEngine {
    fn lookup(&self, type_name: &str) -> Option<Arc<dyn TypeSerializer>> {
        self.types.get(type_name).map(|entry| entry.serializer())
    }
}

/// Extracts the matching key for one top-level object.
pub type KeyExtractor<'a> = dyn Fn(&SharedObject) -> Result<String, Error> + 'a;

/// Identifies the two blobs a diff report compares. The two sides are
/// independent; a report over one blob against itself is legal but always
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHeader {
    from_blob: String,
    to_blob: String,
}

impl DiffHeader {
    pub fn new(from_blob: &str, to_blob: &str) -> DiffHeader {
        DiffHeader {
            from_blob: from_blob.to_string(),
            to_blob: to_blob.to_string(),
        }
    }

    pub fn from_blob(&self) -> &str {
        &self.from_blob
    }

    pub fn to_blob(&self) -> &str {
        &self.to_blob
    }
}

/// One matched pair with a nonzero score.
#[derive(Debug, Clone)]
pub struct ObjectDiff {
    pub key: String,
    /// Total leftover count across all paths.
    pub score: usize,
    /// Per-path breakdown (rendered path, leftover count), nonzero entries
    /// only, sorted by count descending.
    pub fields: Vec<(String, usize)>,
}

/// Whole-type aggregate for one path.
#[derive(Debug, Clone)]
pub struct FieldDiff {
    pub path: String,
    pub diff_count: usize,
    pub total_count: usize,
}

impl FieldDiff {
    pub fn ratio(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.diff_count as f64 / self.total_count as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub header: DiffHeader,
    pub type_name: String,
    /// Keys present only in the "from" population, ascending.
    pub extra_in_from: Vec<String>,
    /// Keys present only in the "to" population, ascending.
    pub extra_in_to: Vec<String>,
    /// Matched pairs with nonzero scores, by score descending.
    pub object_diffs: Vec<ObjectDiff>,
    /// Per-path aggregates over all matched pairs, by diff/total ratio
    /// descending.
    pub field_diffs: Vec<FieldDiff>,
    pub total_diffs: usize,
}

/// Multiset symmetric difference: occurrences present on both sides cancel
/// one-for-one; the leftover count on either side is the difference.
fn multiset_diff(from: &[LeafValue], to: &[LeafValue]) -> usize {
    let mut counts: FxHashMap<&LeafValue, i64> = FxHashMap::default();
    for value in from {
        *counts.entry(value).or_insert(0) += 1;
    }
    for value in to {
        *counts.entry(value).or_insert(0) -= 1;
    }
    counts.values().map(|c| c.unsigned_abs() as usize).sum()
}

/// Diffs two populations of `type_name`, matching objects by extracted key.
pub fn diff_type(
    registry: &dyn SerializerLookup,
    header: DiffHeader,
    type_name: &str,
    from: &[SharedObject],
    to: &[SharedObject],
    key_of: &KeyExtractor<'_>,
) -> Result<DiffReport, Error> {
    let mut table = PathTable::new();
    let mut from_by_key: FxHashMap<String, SharedObject> = FxHashMap::default();
    for obj in from {
        from_by_key.insert(key_of(obj)?, obj.clone());
    }

    let mut extra_in_to = Vec::new();
    let mut object_diffs = Vec::new();
    let mut aggregates: FxHashMap<PathId, (usize, usize)> = FxHashMap::default();
    let mut total_diffs = 0usize;

    for obj in to {
        let key = key_of(obj)?;
        let Some(from_obj) = from_by_key.remove(&key) else {
            extra_in_to.push(key);
            continue;
        };
        let from_paths = flatten(registry, &mut table, type_name, &from_obj)?;
        let to_paths = flatten(registry, &mut table, type_name, obj)?;

        let mut all_paths: Vec<PathId> = from_paths.keys().chain(to_paths.keys()).copied().collect();
        all_paths.sort_unstable_by_key(|id| table.render(*id));
        all_paths.dedup();

        let mut score = 0usize;
        let mut fields = Vec::new();
        for path in all_paths {
            let empty: &[LeafValue] = &[];
            let from_values = from_paths.get(&path).map(Vec::as_slice).unwrap_or(empty);
            let to_values = to_paths.get(&path).map(Vec::as_slice).unwrap_or(empty);
            let diff = multiset_diff(from_values, to_values);
            let total = from_values.len() + to_values.len();
            let aggregate = aggregates.entry(path).or_insert((0, 0));
            aggregate.0 += diff;
            aggregate.1 += total;
            if diff > 0 {
                score += diff;
                fields.push((table.render(path), diff));
            }
        }
        if score > 0 {
            fields.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            total_diffs += score;
            object_diffs.push(ObjectDiff { key, score, fields });
        }
    }

    let mut extra_in_from: Vec<String> = from_by_key.into_keys().collect();
    extra_in_from.sort_unstable();
    extra_in_to.sort_unstable();
    object_diffs.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.key.cmp(&b.key)));

    let mut field_diffs: Vec<FieldDiff> = aggregates
        .into_iter()
        .map(|(path, (diff_count, total_count))| FieldDiff {
            path: table.render(path),
            diff_count,
            total_count,
        })
        .collect();
    field_diffs.sort_by(|a, b| {
        b.ratio()
            .partial_cmp(&a.ratio())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });

    debug!(
        type_name,
        matched_diffs = object_diffs.len(),
        extra_in_from = extra_in_from.len(),
        extra_in_to = extra_in_to.len(),
        "diffed populations"
    );
    Ok(DiffReport {
        header,
        type_name: type_name.to_string(),
        extra_in_from,
        extra_in_to,
        object_diffs,
        field_diffs,
        total_diffs,
    })
}
