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

//! Interned property paths.
//!
//! A property path is the breadcrumb trail of field names from a top-level
//! type down to a leaf. Paths recur enormously during flattening (every
//! object of a type revisits the same paths), so structurally equal paths
//! intern to one [`PathId`] and comparisons are integer comparisons.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(u32);

pub struct PathTable {
    // (parent, segment) → id
    intern: FxHashMap<(Option<PathId>, String), PathId>,
    nodes: Vec<(Option<PathId>, String)>,
}

impl Default for PathTable {
    fn default() -> PathTable {
        PathTable::new()
    }
}

impl PathTable {
    pub fn new() -> PathTable {
        PathTable {
            intern: FxHashMap::default(),
            nodes: Vec::new(),
        }
    }

    fn node(&mut self, parent: Option<PathId>, segment: &str) -> PathId {
        if let Some(&id) = self.intern.get(&(parent, segment.to_string())) {
            return id;
        }
        let id = PathId(self.nodes.len() as u32);
        self.nodes.push((parent, segment.to_string()));
        self.intern.insert((parent, segment.to_string()), id);
        id
    }

    /// Root breadcrumb: the top-level type name.
    pub fn root(&mut self, type_name: &str) -> PathId {
        self.node(None, type_name)
    }

    pub fn child(&mut self, parent: PathId, segment: &str) -> PathId {
        self.node(Some(parent), segment)
    }

    /// Dot-joined rendering, e.g. `Movie.cast.name`.
    pub fn render(&self, id: PathId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(PathId(idx)) = cursor {
            let (parent, segment) = &self.nodes[idx as usize];
            segments.push(segment.as_str());
            cursor = *parent;
        }
        segments.reverse();
        segments.join(".")
    }
}
