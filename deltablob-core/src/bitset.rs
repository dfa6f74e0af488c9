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

//! Word-backed bitset tracking per-image ordinal membership.
//!
//! One bit per ordinal. Grows lazily on `set`; out-of-range `get` is false.

use crate::buffer::{Reader, Writer};
use crate::error::Error;

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct ImageBitSet {
    words: Vec<u64>,
}

impl ImageBitSet {
    pub fn new() -> ImageBitSet {
        ImageBitSet::default()
    }

    pub fn with_capacity(bits: usize) -> ImageBitSet {
        ImageBitSet {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn set(&mut self, bit: u32) {
        let word = (bit / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % 64);
    }

    pub fn get(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        match self.words.get(word) {
            Some(w) => w & (1u64 << (bit % 64)) != 0,
            None => false,
        }
    }

    pub fn clear_bit(&mut self, bit: u32) {
        let word = (bit / 64) as usize;
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << (bit % 64));
        }
    }

    /// Clears every bit, keeping capacity.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn or_with(&mut self, other: &ImageBitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
    }

    /// Ascending iterator over set bits.
    pub fn ones(&self) -> impl Iterator<Item = u32> + '_ {
        BitIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Ascending set bits of `self XOR other` — the membership changes
    /// between two cycles.
    pub fn symmetric_difference(&self, other: &ImageBitSet) -> Vec<u32> {
        let len = self.words.len().max(other.words.len());
        let mut out = Vec::new();
        for i in 0..len {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            let mut x = a ^ b;
            while x != 0 {
                let bit = x.trailing_zeros();
                out.push(i as u32 * 64 + bit);
                x &= x - 1;
            }
        }
        out
    }

    pub fn serialize(&self, w: &mut Writer) {
        // trim trailing zero words so the encoding is canonical
        let mut len = self.words.len();
        while len > 0 && self.words[len - 1] == 0 {
            len -= 1;
        }
        w.write_varuint64(len as u64);
        for word in &self.words[..len] {
            w.write_varuint64(*word);
        }
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<ImageBitSet, Error> {
        let len = r.read_varuint64()? as usize;
        let mut words = Vec::with_capacity(len);
        for _ in 0..len {
            words.push(r.read_varuint64()?);
        }
        Ok(ImageBitSet { words })
    }
}

struct BitIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some(self.word_idx as u32 * 64 + bit);
            }
            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}
