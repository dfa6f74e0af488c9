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

use std::thread;

use deltablob_core::bitset::ImageBitSet;
use deltablob_core::ordinal::OrdinalMap;

#[test]
fn test_concurrent_insert_race_yields_one_ordinal() {
    let map = OrdinalMap::new();
    const THREADS: usize = 8;
    const VALUES: u32 = 200;

    let results: Vec<Vec<u32>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let map = &map;
                scope.spawn(move || {
                    (0..VALUES)
                        .map(|i| {
                            let bytes = format!("payload-{i}");
                            map.get_or_assign_ordinal(bytes.as_bytes()).unwrap()
                        })
                        .collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // every thread observed the same ordinal per value
    for per_thread in &results[1..] {
        assert_eq!(per_thread, &results[0]);
    }
    // one payload copy each, not THREADS copies
    assert_eq!(map.len(), VALUES as usize);
    let single_copy_size: u64 = (0..VALUES)
        .map(|i| {
            let len = format!("payload-{i}").len() as u64;
            len + 1 // one-byte length prefix for short payloads
        })
        .sum();
    assert_eq!(map.store_size(), single_copy_size);
}

#[test]
fn test_concurrent_same_novel_bytes() {
    let map = OrdinalMap::new();
    let ordinals: Vec<u32> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let map = &map;
                scope.spawn(move || map.get_or_assign_ordinal(b"the-one-sequence").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(ordinals.iter().all(|&o| o == ordinals[0]));
    assert_eq!(map.len(), 1);
}

#[test]
fn test_compaction_reuses_freed_before_fresh() {
    let map = OrdinalMap::new();
    let ordinals: Vec<u32> = (0..4)
        .map(|i: u32| map.get_or_assign_ordinal(&i.to_be_bytes()).unwrap())
        .collect();
    let mut used = ImageBitSet::new();
    used.set(ordinals[0]);
    used.set(ordinals[3]);
    map.compact(&used);

    // survivors keep their ordinals
    assert_eq!(map.get(&0u32.to_be_bytes()), Some(ordinals[0]));
    assert_eq!(map.get(&3u32.to_be_bytes()), Some(ordinals[3]));
    assert_eq!(map.get(&1u32.to_be_bytes()), None);

    // freed ordinals come back most-recently-freed first, before any
    // never-yet-assigned ordinal
    assert_eq!(map.get_or_assign_ordinal(b"reuse-1").unwrap(), ordinals[2]);
    assert_eq!(map.get_or_assign_ordinal(b"reuse-2").unwrap(), ordinals[1]);
    assert_eq!(map.get_or_assign_ordinal(b"fresh").unwrap(), 4);
}

#[test]
fn test_repeated_compaction_under_load() {
    let map = OrdinalMap::new();
    for round in 0u32..5 {
        let mut used = ImageBitSet::new();
        for i in 0..500u32 {
            let bytes = format!("round-{round}-value-{i}");
            let ordinal = map.get_or_assign_ordinal(bytes.as_bytes()).unwrap();
            if i % 2 == 0 {
                used.set(ordinal);
            }
        }
        map.compact(&used);
        // survivors still resolve after payload relocation
        for i in (0..500u32).step_by(2) {
            let bytes = format!("round-{round}-value-{i}");
            assert!(map.get(bytes.as_bytes()).is_some(), "round {round} value {i}");
        }
        for i in (1..500u32).step_by(2) {
            let bytes = format!("round-{round}-value-{i}");
            assert!(map.get(bytes.as_bytes()).is_none());
        }
    }
}
