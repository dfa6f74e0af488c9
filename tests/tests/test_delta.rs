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

mod common;

use std::sync::Arc;

use common::*;
use deltablob::{BlobKind, Error, StateEngine};

#[test]
fn test_delta_applies_adds_and_removes() {
    let engine = pair_engine(1);

    // cycle 1: (1,2) and (3,4)
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(3, 4), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();
    engine.prepare_for_next_cycle().unwrap();

    // cycle 2: (1,2) again and (5,6); (3,4) dropped
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(5, 6), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let delta = engine.write_delta(0).unwrap();

    let consumer = pair_engine(1);
    consumer.read_snapshot(&snapshot).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2), (3, 4)]);

    let header = consumer.read_delta(&delta).unwrap();
    assert_eq!(header.kind, BlobKind::Delta);
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2), (5, 6)]);
}

#[test]
fn test_reverse_delta_rolls_back_one_cycle() {
    let engine = pair_engine(1);

    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(3, 4), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot1 = engine.write_snapshot(0).unwrap();
    engine.prepare_for_next_cycle().unwrap();

    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(5, 6), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let delta = engine.write_delta(0).unwrap();
    let reverse = engine.write_reverse_delta(0).unwrap();

    let consumer = pair_engine(1);
    consumer.read_snapshot(&snapshot1).unwrap();
    consumer.read_delta(&delta).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2), (5, 6)]);

    // rolling back restores cycle 1 exactly
    let header = consumer.read_delta(&reverse).unwrap();
    assert_eq!(header.kind, BlobKind::ReverseDelta);
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2), (3, 4)]);
}

#[test]
fn test_empty_delta_when_nothing_changed() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();
    engine.prepare_for_next_cycle().unwrap();

    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let delta = engine.write_delta(0).unwrap();

    let consumer = pair_engine(1);
    consumer.read_snapshot(&snapshot).unwrap();
    consumer.read_delta(&delta).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2)]);
}

#[test]
fn test_delta_chain_across_three_cycles() {
    let engine = pair_engine(1);
    let consumer = pair_engine(1);

    engine.add("Pair", &pair(0, 0), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    consumer.read_snapshot(&engine.write_snapshot(0).unwrap()).unwrap();
    engine.prepare_for_next_cycle().unwrap();

    // each cycle keeps pair (0,0), drops last cycle's extra, adds a new one
    for i in 1..=3 {
        engine.add("Pair", &pair(0, 0), IMAGE_0).unwrap();
        engine.add("Pair", &pair(i, i), IMAGE_0).unwrap();
        engine.prepare_for_write().unwrap();
        consumer.read_delta(&engine.write_delta(0).unwrap()).unwrap();
        assert_eq!(decoded_pairs(&consumer), vec![(0, 0), (i, i)]);
        engine.prepare_for_next_cycle().unwrap();
    }
}

#[test]
fn test_unresolvable_delta_addition_drops_only_that_record() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(3, 4), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();
    engine.prepare_for_next_cycle().unwrap();

    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.add("Pair", &pair(-5, 6), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let delta = engine.write_delta(0).unwrap();

    let mut consumer = StateEngine::new(1);
    consumer.register(Arc::new(FussyPairSerializer)).unwrap();
    consumer.read_snapshot(&snapshot).unwrap();
    // the rejected addition is dropped; the removal in the same delta and
    // the rest of the blob still apply
    consumer.read_delta(&delta).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2)]);
}

#[test]
fn test_blob_kind_mismatch_is_protocol_misuse() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();
    let delta = engine.write_delta(0).unwrap();

    let consumer = pair_engine(1);
    assert!(matches!(
        consumer.read_snapshot(&delta).unwrap_err(),
        Error::ProtocolMisuse(_)
    ));
    assert!(matches!(
        consumer.read_delta(&snapshot).unwrap_err(),
        Error::ProtocolMisuse(_)
    ));
}

#[test]
fn test_writes_outside_write_ready_phase_are_rejected() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    assert!(matches!(
        engine.write_snapshot(0).unwrap_err(),
        Error::ProtocolMisuse(_)
    ));
}
