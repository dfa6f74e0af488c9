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
use deltablob::{
    downcast, BlobKind, Error, FieldDef, FieldType, RecordSink, RecordView, Schema, SharedObject,
    StateEngine, TypeSerializer,
};

#[test]
fn test_snapshot_round_trip_preserves_reference_sharing() {
    let engine = movie_engine(1);
    let shared = actor("Keanu Reeves");
    let other = actor("Carrie-Anne Moss");
    let m1 = movie(1, "The Matrix", Some(shared.clone()), vec![shared.clone(), other.clone()]);
    let m2 = movie(2, "John Wick", Some(shared.clone()), vec![shared.clone()]);
    engine.add("Movie", &m1, IMAGE_0).unwrap();
    engine.add("Movie", &m2, IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();

    let consumer = movie_engine(1);
    let header = consumer.read_snapshot(&snapshot).unwrap();
    assert_eq!(header.kind, BlobKind::Snapshot);

    let d1 = movie_by_id(&consumer, 1);
    let d2 = movie_by_id(&consumer, 2);
    assert_eq!(d1.title, "The Matrix");
    assert_eq!(d2.title, "John Wick");
    assert_eq!(d1.cast.len(), 2);

    // one shared actor ordinal materializes as one shared instance
    let lead1 = d1.lead.as_ref().unwrap();
    let lead2 = d2.lead.as_ref().unwrap();
    assert!(Arc::ptr_eq(lead1, lead2));
    assert!(Arc::ptr_eq(lead1, &d1.cast[0]));
    assert_eq!(downcast::<Actor>(lead1).unwrap().name, "Keanu Reeves");
}

#[test]
fn test_byte_identical_objects_share_one_ordinal() {
    let engine = pair_engine(1);
    let o1 = engine.add("Pair", &pair(7, 8), IMAGE_0).unwrap();
    let o2 = engine.add("Pair", &pair(7, 8), IMAGE_0).unwrap();
    let o3 = engine.add("Pair", &pair(7, 9), IMAGE_0).unwrap();
    assert_eq!(o1, o2);
    assert_ne!(o1, o3);
}

#[test]
fn test_add_outside_accepting_phase_is_rejected() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let err = engine.add("Pair", &pair(3, 4), IMAGE_0).unwrap_err();
    assert!(matches!(err, Error::ProtocolMisuse(_)));
    engine.prepare_for_next_cycle().unwrap();
    engine.add("Pair", &pair(3, 4), IMAGE_0).unwrap();
}

#[test]
fn test_unregistered_type_is_skipped_on_read() {
    let engine = movie_engine(1);
    let lead = actor("Solo");
    let m = movie(9, "Standalone", Some(lead.clone()), vec![lead.clone()]);
    engine.add("Movie", &m, IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let snapshot = engine.write_snapshot(0).unwrap();

    // consumer only knows Actor; the Movie block is consumed and discarded
    let mut consumer = StateEngine::new(1);
    consumer.register(Arc::new(ActorSerializer)).unwrap();
    consumer.read_snapshot(&snapshot).unwrap();
    let actors = consumer.decoded_objects("Actor").unwrap();
    assert_eq!(actors.len(), 1);
    assert_eq!(downcast::<Actor>(&actors[0]).unwrap().name, "Solo");
}

/// Newer Pair schema with an extra field the stream does not carry.
struct PairV2Serializer;

impl TypeSerializer for PairV2Serializer {
    fn type_name(&self) -> &str {
        "Pair"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Pair",
            vec![
                FieldDef::scalar("a", FieldType::Int),
                FieldDef::scalar("b", FieldType::Int),
                FieldDef::scalar("c", FieldType::Int),
            ],
        )
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        let pair = downcast::<Pair>(obj)?;
        sink.write_int("a", Some(pair.a))?;
        sink.write_int("b", Some(pair.b))?;
        sink.write_int("c", None)
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        // "c" is absent from a v1 stream and must read as None, not fail
        assert_eq!(view.read_int("c")?, None);
        Ok(Arc::new(Pair {
            a: view.read_int("a")?.unwrap_or(0),
            b: view.read_int("b")?.unwrap_or(0),
        }))
    }
}

#[test]
fn test_missing_stream_field_reads_as_none() {
    let producer = pair_engine(1);
    producer.add("Pair", &pair(10, 20), IMAGE_0).unwrap();
    producer.prepare_for_write().unwrap();
    let snapshot = producer.write_snapshot(0).unwrap();

    let mut consumer = StateEngine::new(1);
    consumer.register(Arc::new(PairV2Serializer)).unwrap();
    consumer.read_snapshot(&snapshot).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(10, 20)]);
}

#[test]
fn test_unresolvable_record_is_dropped_not_fatal() {
    let producer = pair_engine(1);
    producer.add("Pair", &pair(-1, 0), IMAGE_0).unwrap();
    producer.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    producer.prepare_for_write().unwrap();
    let snapshot = producer.write_snapshot(0).unwrap();

    // the rejected record is skipped; the rest of the blob still decodes
    let mut consumer = StateEngine::new(1);
    consumer.register(Arc::new(FussyPairSerializer)).unwrap();
    consumer.read_snapshot(&snapshot).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 2)]);
}

#[test]
fn test_corrupt_length_prefix_is_an_error_not_a_panic() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let mut bytes = engine.write_snapshot(0).unwrap();

    // the final record entry is [len=0x02, zigzag(1), zigzag(2)]; turning
    // its length prefix into a multi-byte varint claims a record far past
    // the end of the blob
    let idx = bytes.len() - 3;
    assert_eq!(bytes[idx], 0x02);
    bytes[idx] = 0xBF;

    let consumer = pair_engine(1);
    assert!(matches!(
        consumer.read_snapshot(&bytes),
        Err(Error::CorruptStream(_))
    ));
}

#[test]
fn test_truncated_snapshot_is_a_corrupt_stream() {
    let engine = pair_engine(1);
    engine.add("Pair", &pair(1, 2), IMAGE_0).unwrap();
    engine.prepare_for_write().unwrap();
    let mut bytes = engine.write_snapshot(0).unwrap();
    bytes.truncate(bytes.len() - 1);

    let consumer = pair_engine(1);
    assert!(matches!(
        consumer.read_snapshot(&bytes),
        Err(Error::CorruptStream(_))
    ));
}

#[test]
fn test_snapshot_is_per_image() {
    let engine = pair_engine(2);
    engine.add("Pair", &pair(1, 1), 0b01).unwrap();
    engine.add("Pair", &pair(2, 2), 0b10).unwrap();
    engine.add("Pair", &pair(3, 3), 0b11).unwrap();
    engine.prepare_for_write().unwrap();
    let blob0 = engine.write_snapshot(0).unwrap();
    let blob1 = engine.write_snapshot(1).unwrap();

    let consumer = pair_engine(2);
    consumer.read_snapshot(&blob0).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(1, 1), (3, 3)]);
    consumer.read_snapshot(&blob1).unwrap();
    assert_eq!(decoded_pairs(&consumer), vec![(2, 2), (3, 3)]);
}
