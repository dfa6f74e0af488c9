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

//! Collection field round trips: lists with explicit nulls, sets with
//! duplicate handles, and maps.

use std::sync::Arc;

use deltablob::{
    downcast, Error, FieldDef, FieldType, RecordSink, RecordView, Schema, SharedObject,
    StateEngine, TypeSerializer,
};

struct Tag {
    name: String,
}

struct TagSerializer;

impl TypeSerializer for TagSerializer {
    fn type_name(&self) -> &str {
        "Tag"
    }

    fn schema(&self) -> Schema {
        Schema::new("Tag", vec![FieldDef::scalar("name", FieldType::String)])
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        sink.write_string("name", Some(&downcast::<Tag>(obj)?.name))
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        Ok(Arc::new(Tag {
            name: view.read_string("name")?.unwrap_or_default(),
        }))
    }
}

struct Bag {
    name: String,
    labels: Vec<Option<SharedObject>>,
    tags: Vec<SharedObject>,
    attrs: Vec<(SharedObject, SharedObject)>,
}

struct BagSerializer;

impl TypeSerializer for BagSerializer {
    fn type_name(&self) -> &str {
        "Bag"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Bag",
            vec![
                FieldDef::scalar("name", FieldType::String),
                FieldDef::list("labels", "Tag"),
                FieldDef::set("tags", "Tag"),
                FieldDef::map("attrs", "Tag", "Tag"),
            ],
        )
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        let bag = downcast::<Bag>(obj)?;
        sink.write_string("name", Some(&bag.name))?;
        sink.write_list("labels", Some(&bag.labels))?;
        sink.write_set("tags", Some(&bag.tags))?;
        sink.write_map("attrs", Some(&bag.attrs))
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        Ok(Arc::new(Bag {
            name: view.read_string("name")?.unwrap_or_default(),
            labels: view.read_list("labels")?.unwrap_or_default(),
            tags: view.read_set("tags")?.unwrap_or_default(),
            attrs: view.read_map("attrs")?.unwrap_or_default(),
        }))
    }
}

fn tag(name: &str) -> SharedObject {
    Arc::new(Tag {
        name: name.to_string(),
    })
}

fn engine() -> StateEngine {
    let mut engine = StateEngine::new(1);
    engine.register(Arc::new(TagSerializer)).unwrap();
    engine.register(Arc::new(BagSerializer)).unwrap();
    engine
}

fn round_trip(bag: SharedObject) -> Arc<Bag> {
    let producer = engine();
    producer.add("Bag", &bag, 0b1).unwrap();
    producer.prepare_for_write().unwrap();
    let snapshot = producer.write_snapshot(0).unwrap();

    let consumer = engine();
    consumer.read_snapshot(&snapshot).unwrap();
    let bags = consumer.decoded_objects("Bag").unwrap();
    assert_eq!(bags.len(), 1);
    bags[0].clone().downcast::<Bag>().unwrap()
}

fn tag_names(objs: &[SharedObject]) -> Vec<String> {
    objs.iter()
        .map(|t| downcast::<Tag>(t).unwrap().name.clone())
        .collect()
}

#[test]
fn test_list_preserves_order_and_explicit_nulls() {
    let bag = Arc::new(Bag {
        name: "ordered".to_string(),
        labels: vec![Some(tag("zeta")), None, Some(tag("alpha")), Some(tag("zeta"))],
        tags: vec![],
        attrs: vec![],
    });
    let decoded = round_trip(bag);
    assert_eq!(decoded.labels.len(), 4);
    assert!(decoded.labels[1].is_none());
    let names: Vec<String> = decoded
        .labels
        .iter()
        .flatten()
        .map(|t| downcast::<Tag>(t).unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "zeta"]);
    // both "zeta" entries resolve to the deduplicated instance
    let zetas: Vec<&SharedObject> = decoded.labels.iter().flatten().collect();
    assert!(Arc::ptr_eq(zetas[0], zetas[2]));
}

#[test]
fn test_set_deduplicates_byte_identical_elements() {
    let bag = Arc::new(Bag {
        name: "dedup".to_string(),
        labels: vec![],
        // two handles with identical content collapse to one ordinal
        tags: vec![tag("only"), tag("only"), tag("other")],
        attrs: vec![],
    });
    let decoded = round_trip(bag);
    let mut names = tag_names(&decoded.tags);
    names.sort();
    assert_eq!(names, vec!["only", "other"]);
}

#[test]
fn test_map_round_trip() {
    let bag = Arc::new(Bag {
        name: "mapped".to_string(),
        labels: vec![],
        tags: vec![],
        attrs: vec![
            (tag("k1"), tag("v1")),
            (tag("k2"), tag("v2")),
            (tag("k3"), tag("v1")),
        ],
    });
    let decoded = round_trip(bag);
    let mut entries: Vec<(String, String)> = decoded
        .attrs
        .iter()
        .map(|(k, v)| {
            (
                downcast::<Tag>(k).unwrap().name.clone(),
                downcast::<Tag>(v).unwrap().name.clone(),
            )
        })
        .collect();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("k1".to_string(), "v1".to_string()),
            ("k2".to_string(), "v2".to_string()),
            ("k3".to_string(), "v1".to_string()),
        ]
    );
}

#[test]
fn test_null_collections_read_back_as_none() {
    struct NullBagSerializer;

    impl TypeSerializer for NullBagSerializer {
        fn type_name(&self) -> &str {
            "Bag"
        }

        fn schema(&self) -> Schema {
            BagSerializer.schema()
        }

        fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
            let bag = downcast::<Bag>(obj)?;
            sink.write_string("name", Some(&bag.name))?;
            sink.write_list("labels", None)?;
            sink.write_set("tags", None)?;
            sink.write_map("attrs", None)
        }

        fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
            assert!(view.read_list("labels")?.is_none());
            assert!(view.read_set("tags")?.is_none());
            assert!(view.read_map("attrs")?.is_none());
            Ok(Arc::new(Bag {
                name: view.read_string("name")?.unwrap_or_default(),
                labels: vec![],
                tags: vec![],
                attrs: vec![],
            }))
        }
    }

    let mut producer = StateEngine::new(1);
    producer.register(Arc::new(TagSerializer)).unwrap();
    producer.register(Arc::new(NullBagSerializer)).unwrap();
    let bag: SharedObject = Arc::new(Bag {
        name: "empty".to_string(),
        labels: vec![],
        tags: vec![],
        attrs: vec![],
    });
    producer.add("Bag", &bag, 0b1).unwrap();
    producer.prepare_for_write().unwrap();
    let snapshot = producer.write_snapshot(0).unwrap();

    let mut consumer = StateEngine::new(1);
    consumer.register(Arc::new(TagSerializer)).unwrap();
    consumer.register(Arc::new(NullBagSerializer)).unwrap();
    consumer.read_snapshot(&snapshot).unwrap();
    let bags = consumer.decoded_objects("Bag").unwrap();
    assert_eq!(bags.len(), 1);
    assert_eq!(downcast::<Bag>(&bags[0]).unwrap().name, "empty");
}
