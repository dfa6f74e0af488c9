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

//! Shared test object model: plain structs plus hand-written serializers,
//! standing in for the application side of the collaborator seam.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use deltablob::{
    downcast, Error, FieldDef, FieldType, RecordSink, RecordView, Schema, SharedObject,
    StateEngine, TypeSerializer,
};

pub const IMAGE_0: u64 = 0b1;

/// Install a tracing subscriber once per test binary so `RUST_LOG` works
/// when debugging a failing test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[derive(Debug, PartialEq)]
pub struct Pair {
    pub a: i32,
    pub b: i32,
}

pub fn pair(a: i32, b: i32) -> SharedObject {
    Arc::new(Pair { a, b })
}

pub struct PairSerializer;

impl TypeSerializer for PairSerializer {
    fn type_name(&self) -> &str {
        "Pair"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Pair",
            vec![
                FieldDef::scalar("a", FieldType::Int),
                FieldDef::scalar("b", FieldType::Int),
            ],
        )
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        let pair = downcast::<Pair>(obj)?;
        sink.write_int("a", Some(pair.a))?;
        sink.write_int("b", Some(pair.b))
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        Ok(Arc::new(Pair {
            a: view.read_int("a")?.unwrap_or(0),
            b: view.read_int("b")?.unwrap_or(0),
        }))
    }
}

/// Pair reader that refuses to materialize negative `a` values, standing in
/// for an application deserializer that gives up on a record.
pub struct FussyPairSerializer;

impl TypeSerializer for FussyPairSerializer {
    fn type_name(&self) -> &str {
        "Pair"
    }

    fn schema(&self) -> Schema {
        PairSerializer.schema()
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        PairSerializer.serialize(obj, sink)
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        let a = view.read_int("a")?.unwrap_or(0);
        if a < 0 {
            return Err(Error::unresolvable("negative pair"));
        }
        Ok(Arc::new(Pair {
            a,
            b: view.read_int("b")?.unwrap_or(0),
        }))
    }
}

pub fn pair_engine(num_images: usize) -> StateEngine {
    init_tracing();
    let mut engine = StateEngine::new(num_images);
    engine.register(Arc::new(PairSerializer)).unwrap();
    engine
}

/// Decoded Pair population, ascending.
pub fn decoded_pairs(engine: &StateEngine) -> Vec<(i32, i32)> {
    let mut pairs: Vec<(i32, i32)> = engine
        .decoded_objects("Pair")
        .unwrap()
        .iter()
        .map(|obj| {
            let pair = downcast::<Pair>(obj).unwrap();
            (pair.a, pair.b)
        })
        .collect();
    pairs.sort_unstable();
    pairs
}

#[derive(Debug)]
pub struct Actor {
    pub name: String,
}

pub fn actor(name: &str) -> SharedObject {
    Arc::new(Actor {
        name: name.to_string(),
    })
}

pub struct ActorSerializer;

impl TypeSerializer for ActorSerializer {
    fn type_name(&self) -> &str {
        "Actor"
    }

    fn schema(&self) -> Schema {
        Schema::new("Actor", vec![FieldDef::scalar("name", FieldType::String)])
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        let actor = downcast::<Actor>(obj)?;
        sink.write_string("name", Some(&actor.name))
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        Ok(Arc::new(Actor {
            name: view.read_string("name")?.unwrap_or_default(),
        }))
    }
}

pub struct Movie {
    pub id: i64,
    pub title: String,
    pub lead: Option<SharedObject>,
    pub cast: Vec<SharedObject>,
}

pub fn movie(id: i64, title: &str, lead: Option<SharedObject>, cast: Vec<SharedObject>) -> SharedObject {
    Arc::new(Movie {
        id,
        title: title.to_string(),
        lead,
        cast,
    })
}

pub struct MovieSerializer;

impl TypeSerializer for MovieSerializer {
    fn type_name(&self) -> &str {
        "Movie"
    }

    fn schema(&self) -> Schema {
        Schema::new(
            "Movie",
            vec![
                FieldDef::scalar("id", FieldType::Long),
                FieldDef::scalar("title", FieldType::String),
                FieldDef::object("lead", "Actor"),
                FieldDef::list("cast", "Actor"),
            ],
        )
    }

    fn serialize(&self, obj: &SharedObject, sink: &mut dyn RecordSink) -> Result<(), Error> {
        let movie = downcast::<Movie>(obj)?;
        sink.write_long("id", Some(movie.id))?;
        sink.write_string("title", Some(&movie.title))?;
        sink.write_object("lead", movie.lead.as_ref())?;
        let cast: Vec<Option<SharedObject>> = movie.cast.iter().cloned().map(Some).collect();
        sink.write_list("cast", Some(&cast))
    }

    fn deserialize(&self, view: &dyn RecordView) -> Result<SharedObject, Error> {
        let cast = view
            .read_list("cast")?
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        Ok(Arc::new(Movie {
            id: view.read_long("id")?.unwrap_or(0),
            title: view.read_string("title")?.unwrap_or_default(),
            lead: view.read_object("lead")?,
            cast,
        }))
    }
}

pub fn movie_engine(num_images: usize) -> StateEngine {
    init_tracing();
    let mut engine = StateEngine::new(num_images);
    engine.register(Arc::new(ActorSerializer)).unwrap();
    engine.register(Arc::new(MovieSerializer)).unwrap();
    engine
}

pub fn movie_by_id(engine: &StateEngine, id: i64) -> Arc<Movie> {
    for obj in engine.decoded_objects("Movie").unwrap() {
        if downcast::<Movie>(&obj).unwrap().id == id {
            return obj.downcast::<Movie>().unwrap();
        }
    }
    panic!("movie {id} not decoded");
}
