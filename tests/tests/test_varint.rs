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

use deltablob_core::buffer::{
    count_varints, varint32_len, varint_len, varuint_len, Reader, Writer, NULL_BYTE,
};
use deltablob_core::error::Error;

#[test]
fn test_varint32_round_trip_extremes() {
    for v in [i32::MIN, -1, 0, 1, i32::MAX, 127, -128, 300_000, -300_000] {
        let mut w = Writer::new();
        w.write_varint32(v);
        assert_eq!(w.len(), varint32_len(v), "sizeOf mismatch for {v}");
        let bytes = w.into_vec();
        assert_eq!(Reader::new(&bytes).read_varint32().unwrap(), v);
    }
}

#[test]
fn test_varint64_round_trip_extremes() {
    for v in [i64::MIN, -1, 0, 1, i64::MAX, 1 << 40, -(1 << 40)] {
        let mut w = Writer::new();
        w.write_varint64(v);
        assert_eq!(w.len(), varint_len(v), "sizeOf mismatch for {v}");
        let bytes = w.into_vec();
        assert_eq!(Reader::new(&bytes).read_varint64().unwrap(), v);
    }
}

#[test]
fn test_varuint64_size_matches_bytes_written() {
    for v in [0u64, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
        let mut w = Writer::new();
        w.write_varuint64(v);
        assert_eq!(w.len(), varuint_len(v));
        let bytes = w.into_vec();
        assert_eq!(Reader::new(&bytes).read_varuint64().unwrap(), v);
    }
}

#[test]
fn test_null_sentinel_is_fatal_for_required_value() {
    let mut w = Writer::new();
    w.write_null();
    let bytes = w.into_vec();
    assert_eq!(bytes, vec![NULL_BYTE]);
    let err = Reader::new(&bytes).read_varuint64().unwrap_err();
    assert!(matches!(err, Error::CorruptStream(_)));
    // the nullable read accepts the same byte
    assert_eq!(
        Reader::new(&bytes).read_nullable_varuint64().unwrap(),
        None
    );
}

#[test]
fn test_nullable_round_trip() {
    let mut w = Writer::new();
    w.write_nullable_varint32(Some(-42));
    w.write_nullable_varint32(None);
    w.write_nullable_varint64(Some(i64::MIN));
    let bytes = w.into_vec();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.read_nullable_varint32().unwrap(), Some(-42));
    assert_eq!(r.read_nullable_varint32().unwrap(), None);
    assert_eq!(r.read_nullable_varint64().unwrap(), Some(i64::MIN));
    assert_eq!(r.remaining(), 0);
}

#[test]
fn test_count_varints_recovers_element_count() {
    let mut w = Writer::new();
    for v in [0u64, 5, 1_000, 1 << 30] {
        w.write_varuint64(v);
    }
    w.write_null();
    assert_eq!(count_varints(w.as_slice()), 5);
}

#[test]
fn test_utf16_string_round_trip() {
    for s in ["", "plain", "grüß dich", "日本語テキスト", "mixed 漢字 and ascii"] {
        let mut w = Writer::new();
        w.write_utf16_string(s);
        let bytes = w.into_vec();
        assert_eq!(Reader::new(&bytes).read_utf16_string().unwrap(), s);
    }
}

#[test]
fn test_float_null_patterns() {
    let mut w = Writer::new();
    w.write_float(Some(1.5));
    w.write_float(None);
    w.write_double(None);
    w.write_double(Some(-2.25));
    let bytes = w.into_vec();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.read_float().unwrap(), Some(1.5));
    assert_eq!(r.read_float().unwrap(), None);
    assert_eq!(r.read_double().unwrap(), None);
    assert_eq!(r.read_double().unwrap(), Some(-2.25));
}
