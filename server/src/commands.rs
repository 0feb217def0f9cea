/*
 * Created on Sun May 09 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # Command dispatcher
//!
//! Picks a handler by `(argv[0], argc)` and runs it against the
//! keyspace. Every handler writes exactly one tagged reply.

use crate::engine::store::{Store, Value};
use crate::protocol::{err, ResponseWriter};

pub fn dispatch(store: &mut Store, args: &[Vec<u8>], resp: &mut ResponseWriter) {
    if args.is_empty() {
        resp.err(err::UNKNOWN, "empty command");
        return;
    }
    let argc = args.len();
    match (args[0].as_slice(), argc) {
        (b"GET", 2) => do_get(store, &args[1], resp),
        (b"SET", 3) => do_set(store, &args[1], &args[2], resp),
        (b"DEL", 2) => do_del(store, &args[1], resp),
        (b"KEYS", 1) => do_keys(store, resp),
        (b"ZADD", 4) => do_zadd(store, &args[1], &args[2], &args[3], resp),
        (b"ZREM", 3) => do_zrem(store, &args[1], &args[2], resp),
        (b"ZSCORE", 3) => do_zscore(store, &args[1], &args[2], resp),
        (b"ZQUERY", 6) => do_zquery(store, &args[1], &args[2], &args[3], &args[4], &args[5], resp),
        _ => resp.err(err::UNKNOWN, "unknown command"),
    }
}

/// Parses a float the way the reference `str2dbl` does: the whole
/// argument must be consumed and the result must not be NaN.
fn parse_f64(raw: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(raw).ok()?;
    let v: f64 = s.parse().ok()?;
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(raw).ok()?;
    s.parse().ok()
}

fn do_get(store: &mut Store, key: &[u8], resp: &mut ResponseWriter) {
    match store.get(key) {
        Some(Value::Str(v)) => resp.str(v),
        Some(Value::ZSet(_)) => resp.err(err::BAD_TYPE, "not a string value"),
        None => resp.nil(),
    }
}

fn do_set(store: &mut Store, key: &[u8], value: &[u8], resp: &mut ResponseWriter) {
    match store.set_str(key, value.to_vec()) {
        Ok(()) => resp.nil(),
        Err(()) => resp.err(err::BAD_TYPE, "not a string value"),
    }
}

fn do_del(store: &mut Store, key: &[u8], resp: &mut ResponseWriter) {
    resp.int(store.remove(key) as i64);
}

fn do_keys(store: &mut Store, resp: &mut ResponseWriter) {
    let mut keys = Vec::with_capacity(store.len());
    store.for_each_key(|k| keys.push(k.to_vec()));
    resp.arr_header(keys.len() as u32);
    for k in keys {
        resp.str(&k);
    }
}

fn do_zadd(store: &mut Store, zkey: &[u8], score_raw: &[u8], name: &[u8], resp: &mut ResponseWriter) {
    let score = match parse_f64(score_raw) {
        Some(s) => s,
        None => return resp.err(err::BAD_ARG, "expected a finite float"),
    };
    match store.zset_mut(zkey) {
        Ok(zset) => {
            let is_new = zset.insert(name, score).is_none();
            resp.int(is_new as i64);
        }
        Err(()) => resp.err(err::BAD_TYPE, "expected a sorted set"),
    }
}

fn do_zrem(store: &mut Store, zkey: &[u8], name: &[u8], resp: &mut ResponseWriter) {
    match zset_readonly(store, zkey) {
        Ok(None) => resp.int(0),
        Ok(Some(_)) => {
            // re-borrow mutably now that we know the key is a zset
            let zset = store.zset_mut(zkey).expect("checked above");
            resp.int(zset.delete(name) as i64);
        }
        Err(()) => resp.err(err::BAD_TYPE, "expected a sorted set"),
    }
}

fn do_zscore(store: &mut Store, zkey: &[u8], name: &[u8], resp: &mut ResponseWriter) {
    match zset_readonly(store, zkey) {
        Ok(None) => resp.nil(),
        Ok(Some(())) => {
            let zset = store.zset_mut(zkey).expect("checked above");
            match zset.score(name) {
                Some(s) => resp.dbl(s),
                None => resp.nil(),
            }
        }
        Err(()) => resp.err(err::BAD_TYPE, "expected a sorted set"),
    }
}

#[allow(clippy::too_many_arguments)]
fn do_zquery(
    store: &mut Store,
    zkey: &[u8],
    score_raw: &[u8],
    name: &[u8],
    offset_raw: &[u8],
    limit_raw: &[u8],
    resp: &mut ResponseWriter,
) {
    let score = match parse_f64(score_raw) {
        Some(s) => s,
        None => return resp.err(err::BAD_ARG, "expected a float"),
    };
    let (offset, limit) = match (parse_i64(offset_raw), parse_i64(limit_raw)) {
        (Some(o), Some(l)) => (o, l),
        _ => return resp.err(err::BAD_ARG, "expected an integer"),
    };

    let found = match zset_readonly(store, zkey) {
        Ok(found) => found,
        Err(()) => return resp.err(err::BAD_TYPE, "expected a sorted set"),
    };
    if limit <= 0 || found.is_none() {
        resp.arr_header(0);
        return;
    }

    let zset = store.zset_mut(zkey).expect("checked above");
    let mut node = zset.seek_ge(score, name);
    if offset != 0 {
        node = node.and_then(|n| zset.offset(n, offset));
    }

    let mut items = Vec::new();
    let mut cur = node;
    while let Some(id) = cur {
        if items.len() as i64 >= limit {
            break;
        }
        let (member_name, member_score) = zset.member(id);
        items.push((member_name.to_vec(), member_score));
        cur = zset.offset(id, 1);
    }
    resp.arr_header((items.len() * 2) as u32);
    for (n, s) in items {
        resp.str(&n);
        resp.dbl(s);
    }
}

/// Mirrors the reference `expect_zset`: an absent key is treated as an
/// empty sorted set (`Ok(None)`), a present zset is `Ok(Some(()))`, and a
/// present non-zset is a type error.
fn zset_readonly(store: &mut Store, key: &[u8]) -> Result<Option<()>, ()> {
    match store.get(key) {
        None => Ok(None),
        Some(Value::ZSet(_)) => Ok(Some(())),
        Some(Value::Str(_)) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tag;

    fn run(store: &mut Store, args: &[&[u8]]) -> Vec<u8> {
        let mut resp = ResponseWriter::new();
        let owned: Vec<Vec<u8>> = args.iter().map(|a| a.to_vec()).collect();
        dispatch(store, &owned, &mut resp);
        let mut out = bytes::BytesMut::new();
        resp.finish(&mut out);
        out.to_vec()
    }

    #[test]
    fn set_get_del_roundtrip() {
        let mut store = Store::new();
        let r = run(&mut store, &[b"SET", b"foo", b"bar"]);
        assert_eq!(r[4], tag::NIL);
        let r = run(&mut store, &[b"GET", b"foo"]);
        assert_eq!(r[4], tag::STR);
        let r = run(&mut store, &[b"DEL", b"foo"]);
        assert_eq!(r[4], tag::INT);
        assert_eq!(i64::from_le_bytes(r[5..13].try_into().unwrap()), 1);
        let r = run(&mut store, &[b"GET", b"foo"]);
        assert_eq!(r[4], tag::NIL);
    }

    #[test]
    fn zadd_reports_new_vs_updated() {
        let mut store = Store::new();
        let r = run(&mut store, &[b"ZADD", b"s", b"1.0", b"a"]);
        assert_eq!(i64::from_le_bytes(r[5..13].try_into().unwrap()), 1);
        let r = run(&mut store, &[b"ZADD", b"s", b"2.0", b"a"]);
        assert_eq!(i64::from_le_bytes(r[5..13].try_into().unwrap()), 0);
        let r = run(&mut store, &[b"ZSCORE", b"s", b"a"]);
        assert_eq!(r[4], tag::DBL);
        assert_eq!(f64::from_le_bytes(r[5..13].try_into().unwrap()), 2.0);
    }

    #[test]
    fn type_mismatch_reports_bad_type() {
        let mut store = Store::new();
        run(&mut store, &[b"SET", b"k", b"v"]);
        let r = run(&mut store, &[b"ZADD", b"k", b"1", b"a"]);
        assert_eq!(r[4], tag::ERR);
        let code = u32::from_le_bytes(r[5..9].try_into().unwrap());
        assert_eq!(code, err::BAD_TYPE);
    }

    #[test]
    fn zquery_full_range_ascending() {
        let mut store = Store::new();
        run(&mut store, &[b"ZADD", b"s", b"1", b"a"]);
        run(&mut store, &[b"ZADD", b"s", b"2", b"b"]);
        run(&mut store, &[b"ZADD", b"s", b"3", b"c"]);
        let r = run(&mut store, &[b"ZQUERY", b"s", b"0", b"", b"0", b"10"]);
        assert_eq!(r[4], tag::ARR);
        let n = u32::from_le_bytes(r[5..9].try_into().unwrap());
        assert_eq!(n, 6);
    }

    #[test]
    fn zquery_on_absent_key_is_empty_not_bad_type() {
        let mut store = Store::new();
        let r = run(&mut store, &[b"ZQUERY", b"missing", b"0", b"", b"0", b"10"]);
        assert_eq!(r[4], tag::ARR);
        let n = u32::from_le_bytes(r[5..9].try_into().unwrap());
        assert_eq!(n, 0);
    }

    #[test]
    fn zadd_rejects_nan_score() {
        let mut store = Store::new();
        let r = run(&mut store, &[b"ZADD", b"s", b"nan", b"a"]);
        assert_eq!(r[4], tag::ERR);
        let code = u32::from_le_bytes(r[5..9].try_into().unwrap());
        assert_eq!(code, err::BAD_ARG);
    }

    #[test]
    fn unknown_command_or_arity_mismatch() {
        let mut store = Store::new();
        let r = run(&mut store, &[b"NOPE"]);
        assert_eq!(r[4], tag::ERR);
        let r = run(&mut store, &[b"GET", b"too", b"many"]);
        assert_eq!(r[4], tag::ERR);
    }

    #[test]
    fn keys_lists_every_top_level_key() {
        let mut store = Store::new();
        run(&mut store, &[b"SET", b"a", b"1"]);
        run(&mut store, &[b"ZADD", b"z", b"1", b"m"]);
        let r = run(&mut store, &[b"KEYS"]);
        assert_eq!(r[4], tag::ARR);
        let n = u32::from_le_bytes(r[5..9].try_into().unwrap());
        assert_eq!(n, 2);
    }
}
