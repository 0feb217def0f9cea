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

//! # Wire protocol
//!
//! A length-prefixed binary request/response framing, with no alignment
//! padding and all multi-byte fields little-endian.

use bytes::{BufMut, BytesMut};
use crate::util::compiler;

/// The largest request body, or finished response body, the server will
/// accept/emit. Oversized requests are a protocol error; oversized
/// responses are replaced with a `TAG_ERR(ERR_TOO_BIG)` body instead.
pub const MAX_MSG: usize = 32 << 20;
pub const MAX_ARGS: usize = 200_000;
pub const HEADER_LEN: usize = 4;

pub mod tag {
    pub const NIL: u8 = 0;
    pub const ERR: u8 = 1;
    pub const STR: u8 = 2;
    pub const INT: u8 = 3;
    pub const DBL: u8 = 4;
    pub const ARR: u8 = 5;
}

pub mod err {
    pub const UNKNOWN: u32 = 1;
    pub const TOO_BIG: u32 = 2;
    pub const BAD_TYPE: u32 = 3;
    pub const BAD_ARG: u32 = 4;
}

/// A protocol violation: the connection must be closed without a reply.
pub struct ProtocolError;

/// Attempts to parse exactly one request from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` doesn't yet hold a complete request
/// (caller should wait for more bytes), `Ok(Some((args, consumed)))` on
/// success, where `consumed` is the number of bytes — header included —
/// making up the request, or `Err(ProtocolError)` if framing is invalid
/// and the connection must be torn down.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let body_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if compiler::unlikely(body_len > MAX_MSG) {
        return Err(ProtocolError);
    }
    if buf.len() < HEADER_LEN + body_len {
        return Ok(None);
    }
    let body = &buf[HEADER_LEN..HEADER_LEN + body_len];

    if body.len() < 4 {
        return Err(ProtocolError);
    }
    let nargs = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
    if compiler::unlikely(nargs > MAX_ARGS) {
        return Err(ProtocolError);
    }

    let mut pos = 4;
    let mut args = Vec::with_capacity(nargs.min(64));
    for _ in 0..nargs {
        if body.len() < pos + 4 {
            return Err(ProtocolError);
        }
        let len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if body.len() < pos + len {
            return Err(ProtocolError);
        }
        args.push(body[pos..pos + len].to_vec());
        pos += len;
    }
    if pos != body.len() {
        // trailing bytes past the last declared argument
        return Err(ProtocolError);
    }
    Ok(Some((args, HEADER_LEN + body_len)))
}

/// Builds one tagged response body, then back-patches the length prefix
/// on [`finish`](Self::finish).
pub struct ResponseWriter {
    body: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self { body: BytesMut::new() }
    }

    pub fn nil(&mut self) {
        self.body.put_u8(tag::NIL);
    }

    pub fn err(&mut self, code: u32, msg: &str) {
        self.body.put_u8(tag::ERR);
        self.body.put_u32_le(code);
        self.body.put_u32_le(msg.len() as u32);
        self.body.put_slice(msg.as_bytes());
    }

    pub fn str(&mut self, s: &[u8]) {
        self.body.put_u8(tag::STR);
        self.body.put_u32_le(s.len() as u32);
        self.body.put_slice(s);
    }

    pub fn int(&mut self, v: i64) {
        self.body.put_u8(tag::INT);
        self.body.put_i64_le(v);
    }

    pub fn dbl(&mut self, v: f64) {
        self.body.put_u8(tag::DBL);
        self.body.put_f64_le(v);
    }

    /// Writes an array tag with `n` *tagged values* to follow (the caller
    /// writes them immediately after with further calls on `self`).
    pub fn arr_header(&mut self, n: u32) {
        self.body.put_u8(tag::ARR);
        self.body.put_u32_le(n);
    }

    /// Finalizes the response, truncating and replacing it with
    /// `TAG_ERR(ERR_TOO_BIG)` if it exceeds [`MAX_MSG`], then appends the
    /// length-prefixed frame to `out`.
    pub fn finish(mut self, out: &mut BytesMut) {
        if self.body.len() > MAX_MSG {
            self.body.clear();
            self.err(err::TOO_BIG, "response is too big");
        }
        out.put_u32_le(self.body.len() as u32);
        out.put_slice(&self.body);
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_request(nargs: u32, args: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&nargs.to_le_bytes());
        for a in args {
            body.extend_from_slice(&(a.len() as u32).to_le_bytes());
            body.extend_from_slice(a);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_a_complete_request() {
        let buf = frame_request(2, &[b"GET", b"foo"]);
        let (args, consumed) = parse_request(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(args, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn incomplete_header_waits_for_more_bytes() {
        assert!(parse_request(&[1, 2]).unwrap().is_none());
    }

    #[test]
    fn incomplete_body_waits_for_more_bytes() {
        let buf = frame_request(1, &[b"abc"]);
        assert!(parse_request(&buf[..buf.len() - 2]).unwrap().is_none());
    }

    #[test]
    fn body_len_over_cap_is_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_MSG + 1) as u32).to_le_bytes());
        assert!(parse_request(&buf).is_err());
    }

    #[test]
    fn nargs_over_cap_is_protocol_error() {
        let mut body = Vec::new();
        body.extend_from_slice(&((MAX_ARGS + 1) as u32).to_le_bytes());
        let mut buf = Vec::new();
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        assert!(parse_request(&buf).is_err());
    }

    #[test]
    fn trailing_bytes_are_a_protocol_error() {
        let mut buf = frame_request(1, &[b"abc"]);
        // declare one extra byte in body_len beyond what's actually there
        let extended_len = (buf.len() - HEADER_LEN + 1) as u32;
        buf[0..4].copy_from_slice(&extended_len.to_le_bytes());
        buf.push(0);
        assert!(parse_request(&buf).is_err());
    }

    #[test]
    fn response_roundtrip_tags() {
        let mut out = BytesMut::new();
        let mut w = ResponseWriter::new();
        w.int(42);
        w.finish(&mut out);
        let len = u32::from_le_bytes(out[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, out.len() - 4);
        assert_eq!(out[4], tag::INT);
        assert_eq!(i64::from_le_bytes(out[5..13].try_into().unwrap()), 42);
    }

    #[test]
    fn oversized_response_is_replaced_with_too_big_error() {
        let mut out = BytesMut::new();
        let mut w = ResponseWriter::new();
        w.str(&vec![0u8; MAX_MSG + 1]);
        w.finish(&mut out);
        assert_eq!(out[4], tag::ERR);
        let code = u32::from_le_bytes(out[5..9].try_into().unwrap());
        assert_eq!(code, err::TOO_BIG);
    }
}
