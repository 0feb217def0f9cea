/*
 * Created on Sat Jan 29 2022
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2022, Sayan Nandan <ohsayan@outlook.com>
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

pub mod compiler;
pub mod error;

/// The FNV-derived string hash used to index both the top-level keyspace
/// and each sorted set's by-name index. Matches the constants and mixing
/// step of the reference implementation's `str_hash`.
pub fn str_hash(data: &[u8]) -> u64 {
    let mut h: u64 = 0x811C_9DC5;
    for byte in data {
        h = (h.wrapping_add(*byte as u64)).wrapping_mul(0x0100_0193);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::str_hash;

    #[test]
    fn same_bytes_same_hash() {
        assert_eq!(str_hash(b"hello"), str_hash(b"hello"));
    }

    #[test]
    fn different_bytes_usually_differ() {
        assert_ne!(str_hash(b"hello"), str_hash(b"world"));
    }

    #[test]
    fn empty_input_is_stable() {
        assert_eq!(str_hash(b""), 0x811C_9DC5);
    }
}
