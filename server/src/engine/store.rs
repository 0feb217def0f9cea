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

//! # The top-level keyspace
//!
//! One [`IncrementalHashMap`] keyed by key bytes, indexing an arena of
//! entries each holding either a string or a sorted set. Type checking
//! (does `ZADD` target a string key?) is left to the command layer —
//! this module just stores whatever [`Value`] it's given and hands it
//! back by reference, the same division of responsibility as the
//! reference implementation's untyped `g_data` table.

use super::zset::ZSet;
use crate::util::str_hash;

pub enum Value {
    Str(Vec<u8>),
    ZSet(ZSet),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::ZSet(_) => "zset",
        }
    }
}

struct Entry {
    key: Vec<u8>,
    value: Value,
}

#[derive(Default)]
pub struct Store {
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    index: super::hashtable::IncrementalHashMap<u32>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    fn alloc(&mut self, entry: Entry) -> u32 {
        if let Some(id) = self.free.pop() {
            self.entries[id as usize] = Some(entry);
            id
        } else {
            self.entries.push(Some(entry));
            (self.entries.len() - 1) as u32
        }
    }

    fn find_id(&mut self, key: &[u8]) -> Option<u32> {
        let hash = str_hash(key);
        let entries = &self.entries;
        self.index
            .lookup(hash, |id| entries[id as usize].as_ref().unwrap().key == key)
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        let id = self.find_id(key)?;
        Some(&self.entries[id as usize].as_ref().unwrap().value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        let id = self.find_id(key)?;
        Some(&mut self.entries[id as usize].as_mut().unwrap().value)
    }

    /// Sets `key` to `value`, creating the entry if absent. Fails without
    /// writing anything if `key` already exists as a sorted set — a
    /// key's kind is locked in for its lifetime (§3).
    pub fn set_str(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), ()> {
        match self.find_id(key) {
            Some(id) => match &mut self.entries[id as usize].as_mut().unwrap().value {
                Value::Str(v) => {
                    *v = value;
                    Ok(())
                }
                Value::ZSet(_) => Err(()),
            },
            None => {
                let hash = str_hash(key);
                let id = self.alloc(Entry {
                    key: key.to_vec(),
                    value: Value::Str(value),
                });
                self.index.insert(hash, id);
                Ok(())
            }
        }
    }

    /// Returns the sorted set at `key`, creating an empty one if the key
    /// is absent. Fails without creating anything if the key exists as a
    /// string.
    pub fn zset_mut(&mut self, key: &[u8]) -> Result<&mut ZSet, ()> {
        if self.find_id(key).is_none() {
            let hash = str_hash(key);
            let id = self.alloc(Entry {
                key: key.to_vec(),
                value: Value::ZSet(ZSet::new()),
            });
            self.index.insert(hash, id);
        }
        match self.get_mut(key).unwrap() {
            Value::ZSet(z) => Ok(z),
            Value::Str(_) => Err(()),
        }
    }

    /// Deletes `key` regardless of whether it holds a string or a sorted
    /// set, returning whether anything was removed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let hash = str_hash(key);
        let entries = &self.entries;
        let found = self
            .index
            .delete(hash, |id| entries[id as usize].as_ref().unwrap().key == key);
        match found {
            Some(id) => {
                self.entries[id as usize] = None;
                self.free.push(id);
                true
            }
            None => false,
        }
    }

    pub fn for_each_key(&self, mut f: impl FnMut(&[u8])) {
        self.index.for_each(|id| {
            f(&self.entries[id as usize].as_ref().unwrap().key);
            true
        });
    }
}
