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

//! # Incrementally-rehashing hash table
//!
//! A chained, power-of-two hash table that migrates a bounded amount of
//! work into a fresh, doubled table on every mutation instead of stopping
//! the world to rehash everything at once. This mirrors the reference
//! `HMap`/`HTab` pair exactly (same load factor, same 128-unit migration
//! quantum, same newer-before-older lookup order) but never owns the
//! values it indexes: each entry is just `(hash, id)`, where `id` is an
//! opaque handle into whatever arena the caller owns. The same table type
//! backs both the top-level keyspace and each sorted set's by-name index.

const INITIAL_CAPACITY: usize = 4;
const MAX_LOAD_FACTOR: usize = 8;
const REHASHING_WORK_QUANTUM: usize = 128;

struct HNode<Id> {
    next: Option<u32>,
    hash: u64,
    id: Id,
}

/// A single fixed-capacity chained table. Buckets are a power-of-two
/// sized array of chain heads; nodes live in a slot arena with a free
/// list so deleted slots are recycled instead of leaking.
struct Table<Id> {
    nodes: Vec<Option<HNode<Id>>>,
    free: Vec<u32>,
    buckets: Vec<Option<u32>>,
    size: usize,
}

impl<Id: Copy> Table<Id> {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            buckets: Vec::new(),
            size: 0,
        }
    }

    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && (capacity & (capacity - 1)) == 0);
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            buckets: vec![None; capacity],
            size: 0,
        }
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn alloc(&mut self, node: HNode<Id>) -> u32 {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            (self.nodes.len() - 1) as u32
        }
    }

    /// Insertion always pushes to the head of its bucket's chain, so it's
    /// O(1).
    fn insert(&mut self, hash: u64, id: Id) {
        let pos = (hash as usize) & self.mask();
        let next = self.buckets[pos];
        let slot = self.alloc(HNode { next, hash, id });
        self.buckets[pos] = Some(slot);
        self.size += 1;
    }

    fn find(&self, hash: u64, mut eq: impl FnMut(Id) -> bool) -> Option<Id> {
        if self.buckets.is_empty() {
            return None;
        }
        let pos = (hash as usize) & self.mask();
        let mut cur = self.buckets[pos];
        while let Some(slot) = cur {
            let node = self.nodes[slot as usize].as_ref().unwrap();
            if node.hash == hash && eq(node.id) {
                return Some(node.id);
            }
            cur = node.next;
        }
        None
    }

    fn detach(&mut self, hash: u64, mut eq: impl FnMut(Id) -> bool) -> Option<Id> {
        if self.buckets.is_empty() {
            return None;
        }
        let pos = (hash as usize) & self.mask();
        let mut prev: Option<u32> = None;
        let mut cur = self.buckets[pos];
        while let Some(slot) = cur {
            let (matched, next) = {
                let node = self.nodes[slot as usize].as_ref().unwrap();
                (node.hash == hash && eq(node.id), node.next)
            };
            if matched {
                match prev {
                    Some(p) => self.nodes[p as usize].as_mut().unwrap().next = next,
                    None => self.buckets[pos] = next,
                }
                let id = self.nodes[slot as usize].take().unwrap().id;
                self.free.push(slot);
                self.size -= 1;
                return Some(id);
            }
            prev = Some(slot);
            cur = next;
        }
        None
    }

    /// Detaches the head node of bucket `pos`, if any — used only by the
    /// migration step, which doesn't care which node it moves as long as
    /// it moves exactly one.
    fn take_head(&mut self, pos: usize) -> Option<(u64, Id)> {
        let slot = self.buckets[pos]?;
        let node = self.nodes[slot as usize].take().unwrap();
        self.buckets[pos] = node.next;
        self.free.push(slot);
        self.size -= 1;
        Some((node.hash, node.id))
    }

    fn for_each(&self, mut f: impl FnMut(Id) -> bool) -> bool {
        for head in &self.buckets {
            let mut cur = *head;
            while let Some(slot) = cur {
                let node = self.nodes[slot as usize].as_ref().unwrap();
                if !f(node.id) {
                    return false;
                }
                cur = node.next;
            }
        }
        true
    }
}

/// The resizable hash table: a "newer" table that's always current and an
/// "older" table being drained into it. At most one migration is ever in
/// progress; `older ∪ newer` is always the logical content of the map.
pub struct IncrementalHashMap<Id> {
    newer: Table<Id>,
    older: Table<Id>,
    migrate_pos: usize,
}

impl<Id: Copy> Default for IncrementalHashMap<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Copy> IncrementalHashMap<Id> {
    pub fn new() -> Self {
        Self {
            newer: Table::empty(),
            older: Table::empty(),
            migrate_pos: 0,
        }
    }

    /// Moves up to [`REHASHING_WORK_QUANTUM`] entries from `older` into
    /// `newer`. Called at the start of every public operation, so no
    /// single call ever does more than a bounded amount of migration
    /// work regardless of how large `older` is.
    fn rehash_step(&mut self) {
        let mut moved = 0;
        while moved < REHASHING_WORK_QUANTUM && self.older.size > 0 {
            while self.migrate_pos < self.older.buckets.len()
                && self.older.buckets[self.migrate_pos].is_none()
            {
                self.migrate_pos += 1;
            }
            if self.migrate_pos >= self.older.buckets.len() {
                break;
            }
            if let Some((hash, id)) = self.older.take_head(self.migrate_pos) {
                self.newer.insert(hash, id);
                moved += 1;
            }
        }
        if self.older.size == 0 && !self.older.buckets.is_empty() {
            self.older = Table::empty();
            self.migrate_pos = 0;
        }
    }

    fn trigger_rehash(&mut self) {
        debug_assert!(self.older.buckets.is_empty());
        let doubled = self.newer.buckets.len() * 2;
        self.older = std::mem::replace(&mut self.newer, Table::with_capacity(doubled));
        self.migrate_pos = 0;
    }

    /// Inserts `id` under `hash`, always into the newer table, then
    /// performs bounded migration work. May trigger a new migration if
    /// the newer table is overloaded (`size >= 8 * capacity`) and none is
    /// already running.
    pub fn insert(&mut self, hash: u64, id: Id) {
        if self.newer.buckets.is_empty() {
            self.newer = Table::with_capacity(INITIAL_CAPACITY);
        }
        self.newer.insert(hash, id);
        if self.older.buckets.is_empty() {
            let threshold = self.newer.buckets.len() * MAX_LOAD_FACTOR;
            if self.newer.size >= threshold {
                self.trigger_rehash();
            }
        }
        self.rehash_step();
    }

    /// Looks up an id by hash, consulting the newer table first and
    /// falling back to the older one while a migration is in flight.
    pub fn lookup(&mut self, hash: u64, mut eq: impl FnMut(Id) -> bool) -> Option<Id> {
        self.rehash_step();
        self.newer
            .find(hash, &mut eq)
            .or_else(|| self.older.find(hash, &mut eq))
    }

    /// Removes and returns the id matching `hash`/`eq`, if any.
    pub fn delete(&mut self, hash: u64, mut eq: impl FnMut(Id) -> bool) -> Option<Id> {
        self.rehash_step();
        self.newer
            .detach(hash, &mut eq)
            .or_else(|| self.older.detach(hash, &mut eq))
    }

    pub fn len(&self) -> usize {
        self.newer.size + self.older.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every id in both tables in unspecified order, stopping early
    /// if `f` returns `false`.
    pub fn for_each(&self, mut f: impl FnMut(Id) -> bool) {
        if self.newer.for_each(&mut f) {
            self.older.for_each(&mut f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::str_hash;

    fn key_hash(k: &str) -> u64 {
        str_hash(k.as_bytes())
    }

    #[test]
    fn insert_lookup_roundtrip() {
        let mut map: IncrementalHashMap<usize> = IncrementalHashMap::new();
        let keys: Vec<String> = (0..2000).map(|i| format!("key-{i}")).collect();
        for (id, k) in keys.iter().enumerate() {
            map.insert(key_hash(k), id);
        }
        assert_eq!(map.len(), keys.len());
        for (id, k) in keys.iter().enumerate() {
            let found = map.lookup(key_hash(k), |got| got == id);
            assert_eq!(found, Some(id));
        }
    }

    #[test]
    fn delete_removes_and_shrinks_len() {
        let mut map: IncrementalHashMap<usize> = IncrementalHashMap::new();
        let keys: Vec<String> = (0..500).map(|i| format!("k{i}")).collect();
        for (id, k) in keys.iter().enumerate() {
            map.insert(key_hash(k), id);
        }
        for (id, k) in keys.iter().enumerate().step_by(2) {
            let removed = map.delete(key_hash(k), |got| got == id);
            assert_eq!(removed, Some(id));
        }
        assert_eq!(map.len(), keys.len() / 2);
        for (id, k) in keys.iter().enumerate() {
            let still_there = map.lookup(key_hash(k), |got| got == id).is_some();
            assert_eq!(still_there, id % 2 == 1);
        }
    }

    #[test]
    fn for_each_visits_everything_once() {
        let mut map: IncrementalHashMap<usize> = IncrementalHashMap::new();
        let n = 1000;
        for id in 0..n {
            map.insert(key_hash(&format!("x{id}")), id);
        }
        let mut seen = vec![false; n];
        map.for_each(|id| {
            assert!(!seen[id], "visited twice");
            seen[id] = true;
            true
        });
        assert!(seen.iter().all(|&v| v));
    }

    #[test]
    fn migration_completes_in_bounded_ops_once_growth_stops() {
        let mut map: IncrementalHashMap<usize> = IncrementalHashMap::new();
        // push past the load factor threshold enough times to guarantee at
        // least one migration is mid-flight
        for id in 0..600 {
            map.insert(key_hash(&format!("m{id}")), id);
        }
        assert!(map.older.size > 0, "expected a migration in progress");
        let older_len = map.older.size;
        let bound = older_len.div_ceil(REHASHING_WORK_QUANTUM).max(1);
        // further no-op lookups still drive bounded migration work
        for _ in 0..bound {
            map.lookup(0xdead_beef, |_| false);
        }
        assert_eq!(map.older.size, 0, "migration should have drained older");
    }
}
