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

//! # Sorted sets
//!
//! A `ZSet` composes the [`avl`] tree, ordered by `(score, name)`, with an
//! [`IncrementalHashMap`] keyed by name, over one shared member arena —
//! the same pairing the reference `ZSet`/`ZNode` use, except the two
//! index structures here never own the member data themselves, they only
//! hold `NodeId`s into the arena.

use super::avl::{self, AvlStore, NodeId};
use super::hashtable::IncrementalHashMap;
use crate::util::str_hash;

#[derive(Default)]
pub struct Member {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    size: u32,
    pub name: Vec<u8>,
    pub score: f64,
}

#[derive(Default)]
struct MemberArena {
    slots: Vec<Option<Member>>,
    free: Vec<NodeId>,
}

impl MemberArena {
    fn alloc(&mut self, member: Member) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(member);
            id
        } else {
            self.slots.push(Some(member));
            (self.slots.len() - 1) as NodeId
        }
    }

    fn free(&mut self, id: NodeId) {
        self.slots[id as usize] = None;
        self.free.push(id);
    }

    fn get(&self, id: NodeId) -> &Member {
        self.slots[id as usize].as_ref().unwrap()
    }

    fn get_mut(&mut self, id: NodeId) -> &mut Member {
        self.slots[id as usize].as_mut().unwrap()
    }
}

impl AvlStore for MemberArena {
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).parent
    }
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).left
    }
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).right
    }
    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.get_mut(id).parent = parent;
    }
    fn set_left(&mut self, id: NodeId, left: Option<NodeId>) {
        self.get_mut(id).left = left;
    }
    fn set_right(&mut self, id: NodeId, right: Option<NodeId>) {
        self.get_mut(id).right = right;
    }
    fn height(&self, id: NodeId) -> u32 {
        self.get(id).height
    }
    fn size(&self, id: NodeId) -> u32 {
        self.get(id).size
    }
    fn set_height(&mut self, id: NodeId, height: u32) {
        self.get_mut(id).height = height;
    }
    fn set_size(&mut self, id: NodeId, size: u32) {
        self.get_mut(id).size = size;
    }
}

/// Total order over members: by score first, then by name bytes. Scores
/// are never `NaN` — callers reject that at parse time — so a plain
/// tuple comparison is safe.
fn member_less(arena: &MemberArena, a: NodeId, b: NodeId) -> bool {
    let (ma, mb) = (arena.get(a), arena.get(b));
    (ma.score, ma.name.as_slice()) < (mb.score, mb.name.as_slice())
}

#[derive(Default)]
pub struct ZSet {
    arena: MemberArena,
    root: Option<NodeId>,
    index: IncrementalHashMap<NodeId>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Inserts `name` with `score`, or moves it to its new position if it
    /// already exists. Returns the previous score, if any.
    pub fn insert(&mut self, name: &[u8], score: f64) -> Option<f64> {
        let hash = str_hash(name);
        let existing = self.index.lookup(hash, |id| self.arena.get(id).name == name);
        if let Some(id) = existing {
            let old_score = self.arena.get(id).score;
            self.root = avl::delete(&mut self.arena, id);
            self.arena.get_mut(id).name = name.to_vec();
            self.arena.get_mut(id).score = score;
            self.root = Some(avl::insert_with(&mut self.arena, self.root, id, member_less));
            Some(old_score)
        } else {
            let id = self.arena.alloc(Member {
                name: name.to_vec(),
                score,
                ..Default::default()
            });
            self.root = Some(avl::insert_with(&mut self.arena, self.root, id, member_less));
            self.index.insert(hash, id);
            None
        }
    }

    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let hash = str_hash(name);
        let id = self.index.lookup(hash, |id| self.arena.get(id).name == name)?;
        Some(self.arena.get(id).score)
    }

    pub fn delete(&mut self, name: &[u8]) -> bool {
        let hash = str_hash(name);
        match self.index.delete(hash, |id| self.arena.get(id).name == name) {
            Some(id) => {
                self.root = avl::delete(&mut self.arena, id);
                self.arena.free(id);
                true
            }
            None => false,
        }
    }

    /// The in-order successor walk entry point: the first member whose
    /// `(score, name)` is `>=` the given key, or `None` past the end.
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<NodeId> {
        let mut cur = self.root?;
        let mut found = None;
        loop {
            let m = self.arena.get(cur);
            let cur_less = (m.score, m.name.as_slice()) < (score, name);
            if cur_less {
                match self.arena.right(cur) {
                    Some(r) => cur = r,
                    None => break,
                }
            } else {
                found = Some(cur);
                match self.arena.left(cur) {
                    Some(l) => cur = l,
                    None => break,
                }
            }
        }
        found
    }

    pub fn offset(&self, node: NodeId, delta: i64) -> Option<NodeId> {
        avl::offset(&self.arena, node, delta)
    }

    pub fn member(&self, id: NodeId) -> (&[u8], f64) {
        let m = self.arena.get(id);
        (&m.name, m.score)
    }

    pub fn clear(&mut self) {
        self.arena = MemberArena::default();
        self.root = None;
        self.index = IncrementalHashMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_from(zset: &ZSet, mut id: Option<NodeId>, limit: usize) -> Vec<(Vec<u8>, f64)> {
        let mut out = Vec::new();
        while let Some(cur) = id {
            if out.len() >= limit {
                break;
            }
            let (name, score) = zset.member(cur);
            out.push((name.to_vec(), score));
            id = zset.offset(cur, 1);
        }
        out
    }

    #[test]
    fn insert_and_score_roundtrip() {
        let mut z = ZSet::new();
        assert_eq!(z.insert(b"alice", 1.5), None);
        assert_eq!(z.insert(b"bob", 3.0), None);
        assert_eq!(z.score(b"alice"), Some(1.5));
        assert_eq!(z.score(b"bob"), Some(3.0));
        assert_eq!(z.score(b"carol"), None);
        assert_eq!(z.len(), 2);
    }

    #[test]
    fn reinsert_updates_score_and_position() {
        let mut z = ZSet::new();
        z.insert(b"alice", 1.0);
        z.insert(b"bob", 2.0);
        let prev = z.insert(b"alice", 5.0);
        assert_eq!(prev, Some(1.0));
        assert_eq!(z.len(), 2);
        let first = z.seek_ge(f64::MIN, b"").unwrap();
        let ordered = collect_from(&z, Some(first), 10);
        assert_eq!(ordered, vec![(b"bob".to_vec(), 2.0), (b"alice".to_vec(), 5.0)]);
    }

    #[test]
    fn delete_removes_member() {
        let mut z = ZSet::new();
        z.insert(b"a", 1.0);
        z.insert(b"b", 2.0);
        assert!(z.delete(b"a"));
        assert!(!z.delete(b"a"));
        assert_eq!(z.score(b"a"), None);
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn ordering_breaks_ties_by_name() {
        let mut z = ZSet::new();
        for name in [b"charlie".to_vec(), b"alpha".to_vec(), b"bravo".to_vec()] {
            z.insert(&name, 1.0);
        }
        let first = z.seek_ge(f64::MIN, b"").unwrap();
        let ordered = collect_from(&z, Some(first), 10);
        assert_eq!(
            ordered,
            vec![
                (b"alpha".to_vec(), 1.0),
                (b"bravo".to_vec(), 1.0),
                (b"charlie".to_vec(), 1.0),
            ]
        );
    }

    #[test]
    fn seek_ge_finds_range_start_and_offset_walks_full_range() {
        let mut z = ZSet::new();
        for i in 0..20 {
            z.insert(format!("m{i:02}").as_bytes(), i as f64);
        }
        let start = z.seek_ge(10.0, b"").unwrap();
        let page = collect_from(&z, Some(start), 5);
        let expected: Vec<_> = (10..15).map(|i| (format!("m{i:02}").into_bytes(), i as f64)).collect();
        assert_eq!(page, expected);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut z = ZSet::new();
        z.insert(b"a", 1.0);
        z.insert(b"b", 2.0);
        z.clear();
        assert!(z.is_empty());
        assert_eq!(z.score(b"a"), None);
    }
}
