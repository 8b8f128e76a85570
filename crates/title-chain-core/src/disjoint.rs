//! A small generic disjoint-set (union-find) structure.
//!
//! Used by identity clustering so that A↔B and A↔C matches land in one
//! cluster even when B and C were never compared directly. Elements are
//! interned on first sight; parent pointers use path compression and union
//! by size.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct DisjointSet<T> {
    index: HashMap<T, usize>,
    items: Vec<T>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl<T: Clone + Eq + Hash> DisjointSet<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            items: Vec::new(),
            parent: Vec::new(),
            size: Vec::new(),
        }
    }

    /// Add an element as its own singleton set. No-op if already present.
    pub fn insert(&mut self, item: T) -> usize {
        if let Some(&i) = self.index.get(&item) {
            return i;
        }
        let i = self.items.len();
        self.index.insert(item.clone(), i);
        self.items.push(item);
        self.parent.push(i);
        self.size.push(1);
        i
    }

    fn find_index(&mut self, mut i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[i] != root {
            let next = self.parent[i];
            self.parent[i] = root;
            i = next;
        }
        root
    }

    /// Representative of the set containing `item`, if `item` is known.
    pub fn find(&mut self, item: &T) -> Option<T> {
        let i = *self.index.get(item)?;
        let root = self.find_index(i);
        Some(self.items[root].clone())
    }

    /// Merge the sets containing `a` and `b`, inserting either if new.
    /// Returns `false` when they were already in the same set.
    pub fn union(&mut self, a: T, b: T) -> bool {
        let ia = self.insert(a);
        let ib = self.insert(b);
        let (ra, rb) = (self.find_index(ia), self.find_index(ib));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    pub fn connected(&mut self, a: &T, b: &T) -> bool {
        match (self.index.get(a).copied(), self.index.get(b).copied()) {
            (Some(ia), Some(ib)) => self.find_index(ia) == self.find_index(ib),
            _ => false,
        }
    }

    /// All sets, each listed in insertion order of its members; sets are
    /// ordered by their earliest member.
    pub fn groups(&mut self) -> Vec<Vec<T>> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<T>> = Vec::new();
        for i in 0..self.items.len() {
            let root = self.find_index(i);
            let slot = *by_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(self.items[i].clone());
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone + Eq + Hash> Default for DisjointSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
