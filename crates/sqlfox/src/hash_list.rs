//! Ordered collection with O(1) lookup and membership by integer key.

use std::collections::HashMap;
use std::ops::Index;

use sqlfox_core::{Error, RelationError, Result};

/// Items addressable by an integer identifier.
///
/// Items without a key (e.g. unsaved instances) are never stored.
pub trait Keyed {
    fn key(&self) -> Option<i64>;
}

/// Anything usable as a lookup key: a raw id or a keyed item.
pub trait AsKey {
    fn as_key(&self) -> Option<i64>;
}

impl AsKey for i64 {
    fn as_key(&self) -> Option<i64> {
        Some(*self)
    }
}

impl<T: Keyed> AsKey for &T {
    fn as_key(&self) -> Option<i64> {
        self.key()
    }
}

/// Insertion-ordered list indexed by key.
#[derive(Debug, Clone)]
pub struct HashList<T> {
    items: Vec<T>,
    index: HashMap<i64, usize>,
}

impl<T> Default for HashList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> HashList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `item`. Returns `false` if it has no key or the key is present.
    pub fn push(&mut self, item: T) -> bool {
        let Some(key) = item.key() else {
            return false;
        };
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.items.len());
        self.items.push(item);
        true
    }

    /// Remove the item stored under `key`.
    ///
    /// Lookup is O(1); the remaining items keep their order, so later
    /// positions shift down and their index slots are rewritten (O(n)).
    pub fn remove(&mut self, key: i64) -> Result<T> {
        let position = self
            .index
            .remove(&key)
            .ok_or(Error::Relation(RelationError::NotInList(key)))?;
        let item = self.items.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(item)
    }

    pub fn contains<K: AsKey>(&self, key: K) -> bool {
        key.as_key().is_some_and(|k| self.index.contains_key(&k))
    }

    /// Item at `position`, in insertion order.
    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    pub fn get_by_key(&self, key: i64) -> Option<&T> {
        self.index.get(&key).map(|&position| &self.items[position])
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<i64> {
        self.items.iter().filter_map(Keyed::key).collect()
    }

    /// Items of `self` whose key is also in `other`, in `self`'s order.
    pub fn intersection(&self, other: &Self) -> Self
    where
        T: Clone,
    {
        self.items
            .iter()
            .filter(|item| other.contains(*item))
            .cloned()
            .collect()
    }

    /// `self` followed by the items of `other` not already present.
    pub fn union(&self, other: &Self) -> Self
    where
        T: Clone,
    {
        let mut out = self.clone();
        for item in &other.items {
            out.push(item.clone());
        }
        out
    }
}

impl<T: Keyed> FromIterator<T> for HashList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = HashList::new();
        for item in iter {
            list.push(item);
        }
        list
    }
}

impl<T> IntoIterator for HashList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a HashList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> Index<usize> for HashList<T> {
    type Output = T;

    fn index(&self, position: usize) -> &T {
        &self.items[position]
    }
}
