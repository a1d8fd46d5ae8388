//! Pattern index: an arena-backed tree of registered patterns.
//!
//! Every distinct pattern string owns one [`PatternEntry`] holding the ordered
//! chain of items registered under it. Entries are linked so that a child is
//! always covered by its parent (every concrete instance of the child is an
//! instance of the parent). That lets a concrete emission skip whole subtrees:
//! if a parent does not match the topic, none of its descendants can.
//!
//! ```text
//! roots
//!  ├── a.**
//!  │    ├── a.*        (covered by a.**)
//!  │    │    └── a.b   (covered by a.*)
//!  │    └── a.x.y
//!  └── *.b
//! ```
//!
//! Entries live in a slot vector and refer to each other by [`EntryId`], so
//! there are no reference cycles. Removing the last item of an entry prunes it
//! and hands its children to its former parent.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::HubResult;
use crate::matcher::Matcher;
use crate::topic::Topic;

/// Stable identifier of an entry inside one index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

/// One registered pattern and its chain
#[derive(Debug)]
pub struct PatternEntry<T> {
    matcher: Matcher,
    chain: Vec<T>,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    seq: u64,
}

impl<T> PatternEntry<T> {
    /// The pattern string
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    /// The compiled matcher
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Items in registration order
    pub fn chain(&self) -> &[T] {
        &self.chain
    }

    /// The covering entry this one hangs under, if any
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Entries covered by this one
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Priority order: specificity, then creation order
    fn priority(&self, other: &Self) -> Ordering {
        self.matcher
            .compare(&other.matcher)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Index of patterns to chains of `T`
#[derive(Debug)]
pub struct PatternIndex<T> {
    delimiter: char,
    slots: Vec<Option<PatternEntry<T>>>,
    free: Vec<usize>,
    by_pattern: HashMap<String, EntryId>,
    roots: Vec<EntryId>,
    next_seq: u64,
}

impl<T> PatternIndex<T> {
    /// Create an empty index for topics using `delimiter`
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            slots: Vec::new(),
            free: Vec::new(),
            by_pattern: HashMap::new(),
            roots: Vec::new(),
            next_seq: 0,
        }
    }

    /// Delimiter used to compile patterns
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Number of distinct patterns
    pub fn len(&self) -> usize {
        self.by_pattern.len()
    }

    /// Whether the index holds no patterns
    pub fn is_empty(&self) -> bool {
        self.by_pattern.is_empty()
    }

    /// Look up the entry for an exact pattern string
    pub fn get(&self, pattern: &str) -> Option<&PatternEntry<T>> {
        self.by_pattern.get(pattern).and_then(|id| self.entry(*id))
    }

    /// Look up an entry by id
    pub fn entry(&self, id: EntryId) -> Option<&PatternEntry<T>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Top-level entries
    pub fn roots(&self) -> &[EntryId] {
        &self.roots
    }

    /// All registered pattern strings, in no particular order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.by_pattern.keys().map(String::as_str)
    }

    /// All entries, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry<T>> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Append `item` to the chain of `pattern`, creating the entry if needed.
    ///
    /// Fails only when the pattern is malformed.
    pub fn insert(&mut self, pattern: &str, item: T) -> HubResult<EntryId> {
        if let Some(&id) = self.by_pattern.get(pattern) {
            if let Some(entry) = self.entry_mut(id) {
                entry.chain.push(item);
            }
            return Ok(id);
        }

        let matcher = Matcher::compile(pattern, self.delimiter)?;
        let id = self.allocate(PatternEntry {
            matcher,
            chain: vec![item],
            parent: None,
            children: Vec::new(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.by_pattern.insert(pattern.to_string(), id);
        self.attach(id);
        Ok(id)
    }

    /// Remove the first item of `pattern`'s chain satisfying `predicate`.
    ///
    /// Returns `None` when the pattern or the item is not registered. The entry
    /// is pruned if its chain becomes empty.
    pub fn remove_where<F>(&mut self, pattern: &str, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let id = *self.by_pattern.get(pattern)?;
        let entry = self.entry_mut(id)?;
        let position = entry.chain.iter().position(|item| predicate(item))?;
        let removed = entry.chain.remove(position);
        if entry.chain.is_empty() {
            self.prune(id);
        }
        Some(removed)
    }

    /// Remove an entry with its whole chain
    pub fn remove_entry(&mut self, pattern: &str) -> Option<Vec<T>> {
        let id = *self.by_pattern.get(pattern)?;
        self.prune(id).map(|entry| entry.chain)
    }

    /// Entries reached by emitting `topic`, most specific first.
    ///
    /// A concrete topic walks the tree and only descends into matching
    /// entries. A wildcard topic reaches every entry it overlaps with; each
    /// entry is returned once.
    pub fn find_matching(&self, topic: &Topic) -> Vec<&PatternEntry<T>> {
        let mut found: Vec<&PatternEntry<T>> = if topic.is_wildcard() {
            self.entries()
                .filter(|entry| entry.matcher.matches(topic))
                .collect()
        } else {
            let mut found = Vec::new();
            let mut stack: Vec<EntryId> = self.roots.clone();
            while let Some(id) = stack.pop() {
                let Some(entry) = self.entry(id) else {
                    continue;
                };
                if entry.matcher.test(topic.as_str()) {
                    found.push(entry);
                    stack.extend(entry.children.iter().copied());
                }
            }
            found
        };

        found.sort_by(|a, b| a.priority(b));
        found
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_pattern.clear();
        self.roots.clear();
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut PatternEntry<T>> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn allocate(&mut self, entry: PatternEntry<T>) -> EntryId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                self.slots.push(Some(entry));
                EntryId(self.slots.len() - 1)
            }
        }
    }

    fn covers(&self, general: EntryId, specific: EntryId) -> bool {
        match (self.entry(general), self.entry(specific)) {
            (Some(g), Some(s)) => g.matcher.covers(&s.matcher),
            _ => false,
        }
    }

    fn children_of(&self, parent: Option<EntryId>) -> Vec<EntryId> {
        match parent {
            Some(id) => self
                .entry(id)
                .map(|entry| entry.children.clone())
                .unwrap_or_default(),
            None => self.roots.clone(),
        }
    }

    fn level_mut(&mut self, parent: Option<EntryId>) -> Option<&mut Vec<EntryId>> {
        match parent {
            Some(id) => self.entry_mut(id).map(|entry| &mut entry.children),
            None => Some(&mut self.roots),
        }
    }

    /// Place a freshly allocated entry in the tree
    fn attach(&mut self, id: EntryId) {
        // Descend through the most specific covering entry at each level
        let mut parent = None;
        loop {
            let next = self
                .children_of(parent)
                .into_iter()
                .filter(|&candidate| candidate != id && self.covers(candidate, id))
                .min_by(|a, b| self.order(*a, *b));
            match next {
                Some(candidate) => parent = Some(candidate),
                None => break,
            }
        }

        // Siblings the new entry covers move underneath it
        let adopted: Vec<EntryId> = self
            .children_of(parent)
            .into_iter()
            .filter(|&sibling| sibling != id && self.covers(id, sibling))
            .collect();

        if let Some(level) = self.level_mut(parent) {
            level.retain(|sibling| !adopted.contains(sibling));
            level.push(id);
        }
        for &child in &adopted {
            if let Some(entry) = self.entry_mut(child) {
                entry.parent = Some(id);
            }
        }
        if let Some(entry) = self.entry_mut(id) {
            entry.parent = parent;
            entry.children.extend(adopted);
        }
    }

    /// Detach and free an entry, re-parenting its children
    fn prune(&mut self, id: EntryId) -> Option<PatternEntry<T>> {
        let entry = self.slots.get_mut(id.0)?.take()?;
        self.by_pattern.remove(entry.pattern());
        self.free.push(id.0);

        if let Some(level) = self.level_mut(entry.parent) {
            level.retain(|&sibling| sibling != id);
            level.extend(entry.children.iter().copied());
        }
        for &child in &entry.children {
            if let Some(child_entry) = self.entry_mut(child) {
                child_entry.parent = entry.parent;
            }
        }

        Some(entry)
    }

    fn order(&self, a: EntryId, b: EntryId) -> Ordering {
        match (self.entry(a), self.entry(b)) {
            (Some(a), Some(b)) => a.priority(b),
            _ => Ordering::Equal,
        }
    }
}
