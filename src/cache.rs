//! Per-node sample caches and the bounded store holding them.

use crate::arena::NodeId;
use crate::samples::Samples;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Training,
    Validation,
}

impl Split {
    pub fn index(self) -> usize {
        match self {
            Split::Training => 0,
            Split::Validation => 1,
        }
    }
}

/// (example index, value) pairs sorted by value, missing values excluded.
pub type SortedValues = Arc<Vec<(u32, f64)>>;

#[derive(Clone, Debug, Default)]
pub struct NodeCache {
    samples: [Option<Samples>; 2],
    convertible_to_scalar: bool,
    sorted: Option<SortedValues>,
    score: Option<f64>,
}

impl NodeCache {
    pub fn new(convertible_to_scalar: bool) -> Self {
        Self {
            convertible_to_scalar,
            ..Default::default()
        }
    }

    pub fn samples(&self, split: Split) -> Option<&Samples> {
        self.samples[split.index()].as_ref()
    }

    pub fn is_convertible_to_scalar(&self) -> bool {
        self.convertible_to_scalar
    }

    pub fn sorted_values(&self) -> Option<&SortedValues> {
        self.sorted.as_ref()
    }

    /// Memoized score; `None` while dirty.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }

    fn size_bytes(&self) -> usize {
        let samples: usize = self.samples.iter().flatten().map(Samples::size_bytes).sum();
        samples + self.sorted.as_ref().map_or(0, |s| s.len() * 16)
    }

    fn clear(&mut self, split: Split) {
        self.samples[split.index()] = None;
        if split == Split::Training {
            self.sorted = None;
            self.score = None;
        }
    }
}

struct CacheEntry {
    cache: NodeCache,
    stamp: u64,
    size: usize,
}

/// Node caches keyed by node id. Entries are evicted oldest-inserted first
/// once the byte budget is exceeded, skipping pinned nodes.
pub struct CacheStore {
    map: FxHashMap<NodeId, CacheEntry>,
    order: VecDeque<(NodeId, u64)>,
    bytes: usize,
    budget: usize,
    counter: u64,
}

impl CacheStore {
    pub fn new(budget: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            order: VecDeque::new(),
            bytes: 0,
            budget,
            counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeCache> {
        self.map.get(&id).map(|e| &e.cache)
    }

    /// Returns the cache of `id`, creating it if needed.
    pub fn get_or_create(&mut self, id: NodeId, convertible_to_scalar: bool) -> &mut NodeCache {
        let counter = &mut self.counter;
        let order = &mut self.order;
        let entry = self.map.entry(id).or_insert_with(|| {
            let stamp = *counter;
            *counter = counter.wrapping_add(1);
            order.push_back((id, stamp));
            CacheEntry {
                cache: NodeCache::new(convertible_to_scalar),
                stamp,
                size: 0,
            }
        });
        &mut entry.cache
    }

    pub fn set_samples(&mut self, id: NodeId, split: Split, samples: Samples, convertible_to_scalar: bool) {
        self.get_or_create(id, convertible_to_scalar).samples[split.index()] = Some(samples);
        self.refresh_size(id);
    }

    pub fn set_sorted_values(&mut self, id: NodeId, sorted: SortedValues) {
        if let Some(entry) = self.map.get_mut(&id) {
            entry.cache.sorted = Some(sorted);
        }
        self.refresh_size(id);
    }

    pub fn set_score(&mut self, id: NodeId, score: f64) {
        if let Some(entry) = self.map.get_mut(&id) {
            entry.cache.set_score(score);
        }
    }

    /// Drops every cached column of `split`. Training changes also drop
    /// sorted values and scores.
    pub fn clear_split(&mut self, split: Split) {
        for entry in self.map.values_mut() {
            entry.cache.clear(split);
            entry.size = entry.cache.size_bytes();
        }
        self.bytes = self.map.values().map(|e| e.size).sum();
    }

    pub fn invalidate_scores(&mut self) {
        for entry in self.map.values_mut() {
            entry.cache.score = None;
        }
    }

    pub fn remove(&mut self, id: NodeId) {
        if let Some(entry) = self.map.remove(&id) {
            self.bytes = self.bytes.saturating_sub(entry.size);
        }
    }

    fn refresh_size(&mut self, id: NodeId) {
        if let Some(entry) = self.map.get_mut(&id) {
            let size = entry.cache.size_bytes();
            self.bytes = self.bytes.saturating_sub(entry.size).saturating_add(size);
            entry.size = size;
        }
    }

    /// Evicts until the store fits its budget. Returns the number of
    /// evicted entries.
    pub fn evict(&mut self, pinned: impl Fn(NodeId) -> bool) -> usize {
        let mut skipped = VecDeque::new();
        let mut evicted = 0;
        while self.bytes > self.budget {
            let Some((id, stamp)) = self.order.pop_front() else { break; };
            let live = self.map.get(&id).map_or(false, |e| e.stamp == stamp);
            if !live {
                continue;
            }
            if pinned(id) {
                skipped.push_back((id, stamp));
                continue;
            }
            self.remove(id);
            evicted += 1;
        }
        // pinned entries keep their age
        while let Some(entry) = skipped.pop_back() {
            self.order.push_front(entry);
        }
        evicted
    }
}
