use crate::common::*;
use dashmap::DashMap;
use std::{
    any::Any,
    collections::hash_map::RandomState,
    hash::BuildHasher,
};

static NEXT_STAGE: AtomicU64 = AtomicU64::new(0);

type Erased = Arc<dyn Any + Send + Sync>;

/// Identifies one memoized stage, so equal inputs of different stages never share entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(u64);

impl StageId {
    pub fn next() -> Self {
        Self(NEXT_STAGE.fetch_add(1, Relaxed))
    }
}

/// A concurrent cache of stage outputs keyed by stage and input.
///
/// Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoizeCache {
    entries: Arc<DashMap<(StageId, u64), Vec<(Erased, Erased)>>>,
    hasher: RandomState,
}

impl Debug for MemoizeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizeCache")
            .field("len", &self.len())
            .finish()
    }
}

impl MemoizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached output of `stage` for `key`, computing and storing it if absent.
    ///
    /// `f` runs without any lock held. If two callers race on the same key,
    /// both compute and the first stored value wins.
    pub fn compute_if_absent<K, V, F>(&self, stage: StageId, key: &K, f: F) -> V
    where
        K: 'static + Send + Sync + Hash + Eq + Clone,
        V: 'static + Send + Sync + Clone,
        F: FnOnce(&K) -> V,
    {
        let slot = (stage, self.hasher.hash_one(key));

        if let Some(bucket) = self.entries.get(&slot) {
            if let Some(value) = Self::lookup::<K, V>(&bucket, key) {
                return value;
            }
        }

        let value = f(key);
        let mut bucket = self.entries.entry(slot).or_default();
        if let Some(existing) = Self::lookup::<K, V>(&bucket, key) {
            return existing;
        }
        bucket.push((Arc::new(key.clone()), Arc::new(value.clone())));
        value
    }

    fn lookup<K, V>(bucket: &[(Erased, Erased)], key: &K) -> Option<V>
    where
        K: 'static + Eq,
        V: 'static + Clone,
    {
        bucket
            .iter()
            .find(|(cached, _)| cached.downcast_ref::<K>() == Some(key))
            .and_then(|(_, value)| value.downcast_ref::<V>().cloned())
    }

    /// The number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_each_key_once_per_stage() {
        let cache = MemoizeCache::new();
        let stage = StageId::next();
        let calls = AtomicUsize::new(0);
        let square = |value: &u32| {
            calls.fetch_add(1, SeqCst);
            value * value
        };

        assert_eq!(cache.compute_if_absent(stage, &3, square), 9);
        assert_eq!(cache.compute_if_absent(stage, &3, square), 9);
        assert_eq!(cache.compute_if_absent(stage, &4, square), 16);
        assert_eq!(calls.load(SeqCst), 2);

        let other = StageId::next();
        assert_eq!(cache.compute_if_absent(other, &3, |value| value + 1), 4);
        assert_eq!(cache.len(), 3);

        cache.clear();
        assert!(cache.is_empty());
    }
}
