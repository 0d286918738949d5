use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

struct Bucket<K, V> {
    items: Vec<(K, V)>,
    local_depth: u32,
}

struct Inner<K, V> {
    /// Directory of 2^global_depth slots, each an index into `buckets`.
    /// Several slots share a bucket while its local depth trails the
    /// global depth.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    global_depth: u32,
    bucket_capacity: usize,
    len: usize,
}

impl<K, V> Inner<K, V> {
    fn mask(&self) -> u64 {
        (1u64 << self.global_depth) - 1
    }
}

/// Dynamically growing hash table used as the buffer pool's page directory.
///
/// The low `global_depth` bits of a key's hash select a directory slot; the
/// slot points at a bucket. A full bucket splits, doubling the directory
/// when its local depth has caught up with the global depth. A single
/// table-wide mutex serializes every operation, splits included - the table
/// only ever backs the page-table lookup, which the buffer pool already
/// funnels through its own latch.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Inner<K, V>>,
    hash_builder: RandomState,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_capacity: usize) -> Self {
        assert!(bucket_capacity > 0, "bucket capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                directory: vec![0],
                buckets: vec![Bucket {
                    items: Vec::new(),
                    local_depth: 0,
                }],
                global_depth: 0,
                bucket_capacity,
                len: 0,
            }),
            hash_builder: RandomState::new(),
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = (self.hash_of(key) & inner.mask()) as usize;
        let bucket = &inner.buckets[inner.directory[slot]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert `key -> value`, overwriting any previous value for the key.
    ///
    /// When the target bucket is full the bucket splits and the insertion is
    /// retried; re-splits continue until the key fits, so the operation
    /// terminates even when many keys collide on the low hash bits.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_of(&key);
        let mut inner = self.inner.lock();
        loop {
            let slot = (hash & inner.mask()) as usize;
            let bucket_idx = inner.directory[slot];
            let capacity = inner.bucket_capacity;
            let bucket = &mut inner.buckets[bucket_idx];

            if let Some(item) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                item.1 = value;
                return;
            }
            if bucket.items.len() < capacity {
                bucket.items.push((key, value));
                inner.len += 1;
                return;
            }

            self.split_bucket(&mut inner, bucket_idx);
            // retry, possibly splitting again
        }
    }

    /// Remove the entry under `key`. Returns whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = (self.hash_of(key) & inner.mask()) as usize;
        let bucket_idx = inner.directory[slot];
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            inner.len -= 1;
            true
        } else {
            false
        }
    }

    /// Split the bucket behind `slot`, doubling the directory first when the
    /// bucket's local depth has reached the global depth.
    fn split_bucket(&self, inner: &mut Inner<K, V>, bucket_idx: usize) {
        let local_depth = inner.buckets[bucket_idx].local_depth;

        if local_depth == inner.global_depth {
            // Double the directory: the upper half mirrors the lower half.
            let old_len = inner.directory.len();
            for i in 0..old_len {
                let target = inner.directory[i];
                inner.directory.push(target);
            }
            inner.global_depth += 1;
        }

        // Sibling bucket one bit deeper; the old bucket deepens to match.
        let new_depth = local_depth + 1;
        inner.buckets[bucket_idx].local_depth = new_depth;
        let new_idx = inner.buckets.len();
        inner.buckets.push(Bucket {
            items: Vec::new(),
            local_depth: new_depth,
        });

        // Repoint the half of the old bucket's equivalence class whose
        // discriminating bit is set.
        let bit = 1u64 << local_depth;
        for i in 0..inner.directory.len() {
            if inner.directory[i] == bucket_idx && (i as u64) & bit != 0 {
                inner.directory[i] = new_idx;
            }
        }

        // Redistribute the old bucket's entries by their discriminating bit.
        let items = std::mem::take(&mut inner.buckets[bucket_idx].items);
        for (k, v) in items {
            let target_slot = (self.hash_of(&k) & inner.mask()) as usize;
            let target = inner.directory[target_slot];
            inner.buckets[target].items.push((k, v));
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[dir_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Check the directory-mapping invariant: every stored key hashes to a
    /// directory slot that points at the bucket containing it, and no bucket
    /// is deeper than the directory.
    #[cfg(test)]
    fn verify_mapping(&self) -> bool {
        let inner = self.inner.lock();
        for bucket in &inner.buckets {
            if bucket.local_depth > inner.global_depth {
                return false;
            }
        }
        for (idx, bucket) in inner.buckets.iter().enumerate() {
            for (k, _) in &bucket.items {
                let slot = (self.hash_of(k) & inner.mask()) as usize;
                if inner.directory[slot] != idx {
                    return false;
                }
            }
        }
        true
    }
}
