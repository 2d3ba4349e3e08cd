//! Coarse-grained reference implementations.
//!
//! One mutex around a standard collection. These exist as the baseline the
//! lock-free variants are benchmarked against, and as a trivially correct
//! oracle for the conservation tests.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

/// A stack made thread-safe by a single mutex.
#[derive(Debug, Default)]
pub struct LockedStack<T> {
    data: Mutex<Vec<T>>,
}

impl<T> LockedStack<T> {
    pub fn new() -> Self {
        LockedStack {
            data: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, value: T) {
        self.data.lock().expect("stack mutex poisoned").push(value);
    }

    pub fn pop(&self) -> Option<T> {
        self.data.lock().expect("stack mutex poisoned").pop()
    }
}

/// A queue made thread-safe by a single mutex.
#[derive(Debug, Default)]
pub struct LockedQueue<T> {
    data: Mutex<VecDeque<T>>,
}

impl<T> LockedQueue<T> {
    pub fn new() -> Self {
        LockedQueue {
            data: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, value: T) {
        self.data
            .lock()
            .expect("queue mutex poisoned")
            .push_back(value);
    }

    pub fn dequeue(&self) -> Option<T> {
        self.data.lock().expect("queue mutex poisoned").pop_front()
    }
}

/// A hash map made thread-safe by a single mutex, with the same operation
/// surface as the lock-free map: duplicate inserts fail and hand the pair
/// back.
#[derive(Debug, Default)]
pub struct LockedHashMap<K: Eq + Hash, V> {
    data: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> LockedHashMap<K, V> {
    pub fn new() -> Self {
        LockedHashMap {
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Result<(), (K, V)> {
        let mut data = self.data.lock().expect("map mutex poisoned");
        if data.contains_key(&key) {
            return Err((key, value));
        }
        data.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &K) -> bool {
        self.data
            .lock()
            .expect("map mutex poisoned")
            .remove(key)
            .is_some()
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.data
            .lock()
            .expect("map mutex poisoned")
            .get(key)
            .cloned()
    }
}
