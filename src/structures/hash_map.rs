use memory::{default_registry, HazardManager, HazardRegistry};
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr;

use structures::markable::{is_marked, mark, unmark, AtomicMarkablePtr};

const NUM_BUCKETS: usize = 256;

/// Hazard slot carrying the current node during a bucket walk.
const SLOT_CURR: usize = 1;
/// Hazard slot carrying the current node's successor.
const SLOT_NEXT: usize = 0;
/// Hazard slot carrying the predecessor whose `next` field we hold.
const SLOT_PREV: usize = 2;

/// A lock-free hash map with ordered-list buckets.
///
/// Keys hash into a fixed array of buckets; each bucket is a singly-linked
/// list kept in strictly increasing key order. Removal is two-phase: a CAS
/// sets the deletion mark on the victim's `next` pointer (after which no
/// search returns it), and a second CAS unlinks it. Any walk that encounters
/// a marked node finishes the unlink on the deleter's behalf, so at most one
/// marked node is ever reachable per bucket. All traversal happens under
/// hazard-pointer protection and unlinked nodes go through deferred deletion.
pub struct HashMap<K, V>
where
    K: Ord + Hash + Send,
    V: Send,
{
    buckets: Vec<AtomicMarkablePtr<Node<K, V>>>,
    hasher: RandomState,
    manager: HazardManager<Node<K, V>>,
}

struct Node<K, V> {
    key: K,
    value: V,
    next: AtomicMarkablePtr<Node<K, V>>,
}

/// What a bucket walk came back with: the slot that pointed at `curr` (so a
/// splice can CAS it), the first node with `key >= target` or null, and the
/// snapshot of that node's successor.
struct FindResult<K, V> {
    prev: *const AtomicMarkablePtr<Node<K, V>>,
    curr: *mut Node<K, V>,
    next: *mut Node<K, V>,
}

unsafe impl<K, V> Send for HashMap<K, V>
where
    K: Ord + Hash + Send,
    V: Send,
{
}

unsafe impl<K, V> Sync for HashMap<K, V>
where
    K: Ord + Hash + Send + Sync,
    V: Send + Sync,
{
}

impl<K, V> HashMap<K, V>
where
    K: Ord + Hash + Send,
    V: Send,
{
    /// Create a new, empty map.
    /// # Examples
    /// ```
    /// use lockless::structures::HashMap;
    ///
    /// let map: HashMap<u32, String> = HashMap::new();
    /// assert!(map.insert(1, "one".to_owned()).is_ok());
    /// ```
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Create a map whose retired nodes go through the given registry
    /// instead of the process-wide default.
    pub fn with_registry(registry: &'static HazardRegistry) -> Self {
        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        for _ in 0..NUM_BUCKETS {
            buckets.push(AtomicMarkablePtr::default());
        }
        HashMap {
            buckets,
            hasher: RandomState::new(),
            manager: HazardManager::with_registry(registry),
        }
    }

    fn hash<Q: ?Sized>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash,
    {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_for<Q: ?Sized>(&self, key: &Q) -> &AtomicMarkablePtr<Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash,
    {
        &self.buckets[self.hash(key) as usize & (NUM_BUCKETS - 1)]
    }

    /// Insert a key/value pair. If the key is already present the pair is
    /// handed back unchanged.
    /// # Examples
    /// ```
    /// use lockless::structures::HashMap;
    ///
    /// let map: HashMap<u32, u32> = HashMap::new();
    /// assert!(map.insert(1, 10).is_ok());
    /// assert_eq!(map.insert(1, 11), Err((1, 11)));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Result<(), (K, V)> {
        let node = Box::into_raw(Box::new(Node {
            key,
            value,
            next: AtomicMarkablePtr::default(),
        }));
        let bucket = self.bucket_for(unsafe { &(*node).key });
        let result = loop {
            let found = self.find(bucket, unsafe { &(*node).key });
            unsafe {
                if !found.curr.is_null() && (*found.curr).key == (*node).key {
                    let Node { key, value, .. } = *Box::from_raw(node);
                    break Err((key, value));
                }
                // Splice before the first node with a greater key, which
                // keeps every bucket strictly ordered.
                (*node).next.store(found.curr);
                if (*found.prev).compare_exchange(found.curr, node).is_ok() {
                    break Ok(());
                }
            }
        };
        self.clear_slots();
        result
    }

    /// Remove the node with this key. Returns `false` if no such key is
    /// present.
    /// # Examples
    /// ```
    /// use lockless::structures::HashMap;
    ///
    /// let map: HashMap<u32, u32> = HashMap::new();
    /// map.insert(1, 10).unwrap();
    /// assert!(map.remove(&1));
    /// assert!(!map.remove(&1));
    /// ```
    pub fn remove(&self, key: &K) -> bool {
        let bucket = self.bucket_for(key);
        let result = loop {
            let found = self.find(bucket, key);
            unsafe {
                if found.curr.is_null() || (*found.curr).key != *key {
                    break false;
                }
                // Logical deletion: set the mark on the victim's own `next`.
                // After this no search returns the node and nobody may touch
                // its successor link again.
                if (*found.curr)
                    .next
                    .compare_exchange(found.next, mark(found.next))
                    .is_err()
                {
                    continue;
                }
                // Physical unlink. If another thread got there first, one
                // extra walk finishes any half-done deletion in the bucket.
                if (*found.prev)
                    .compare_exchange(found.curr, found.next)
                    .is_ok()
                {
                    self.manager.retire(found.curr);
                } else {
                    let _ = self.find(bucket, key);
                }
                break true;
            }
        };
        self.clear_slots();
        result
    }

    /// Look up a key, cloning the value out while the node is still
    /// protected.
    /// # Examples
    /// ```
    /// use lockless::structures::HashMap;
    ///
    /// let map: HashMap<u32, String> = HashMap::new();
    /// map.insert(1, "one".to_owned()).unwrap();
    /// assert_eq!(map.get(&1), Some("one".to_owned()));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let bucket = self.bucket_for(key);
        let found = self.find(bucket, key);
        let result = unsafe {
            if !found.curr.is_null() && (*found.curr).key == *key {
                Some((*found.curr).value.clone())
            } else {
                None
            }
        };
        self.clear_slots();
        result
    }

    /// Walk a bucket for `key`, returning the first node whose key is not
    /// smaller, together with the slot that points at it. Marked nodes met
    /// along the way are unlinked on behalf of their deleter; any sign that
    /// the chain changed underneath us restarts the walk from the bucket
    /// head.
    fn find(&self, bucket: &AtomicMarkablePtr<Node<K, V>>, key: &K) -> FindResult<K, V> {
        'restart: loop {
            let mut prev = bucket as *const AtomicMarkablePtr<Node<K, V>>;
            let mut curr_raw = unsafe { (*prev).load() };
            loop {
                let curr = unmark(curr_raw);
                if curr.is_null() {
                    return FindResult {
                        prev,
                        curr: ptr::null_mut(),
                        next: ptr::null_mut(),
                    };
                }
                self.manager.protect(curr, SLOT_CURR);
                // Only a re-read proves the protected node is still linked
                // and therefore safe to dereference.
                if unsafe { (*prev).load() } != curr_raw {
                    continue 'restart;
                }
                let next_raw = unsafe { (*curr).next.load() };
                self.manager.protect(unmark(next_raw), SLOT_NEXT);
                if unsafe { (*curr).next.load() } != next_raw {
                    continue 'restart;
                }
                if is_marked(next_raw) {
                    // Logically deleted: finish the unlink for whoever
                    // marked it, then start over.
                    match unsafe { (*prev).compare_exchange(curr, unmark(next_raw)) } {
                        Ok(_) => {
                            self.manager.retire(curr);
                            continue 'restart;
                        }
                        Err(_) => continue 'restart,
                    }
                }
                if unsafe { (*curr).key >= *key } {
                    return FindResult {
                        prev,
                        curr,
                        next: unmark(next_raw),
                    };
                }
                // Advance: the current node becomes the predecessor, so it
                // moves into the predecessor slot before we let go of it.
                self.manager.protect(curr, SLOT_PREV);
                prev = unsafe { &(*curr).next as *const AtomicMarkablePtr<Node<K, V>> };
                curr_raw = next_raw;
            }
        }
    }

    fn clear_slots(&self) {
        self.manager.clear(SLOT_CURR);
        self.manager.clear(SLOT_NEXT);
        self.manager.clear(SLOT_PREV);
    }
}

impl<K, V> Drop for HashMap<K, V>
where
    K: Ord + Hash + Send,
    V: Send,
{
    fn drop(&mut self) {
        for bucket in self.buckets.iter() {
            let mut current = unmark(bucket.load());
            while !current.is_null() {
                unsafe {
                    let next = unmark((*current).next.load());
                    Box::from_raw(current);
                    current = next;
                }
            }
        }
    }
}

impl<K, V> fmt::Debug for HashMap<K, V>
where
    K: Ord + Hash + Send,
    V: Send,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HashMap {{ buckets: {} }}", NUM_BUCKETS)
    }
}
