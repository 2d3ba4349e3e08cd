use memory::{AtomicTaggedPtr, NodePool, TaggedPtr};
use std::sync::atomic::Ordering;

/// A lock-free Michael-Scott queue over a fixed pool of nodes.
///
/// Head and tail are tagged pointers into the pool arena and the node at the
/// head is always a dummy sentinel; dequeue advances past the sentinel and
/// the former successor takes over that role. Every successful publication of
/// head, tail or a node's `next` advances the corresponding tag, which is
/// what lets dequeuers return nodes to the free-list immediately: a stalled
/// thread's CAS against a recycled node can never succeed.
///
/// Payloads must be `Copy` for the same reason as
/// [`TaggedStack`](struct.TaggedStack.html): the payload is read before the
/// head CAS confirms it, and a stale copy is discarded, not dropped.
#[derive(Debug)]
pub struct TaggedQueue<T: Copy + Send> {
    head: AtomicTaggedPtr,
    tail: AtomicTaggedPtr,
    pool: NodePool<T>,
}

unsafe impl<T: Copy + Send> Send for TaggedQueue<T> {}
unsafe impl<T: Copy + Send> Sync for TaggedQueue<T> {}

impl<T: Copy + Send> TaggedQueue<T> {
    /// Create a queue able to hold `capacity` values at once. The sentinel
    /// occupies an extra pool node, so all `capacity` slots are usable.
    /// # Examples
    /// ```
    /// use lockless::structures::TaggedQueue;
    ///
    /// let queue: TaggedQueue<u32> = TaggedQueue::with_capacity(8);
    /// assert!(queue.enqueue(1));
    /// assert_eq!(queue.dequeue(), Some(1));
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = NodePool::with_capacity(capacity + 1);
        let sentinel = pool
            .allocate()
            .expect("fresh pool cannot be empty");
        pool.node(sentinel)
            .next()
            .store(TaggedPtr::null(0), Ordering::Relaxed);
        TaggedQueue {
            head: AtomicTaggedPtr::new(TaggedPtr::new(sentinel as u32, 0)),
            tail: AtomicTaggedPtr::new(TaggedPtr::new(sentinel as u32, 0)),
            pool,
        }
    }

    /// Add a value to the back of the queue, or return `false` if the pool
    /// is exhausted.
    pub fn enqueue(&self, value: T) -> bool {
        let index = match self.pool.allocate() {
            None => return false,
            Some(index) => index,
        };
        let node = self.pool.node(index);
        unsafe { node.set_value(value) };
        let link = node.next().load(Ordering::Relaxed);
        node.next().store(
            TaggedPtr::null(link.tag().wrapping_add(1)),
            Ordering::Release,
        );

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let tail_index = tail.index().expect("tail is never null");
            let next = self.pool.node(tail_index).next().load(Ordering::Acquire);

            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if !next.is_null() {
                // The tail is lagging behind the real last node; help it
                // along and retry.
                let _ = self
                    .tail
                    .compare_exchange(tail, next.with_tag(tail.tag().wrapping_add(1)));
                continue;
            }

            let linked = TaggedPtr::new(index as u32, next.tag().wrapping_add(1));
            if self
                .pool
                .node(tail_index)
                .next()
                .compare_exchange(next, linked)
                .is_ok()
            {
                // Swing the tail to the node we linked; losing this race is
                // fine, someone else has already advanced it.
                let _ = self.tail.compare_exchange(
                    tail,
                    TaggedPtr::new(index as u32, tail.tag().wrapping_add(1)),
                );
                return true;
            }
        }
    }

    /// Take the value at the front of the queue, or `None` if it is empty.
    pub fn dequeue(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let head_index = head.index().expect("head is never null");
            let next = self.pool.node(head_index).next().load(Ordering::Acquire);

            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head.index() == tail.index() {
                if next.is_null() {
                    return None;
                }
                // The tail is lagging; help it past the sentinel and retry.
                let _ = self
                    .tail
                    .compare_exchange(tail, next.with_tag(tail.tag().wrapping_add(1)));
                continue;
            }

            let next_index = next.index().expect("non-empty queue has a successor");
            // Read the payload before the CAS. Success proves the head did
            // not move while we read, so the successor could not have been
            // recycled underneath us; on failure the copy is discarded and
            // `T: Copy` keeps it inert.
            let value = unsafe { self.pool.node(next_index).read_value() };
            if self
                .head
                .compare_exchange(head, next.with_tag(head.tag().wrapping_add(1)))
                .is_ok()
            {
                // The old sentinel is ours; recycle it.
                self.pool.release(head_index);
                return Some(value);
            }
        }
    }

    /// The number of values the pool can hold.
    pub fn capacity(&self) -> usize {
        self.pool.capacity() - 1
    }
}
