use memory::{default_registry, HazardManager, HazardRegistry};
use rand::{thread_rng, Rng};
use std::cmp;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread;
use std::time::Duration;

const MAX_BACKOFF: u32 = 2048;

/// A lock-free Michael-Scott queue with hazard-pointer reclamation.
///
/// The queue is a linked list headed by a dummy sentinel, so head and tail
/// are never null and dequeue works by advancing past the sentinel and
/// letting the former successor become the new one. Dequeuers advertise both
/// the head and its successor before dereferencing either; dequeued sentinels
/// are retired rather than freed so a stalled reader never touches freed
/// memory.
#[derive(Debug)]
pub struct Queue<T: Send> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    manager: HazardManager<Node<T>>,
}

struct Node<T> {
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T: Send> Queue<T> {
    /// Create a new, empty queue.
    /// # Examples
    /// ```
    /// use lockless::structures::Queue;
    ///
    /// let queue: Queue<String> = Queue::new();
    /// assert_eq!(queue.dequeue(), None);
    /// ```
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Create a queue whose retired sentinels go through the given registry
    /// instead of the process-wide default.
    pub fn with_registry(registry: &'static HazardRegistry) -> Self {
        let sentinel = Box::into_raw(Box::new(Node::sentinel()));
        Queue {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            manager: HazardManager::with_registry(registry),
        }
    }

    fn backoff(&self, current: u32) -> u32 {
        let wait = thread_rng().gen_range(0, current + 1);
        thread::sleep(Duration::new(0, wait * 10));
        cmp::min(current * 2, MAX_BACKOFF)
    }

    /// Add a value to the back of the queue.
    /// # Examples
    /// ```
    /// use lockless::structures::Queue;
    ///
    /// let queue: Queue<String> = Queue::new();
    /// queue.enqueue("hello".to_owned());
    /// ```
    pub fn enqueue(&self, value: T) {
        let node = Box::into_raw(Box::new(Node::new(value)));
        let mut backoff = 1;
        while self.try_enqueue(node).is_err() {
            backoff = self.backoff(backoff);
        }
        self.manager.clear(0);
    }

    fn try_enqueue(&self, node: *mut Node<T>) -> Result<(), ()> {
        let tail = self.tail.load(Ordering::Acquire);
        self.manager.protect(tail, 0);
        if !ptr::eq(tail, self.tail.load(Ordering::Acquire)) {
            return Err(());
        }
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if !next.is_null() {
            // The tail is lagging behind the real last node; help it along.
            let _ = self
                .tail
                .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            return Err(());
        }
        unsafe {
            match (*tail).next.compare_exchange(
                ptr::null_mut(),
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // Swing the tail to the node we just linked, using the
                    // tail observed by this winning attempt. Failure means
                    // another thread already advanced it further.
                    let _ = self
                        .tail
                        .compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed);
                    Ok(())
                }
                Err(_) => Err(()),
            }
        }
    }

    /// Take the value at the front of the queue, or `None` if the queue is
    /// empty.
    /// # Examples
    /// ```
    /// use lockless::structures::Queue;
    ///
    /// let queue: Queue<u8> = Queue::new();
    /// queue.enqueue(1);
    /// queue.enqueue(2);
    /// assert_eq!(queue.dequeue(), Some(1));
    /// assert_eq!(queue.dequeue(), Some(2));
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let mut backoff = 1;
        loop {
            if let Ok(value) = self.try_dequeue() {
                self.manager.clear(0);
                self.manager.clear(1);
                return value;
            }
            backoff = self.backoff(backoff);
        }
    }

    fn try_dequeue(&self) -> Result<Option<T>, ()> {
        let head = self.head.load(Ordering::Acquire);
        self.manager.protect(head, 0);
        if !ptr::eq(head, self.head.load(Ordering::Acquire)) {
            return Err(());
        }

        let tail = self.tail.load(Ordering::Acquire);
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        self.manager.protect(next, 1);
        if !ptr::eq(head, self.head.load(Ordering::Acquire)) {
            return Err(());
        }

        if next.is_null() {
            // Only the sentinel is left.
            return Ok(None);
        }

        if ptr::eq(head, tail) {
            // The tail is lagging; help it past the sentinel and retry.
            let _ = self
                .tail
                .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            return Err(());
        }

        // Copy the payload out before the head moves. Both hazard slots are
        // still published, so the successor cannot be freed while we read it;
        // a failed CAS discards the copy without dropping it.
        let value = unsafe { ptr::read((*next).value.as_ptr()) };
        match self
            .head
            .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // The old sentinel is unlinked; its payload slot was consumed
                // when it was dequeued past, so retiring frees only the node.
                self.manager.retire(head);
                Ok(Some(value))
            }
            Err(_) => {
                mem::forget(value);
                Err(())
            }
        }
    }
}

impl<T: Send> Drop for Queue<T> {
    fn drop(&mut self) {
        // The first node is the sentinel and holds no live payload; every
        // node after it does.
        let sentinel = self.head.load(Ordering::Relaxed);
        let mut current = unsafe { (*sentinel).next.load(Ordering::Relaxed) };
        unsafe {
            Box::from_raw(sentinel);
            while !current.is_null() {
                let next = (*current).next.load(Ordering::Relaxed);
                ptr::drop_in_place((*current).value.as_mut_ptr());
                Box::from_raw(current);
                current = next;
            }
        }
    }
}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Node {
            value: MaybeUninit::new(value),
            next: AtomicPtr::default(),
        }
    }

    fn sentinel() -> Self {
        Node {
            value: MaybeUninit::uninit(),
            next: AtomicPtr::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Queue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn dequeues_in_fifo_order() {
        let queue: Queue<u32> = Queue::new();
        for i in 0..100 {
            queue.enqueue(i);
        }
        for i in 0..100 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn empty_after_drain_then_usable_again() {
        let queue: Queue<u8> = Queue::new();
        queue.enqueue(8);
        queue.enqueue(7);
        assert_eq!(queue.dequeue(), Some(8));
        assert_eq!(queue.dequeue(), Some(7));
        assert_eq!(queue.dequeue(), None);
        queue.enqueue(9);
        assert_eq!(queue.dequeue(), Some(9));
    }

    struct Counted {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn every_value_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue: Queue<Counted> = Queue::new();
            for _ in 0..100 {
                queue.enqueue(Counted {
                    drops: drops.clone(),
                });
            }
            for _ in 0..30 {
                queue.dequeue().unwrap();
            }
            assert_eq!(drops.load(Ordering::SeqCst), 30);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn concurrent_enqueue_dequeue_drains_clean() {
        let queue: Arc<Queue<u32>> = Arc::new(Queue::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for n in 0..10_000 {
                    queue.enqueue(n);
                }
            }));
        }
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    loop {
                        if queue.dequeue().is_some() {
                            break;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn conservation_across_two_queues() {
        use rand::{thread_rng, Rng};

        let a: Arc<Queue<u64>> = Arc::new(Queue::new());
        let b: Arc<Queue<u64>> = Arc::new(Queue::new());
        for v in 0..100u64 {
            if v % 2 == 0 {
                a.enqueue(v);
            } else {
                b.enqueue(v);
            }
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let a = a.clone();
            let b = b.clone();
            handles.push(thread::spawn(move || {
                let mut rng = thread_rng();
                for _ in 0..100_000 {
                    let source = if rng.gen::<bool>() { &a } else { &b };
                    if let Some(value) = source.dequeue() {
                        let target = if rng.gen::<bool>() { &a } else { &b };
                        target.enqueue(value);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = Vec::new();
        while let Some(v) = a.dequeue() {
            drained.push(v);
        }
        while let Some(v) = b.dequeue() {
            drained.push(v);
        }
        drained.sort();
        let expected: Vec<u64> = (0..100).collect();
        assert_eq!(drained, expected);
    }
}
