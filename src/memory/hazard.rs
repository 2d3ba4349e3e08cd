use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Total number of protection slots in a registry. Exceeding this at thread
/// start-up is fatal: the table is dimensioned for the maximum worker count.
pub const MAX_HAZARD_SLOTS: usize = 100;

/// How many slots a single thread may claim in one registry. The stack and
/// queue use two; the hash map needs a third for the list predecessor.
pub const MAX_SLOTS_PER_THREAD: usize = 3;

const DEFAULT_SCAN_THRESHOLD: usize = 1000;

/// Sentinel owner token marking a slot as unclaimed.
const NO_OWNER: usize = 0;

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// One protection slot: the claiming thread's token and the address that
/// thread is about to dereference. A claimed slot with a null address means
/// the thread is between operations.
struct HazardSlot {
    owner: AtomicUsize,
    protected: AtomicPtr<u8>,
}

const FREE_SLOT: HazardSlot = HazardSlot {
    owner: AtomicUsize::new(NO_OWNER),
    protected: AtomicPtr::new(ptr::null_mut()),
};

/// A retired record: a node removed from a container, waiting until no
/// hazard slot advertises its address. The destructor is type-erased so
/// records from differently-typed containers share one buffer.
struct Retired {
    address: *mut u8,
    drop_fn: unsafe fn(*mut u8),
}

/// Linked cell for records handed over by exiting threads.
struct OrphanNode {
    entry: Retired,
    next: *mut OrphanNode,
}

/// A fixed table of hazard slots shared by every thread touching it.
///
/// The registry itself is `const`-constructible, so besides the process-wide
/// default obtained from [`default_registry`], tests can declare private
/// `static` registries and exercise reclamation in isolation.
///
/// Capacity contract: a thread claims slots lazily on first protection and
/// panics if the table is full. There is no fall-back; size the table for the
/// worker count.
pub struct HazardRegistry {
    slots: [HazardSlot; MAX_HAZARD_SLOTS],
    orphans: AtomicPtr<OrphanNode>,
    scan_threshold: usize,
}

static DEFAULT_REGISTRY: HazardRegistry = HazardRegistry::new();

/// The process-wide registry used by containers constructed with `new`.
pub fn default_registry() -> &'static HazardRegistry {
    &DEFAULT_REGISTRY
}

impl HazardRegistry {
    pub const fn new() -> Self {
        Self::with_scan_threshold(DEFAULT_SCAN_THRESHOLD)
    }

    /// A registry whose per-thread retired buffers trigger a scan once they
    /// hold `threshold` records. Mostly useful for tests that want prompt
    /// reclamation.
    pub const fn with_scan_threshold(threshold: usize) -> Self {
        HazardRegistry {
            slots: [FREE_SLOT; MAX_HAZARD_SLOTS],
            orphans: AtomicPtr::new(ptr::null_mut()),
            scan_threshold: threshold,
        }
    }

    /// Publish `address` in this thread's slot `index`. The store is
    /// sequentially consistent so a scanning thread is guaranteed to observe
    /// it before freeing. Callers must re-read the source pointer afterwards
    /// and abort the attempt if it changed.
    fn protect(&'static self, address: *mut u8, index: usize) {
        assert!(index < MAX_SLOTS_PER_THREAD);
        let slot = self.slot_for_current_thread(index);
        self.slots[slot].protected.store(address, Ordering::SeqCst);
    }

    fn clear(&'static self, index: usize) {
        self.protect(ptr::null_mut(), index);
    }

    /// True if any slot in the table currently advertises `address`.
    fn is_protected(&self, address: *mut u8) -> bool {
        for slot in self.slots.iter() {
            if slot.protected.load(Ordering::SeqCst) == address {
                return true;
            }
        }
        false
    }

    /// Append a record to this thread's retired buffer, scanning once the
    /// buffer reaches the registry threshold.
    fn retire(&'static self, address: *mut u8, drop_fn: unsafe fn(*mut u8)) {
        let pending = SHELF.with(|shelf| {
            let mut shelf = shelf.borrow_mut();
            let state = shelf.state_for(self);
            state.retired.push(Retired { address, drop_fn });
            if state.retired.len() >= self.scan_threshold {
                Some(mem::replace(&mut state.retired, Vec::new()))
            } else {
                None
            }
        });
        if let Some(pending) = pending {
            let survivors = self.scan_records(pending);
            self.requeue(survivors);
        }
    }

    /// Drain the calling thread's retired buffer: free every record whose
    /// address no slot advertises, keep the rest.
    fn scan(&'static self) {
        let pending = SHELF.with(|shelf| {
            let mut shelf = shelf.borrow_mut();
            let state = shelf.state_for(self);
            mem::replace(&mut state.retired, Vec::new())
        });
        let survivors = self.scan_records(pending);
        self.requeue(survivors);
    }

    fn requeue(&'static self, survivors: Vec<Retired>) {
        if survivors.is_empty() {
            return;
        }
        SHELF.with(|shelf| {
            let mut shelf = shelf.borrow_mut();
            shelf.state_for(self).retired.extend(survivors);
        });
    }

    /// The core reclamation pass. Snapshots every advertised address, frees
    /// the unadvertised records, and returns the still-protected survivors.
    /// Orphaned records from exited threads are processed the same way but
    /// requeued on the orphan list directly. Destructors run outside any
    /// thread-local borrow, so a payload whose `Drop` touches another
    /// container cannot re-enter the shelf.
    fn scan_records(&'static self, pending: Vec<Retired>) -> Vec<Retired> {
        let mut advertised: Vec<*mut u8> = Vec::with_capacity(MAX_HAZARD_SLOTS);
        for slot in self.slots.iter() {
            let address = slot.protected.load(Ordering::SeqCst);
            if !address.is_null() {
                advertised.push(address);
            }
        }
        advertised.sort_unstable();

        let mut survivors: Vec<Retired> = Vec::new();
        for entry in pending {
            if advertised.binary_search(&entry.address).is_ok() {
                survivors.push(entry);
            } else {
                unsafe { (entry.drop_fn)(entry.address) };
            }
        }

        // Records left behind by exited threads: free what we can, requeue
        // the rest for a later scan by whichever thread gets there first.
        let mut orphan = self.orphans.swap(ptr::null_mut(), Ordering::AcqRel);
        while !orphan.is_null() {
            let node = unsafe { Box::from_raw(orphan) };
            orphan = node.next;
            if advertised.binary_search(&node.entry.address).is_ok() {
                self.push_orphan(node.entry);
            } else {
                unsafe { (node.entry.drop_fn)(node.entry.address) };
            }
        }

        survivors
    }

    fn push_orphan(&self, entry: Retired) {
        let node = Box::into_raw(Box::new(OrphanNode {
            entry,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.orphans.load(Ordering::Acquire);
            unsafe { (*node).next = head };
            if self
                .orphans
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }

    /// The table index of this thread's slot `index`, claiming one on first
    /// use. Claiming CASes an unowned slot's token; running out of slots
    /// panics.
    fn slot_for_current_thread(&'static self, index: usize) -> usize {
        SHELF.with(|shelf| {
            let mut shelf = shelf.borrow_mut();
            let token = shelf.token;
            let state = shelf.state_for(self);
            match state.slots[index] {
                Some(claimed) => claimed,
                None => {
                    let claimed = self.claim_slot(token);
                    state.slots[index] = Some(claimed);
                    claimed
                }
            }
        })
    }

    fn claim_slot(&self, token: usize) -> usize {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.owner.load(Ordering::Relaxed) == NO_OWNER
                && slot
                    .owner
                    .compare_exchange(NO_OWNER, token, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return i;
            }
        }
        panic!("hazard registry exhausted: all {} slots claimed", MAX_HAZARD_SLOTS);
    }

    /// Release every slot the exiting thread claimed and move its remaining
    /// retired records to the orphan list.
    fn detach(&'static self, state: &mut RegistryState) {
        for claimed in state.slots.iter_mut() {
            if let Some(index) = claimed.take() {
                let slot = &self.slots[index];
                slot.protected.store(ptr::null_mut(), Ordering::SeqCst);
                slot.owner.store(NO_OWNER, Ordering::Release);
            }
        }
        for entry in state.retired.drain(..) {
            self.push_orphan(entry);
        }
    }
}

/// Per-thread, per-registry state: which table slots this thread claimed and
/// the records it has retired but not yet freed.
struct RegistryState {
    registry: &'static HazardRegistry,
    slots: [Option<usize>; MAX_SLOTS_PER_THREAD],
    retired: Vec<Retired>,
}

/// Everything one thread keeps across registries. Dropped at thread exit,
/// which releases the slots and hands unreclaimed records over so they are
/// freed by later scans instead of leaking.
struct ThreadShelf {
    token: usize,
    domains: Vec<RegistryState>,
}

impl ThreadShelf {
    fn new() -> Self {
        ThreadShelf {
            token: NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed),
            domains: Vec::new(),
        }
    }

    fn state_for(&mut self, registry: &'static HazardRegistry) -> &mut RegistryState {
        let pos = self
            .domains
            .iter()
            .position(|state| ptr::eq(state.registry, registry));
        match pos {
            Some(pos) => &mut self.domains[pos],
            None => {
                self.domains.push(RegistryState {
                    registry,
                    slots: [None; MAX_SLOTS_PER_THREAD],
                    retired: Vec::new(),
                });
                self.domains.last_mut().unwrap()
            }
        }
    }
}

impl Drop for ThreadShelf {
    fn drop(&mut self) {
        for mut state in self.domains.drain(..) {
            let registry = state.registry;
            // One last chance to free locally before orphaning the rest. The
            // shelf is already being torn down, so survivors cannot go back
            // into it and are orphaned instead.
            let pending = mem::replace(&mut state.retired, Vec::new());
            registry.detach(&mut state);
            for entry in registry.scan_records(pending) {
                registry.push_orphan(entry);
            }
        }
    }
}

thread_local! {
    static SHELF: RefCell<ThreadShelf> = RefCell::new(ThreadShelf::new());
}

/// The handle a container embeds to talk to a [`HazardRegistry`] about nodes
/// of one concrete type.
///
/// `protect`/`clear` address the calling thread's slots by index; `retire`
/// queues a node for deferred deletion with a destructor that frees it as a
/// `Box<T>`.
pub struct HazardManager<T: Send> {
    registry: &'static HazardRegistry,
    _marker: PhantomData<*mut T>,
}

unsafe fn drop_boxed<T>(address: *mut u8) {
    Box::from_raw(address as *mut T);
}

impl<T: Send> fmt::Debug for HazardManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "HazardManager {{ registry: {:p} }}",
            self.registry as *const HazardRegistry
        )
    }
}

impl<T: Send> HazardManager<T> {
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    pub fn with_registry(registry: &'static HazardRegistry) -> Self {
        HazardManager {
            registry,
            _marker: PhantomData,
        }
    }

    /// Advertise `record` in slot `index`. Callers must re-read the pointer
    /// they loaded `record` from and retry if it changed; only then is the
    /// dereference safe.
    pub fn protect(&self, record: *mut T, index: usize) {
        self.registry.protect(record as *mut u8, index);
    }

    pub fn clear(&self, index: usize) {
        self.registry.clear(index);
    }

    /// Queue an unlinked node for deletion once no slot advertises it.
    pub fn retire(&self, record: *mut T) {
        self.registry.retire(record as *mut u8, drop_boxed::<T>);
    }

    /// True if any thread currently advertises `record`. Lets callers free
    /// an unlinked node immediately instead of queueing it.
    pub fn is_protected(&self, record: *mut T) -> bool {
        self.registry.is_protected(record as *mut u8)
    }

    /// Drain the calling thread's retired buffer now instead of waiting for
    /// the threshold.
    pub fn scan(&self) {
        self.registry.scan();
    }
}
