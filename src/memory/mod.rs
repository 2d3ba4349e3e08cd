//! Non-blocking memory reclamation.
//!
//! Two mechanisms keep unsynchronized readers safe from use-after-free. The
//! hazard-pointer registry lets a thread advertise an address before
//! dereferencing it, and defers deletion of retired nodes until no thread
//! advertises them. The tagged node pool recycles nodes through a free-list
//! whose head carries a monotonically advancing tag, so a stale pointer
//! snapshot can never pass a compare-and-swap even when the address repeats
//! (the [ABA problem](https://en.wikipedia.org/wiki/ABA_problem)).

pub use self::hazard::{default_registry, HazardManager, HazardRegistry};
pub use self::hazard::{MAX_HAZARD_SLOTS, MAX_SLOTS_PER_THREAD};
pub use self::pool::{AtomicTaggedPtr, NodePool, PoolNode, TaggedPtr};

mod hazard;
mod pool;
