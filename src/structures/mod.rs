pub use self::hash_map::HashMap;
pub use self::locked::{LockedHashMap, LockedQueue, LockedStack};
pub use self::queue::Queue;
pub use self::stack::Stack;
pub use self::tagged_queue::TaggedQueue;
pub use self::tagged_stack::TaggedStack;

mod hash_map;
mod locked;
mod markable;
mod queue;
mod stack;
mod tagged_queue;
mod tagged_stack;
