#![allow(dead_code)]
//! Thread-safe unbounded containers without locks.
//!
//! This crate provides a last-in-first-out stack, a first-in-first-out queue
//! and a hashed key/value map, each in three flavours: a coarse mutex-protected
//! reference implementation, a lock-free variant built on a preallocated node
//! pool with tagged pointers, and a lock-free variant built on hazard-pointer
//! deferred reclamation. The lock-free variants guarantee that at any moment at
//! least one thread makes progress; no operation ever holds a mutual-exclusion
//! primitive.

extern crate rand;

pub mod structures;
pub mod memory;
