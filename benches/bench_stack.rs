#[macro_use]
extern crate criterion;
extern crate lockless;

use criterion::Criterion;
use lockless::structures::{LockedStack, Stack, TaggedStack};

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

const OPS_PER_THREAD: u32 = 10_000;

fn bench_hazard_stack(num_threads: usize) {
    let stack: Arc<Stack<u32>> = Arc::new(Stack::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                s.push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while s.pop().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_tagged_stack(num_threads: usize) {
    let stack: Arc<TaggedStack<u32>> =
        Arc::new(TaggedStack::with_capacity(num_threads * OPS_PER_THREAD as usize));
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                while !s.push(n) {}
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while s.pop().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_locked_stack(num_threads: usize) {
    let stack: Arc<LockedStack<u32>> = Arc::new(LockedStack::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                s.push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let s = stack.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while s.pop().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn stack_locked_low(c: &mut Criterion) {
    c.bench_function("stack_locked_low", |b| b.iter(|| bench_locked_stack(4)));
}

fn stack_hazard_low(c: &mut Criterion) {
    c.bench_function("stack_hazard_low", |b| b.iter(|| bench_hazard_stack(4)));
}

fn stack_tagged_low(c: &mut Criterion) {
    c.bench_function("stack_tagged_low", |b| b.iter(|| bench_tagged_stack(4)));
}

fn stack_locked_high(c: &mut Criterion) {
    c.bench_function("stack_locked_high", |b| b.iter(|| bench_locked_stack(16)));
}

fn stack_hazard_high(c: &mut Criterion) {
    c.bench_function("stack_hazard_high", |b| b.iter(|| bench_hazard_stack(16)));
}

fn stack_tagged_high(c: &mut Criterion) {
    c.bench_function("stack_tagged_high", |b| b.iter(|| bench_tagged_stack(16)));
}

criterion_group!(
    benches,
    stack_locked_low,
    stack_hazard_low,
    stack_tagged_low,
    stack_locked_high,
    stack_hazard_high,
    stack_tagged_high
);
criterion_main!(benches);
