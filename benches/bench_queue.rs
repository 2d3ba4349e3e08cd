#[macro_use]
extern crate criterion;
extern crate crossbeam;
extern crate lockless;

use criterion::Criterion;
use crossbeam::queue::SegQueue;
use lockless::structures::{LockedQueue, Queue, TaggedQueue};

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

const OPS_PER_THREAD: u32 = 10_000;

fn bench_hazard_queue(num_threads: usize) {
    let queue: Arc<Queue<u32>> = Arc::new(Queue::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                q.enqueue(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while q.dequeue().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_tagged_queue(num_threads: usize) {
    let queue: Arc<TaggedQueue<u32>> =
        Arc::new(TaggedQueue::with_capacity(num_threads * OPS_PER_THREAD as usize));
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                while !q.enqueue(n) {}
            }
        }));
    }
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while q.dequeue().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_locked_queue(num_threads: usize) {
    let queue: Arc<LockedQueue<u32>> = Arc::new(LockedQueue::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                q.enqueue(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while q.dequeue().is_none() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_crossbeam_seg_queue(num_threads: usize) {
    let queue: Arc<SegQueue<u32>> = Arc::new(SegQueue::new());
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for n in 0..OPS_PER_THREAD {
                q.push(n);
            }
        }));
    }
    for _ in 0..num_threads {
        let q = queue.clone();
        wait_vec.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                while q.pop().is_err() {}
            }
        }));
    }
    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn queue_locked_low(c: &mut Criterion) {
    c.bench_function("queue_locked_low", |b| b.iter(|| bench_locked_queue(4)));
}

fn queue_hazard_low(c: &mut Criterion) {
    c.bench_function("queue_hazard_low", |b| b.iter(|| bench_hazard_queue(4)));
}

fn queue_tagged_low(c: &mut Criterion) {
    c.bench_function("queue_tagged_low", |b| b.iter(|| bench_tagged_queue(4)));
}

fn queue_crossbeam_low(c: &mut Criterion) {
    c.bench_function("queue_crossbeam_low", |b| {
        b.iter(|| bench_crossbeam_seg_queue(4))
    });
}

fn queue_locked_high(c: &mut Criterion) {
    c.bench_function("queue_locked_high", |b| b.iter(|| bench_locked_queue(16)));
}

fn queue_hazard_high(c: &mut Criterion) {
    c.bench_function("queue_hazard_high", |b| b.iter(|| bench_hazard_queue(16)));
}

fn queue_tagged_high(c: &mut Criterion) {
    c.bench_function("queue_tagged_high", |b| b.iter(|| bench_tagged_queue(16)));
}

fn queue_crossbeam_high(c: &mut Criterion) {
    c.bench_function("queue_crossbeam_high", |b| {
        b.iter(|| bench_crossbeam_seg_queue(16))
    });
}

criterion_group!(
    benches,
    queue_locked_low,
    queue_hazard_low,
    queue_tagged_low,
    queue_crossbeam_low,
    queue_locked_high,
    queue_hazard_high,
    queue_tagged_high,
    queue_crossbeam_high
);
criterion_main!(benches);
