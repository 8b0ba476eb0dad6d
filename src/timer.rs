//! Min-heap of per-connection deadlines with an id-to-slot side map.
//!
//! Ids are the owning connection's descriptor. Every swap performed by the
//! sift routines updates the side map before returning, so `ref_map[id] = i`
//! implies `heap[i].id == id` at all times.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    id: RawFd,
    expires: Instant,
    cb: Option<TimeoutCallback>,
}

#[derive(Default)]
pub struct HeapTimer {
    heap: Vec<TimerNode>,
    ref_map: HashMap<RawFd, usize>,
}

impl HeapTimer {
    pub fn new() -> Self {
        HeapTimer {
            heap: Vec::with_capacity(64),
            ref_map: HashMap::new(),
        }
    }

    /// Schedules `cb` to fire in `timeout_ms`. An existing node with the
    /// same id has its deadline and callback overwritten instead (slot
    /// reuse after the descriptor was recycled).
    pub fn add(&mut self, id: RawFd, timeout_ms: u64, cb: impl FnOnce() + Send + 'static) {
        let expires = Instant::now() + Duration::from_millis(timeout_ms);
        match self.ref_map.get(&id).copied() {
            Some(i) => {
                self.heap[i].expires = expires;
                self.heap[i].cb = Some(Box::new(cb));
                if !self.sift_down(i) {
                    self.sift_up(i);
                }
            }
            None => {
                let i = self.heap.len();
                self.ref_map.insert(id, i);
                self.heap.push(TimerNode {
                    id,
                    expires,
                    cb: Some(Box::new(cb)),
                });
                self.sift_up(i);
            }
        }
    }

    /// Pushes the deadline of a live node out to `now + timeout_ms`.
    /// Extension is the only expected use, so only a sift down follows.
    pub fn adjust(&mut self, id: RawFd, timeout_ms: u64) {
        let Some(&i) = self.ref_map.get(&id) else {
            return;
        };
        self.heap[i].expires = Instant::now() + Duration::from_millis(timeout_ms);
        self.sift_down(i);
    }

    /// Fires the callback for `id` immediately and removes the node.
    pub fn do_work(&mut self, id: RawFd) {
        let Some(&i) = self.ref_map.get(&id) else {
            return;
        };
        let cb = self.heap[i].cb.take();
        self.remove(i);
        if let Some(cb) = cb {
            cb();
        }
    }

    /// Fires every expired callback, earliest first.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.heap.first() {
            if top.expires > now {
                break;
            }
            let cb = self.heap[0].cb.take();
            self.pop();
            if let Some(cb) = cb {
                cb();
            }
        }
    }

    pub fn pop(&mut self) {
        if !self.heap.is_empty() {
            self.remove(0);
        }
    }

    /// Evicts everything due, then reports the delay until the next
    /// deadline in milliseconds, or -1 when no timers remain.
    pub fn next_tick(&mut self) -> i32 {
        self.tick();
        match self.heap.first() {
            Some(top) => top
                .expires
                .saturating_duration_since(Instant::now())
                .as_millis()
                .min(i32::MAX as u128) as i32,
            None => -1,
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.ref_map.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: RawFd) -> bool {
        self.ref_map.contains_key(&id)
    }

    fn remove(&mut self, i: usize) {
        debug_assert!(i < self.heap.len());
        let last = self.heap.len() - 1;
        if i < last {
            self.swap_node(i, last);
        }
        let node = self.heap.pop().expect("heap is non-empty here");
        self.ref_map.remove(&node.id);
        if i < last && !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap_node(i, parent);
            i = parent;
        }
    }

    /// Returns whether the node moved.
    fn sift_down(&mut self, mut i: usize) -> bool {
        let n = self.heap.len();
        let start = i;
        loop {
            let mut child = i * 2 + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[i].expires <= self.heap[child].expires {
                break;
            }
            self.swap_node(i, child);
            i = child;
        }
        i > start
    }

    fn swap_node(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        let id_i = self.heap[i].id;
        let id_j = self.heap[j].id;
        self.ref_map.insert(id_i, i);
        self.ref_map.insert(id_j, j);
    }
}
