use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use webserver::timer::HeapTimer;

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let cb_count = Arc::clone(&count);
    (count, move || {
        cb_count.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_next_tick_on_empty_heap_is_minus_one() {
    let mut timer = HeapTimer::new();
    assert_eq!(timer.next_tick(), -1);
    assert!(timer.is_empty());
}

#[test]
fn test_zero_timeout_fires_on_tick() {
    let mut timer = HeapTimer::new();
    let (count, cb) = counter();
    timer.add(3, 0, cb);
    thread::sleep(Duration::from_millis(5));
    timer.tick();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(timer.is_empty());
    assert!(!timer.contains(3));
}

#[test]
fn test_next_tick_reports_delay_until_first_deadline() {
    let mut timer = HeapTimer::new();
    let (_count, cb) = counter();
    timer.add(1, 5000, cb);
    let ms = timer.next_tick();
    assert!(ms > 0 && ms <= 5000, "unexpected delay {ms}");
    assert!(timer.contains(1));
}

#[test]
fn test_expired_callbacks_fire_earliest_first() {
    let mut timer = HeapTimer::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for (id, timeout) in [(10, 30u64), (11, 0), (12, 60)] {
        let order = Arc::clone(&order);
        timer.add(id, timeout, move || order.lock().unwrap().push(id));
    }
    thread::sleep(Duration::from_millis(100));
    timer.tick();
    assert_eq!(*order.lock().unwrap(), vec![11, 10, 12]);
    assert!(timer.is_empty());
}

#[test]
fn test_add_existing_id_overwrites_deadline_and_callback() {
    let mut timer = HeapTimer::new();
    let (old_count, old_cb) = counter();
    let (new_count, new_cb) = counter();
    timer.add(7, 60_000, old_cb);
    timer.add(7, 0, new_cb);
    assert_eq!(timer.len(), 1);
    thread::sleep(Duration::from_millis(5));
    timer.tick();
    assert_eq!(old_count.load(Ordering::SeqCst), 0);
    assert_eq!(new_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_adjust_extends_a_live_deadline() {
    let mut timer = HeapTimer::new();
    let (count, cb) = counter();
    timer.add(5, 0, cb);
    timer.adjust(5, 60_000);
    thread::sleep(Duration::from_millis(5));
    timer.tick();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(timer.contains(5));
}

#[test]
fn test_adjust_unknown_id_is_a_noop() {
    let mut timer = HeapTimer::new();
    timer.adjust(99, 1000);
    assert!(timer.is_empty());
}

#[test]
fn test_clear_drops_pending_timers() {
    let mut timer = HeapTimer::new();
    let (count, cb) = counter();
    timer.add(8, 0, cb);
    timer.clear();
    assert!(timer.is_empty());
    thread::sleep(Duration::from_millis(5));
    timer.tick();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_do_work_fires_and_removes() {
    let mut timer = HeapTimer::new();
    let (count, cb) = counter();
    timer.add(4, 60_000, cb);
    timer.do_work(4);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!timer.contains(4));
    assert!(timer.is_empty());
}

#[test]
fn test_map_stays_consistent_under_churn() {
    let mut timer = HeapTimer::new();
    let fired = Arc::new(Mutex::new(Vec::new()));
    for id in 0..50 {
        let fired = Arc::clone(&fired);
        // Spread of far-future deadlines in shuffled-ish order.
        let timeout = 60_000 + ((id * 37) % 50) as u64 * 100;
        timer.add(id, timeout, move || fired.lock().unwrap().push(id));
    }
    assert_eq!(timer.len(), 50);
    // Drop the root a few times and spot-fire ids from the middle.
    timer.pop();
    timer.pop();
    for id in [20, 30, 40] {
        timer.adjust(id, 120_000);
        timer.do_work(id);
    }
    assert_eq!(timer.len(), 45);
    assert_eq!(fired.lock().unwrap().len(), 3);
    for id in 0..50 {
        if timer.contains(id) {
            timer.do_work(id);
        }
    }
    assert!(timer.is_empty());
    // Every surviving node's callback fired exactly once.
    assert_eq!(fired.lock().unwrap().len(), 48);
}
