//! Durability waitlist.
//!
//! Commits whose response kind requires durability park a waiter here, keyed
//! by the durability marker stamped at precommit. The KV engine's durability
//! callback advances the watermark; every waiter at or below it is released,
//! in marker order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use kvsql_kv::DurabilityMarker;

pub type Waiter = Box<dyn FnOnce(DurabilityMarker) + Send>;

#[derive(Default)]
pub struct DurabilityManager {
    current: AtomicU64,
    waitlist: Mutex<BTreeMap<DurabilityMarker, Vec<Waiter>>>,
}

impl DurabilityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest durable marker observed so far.
    pub fn current(&self) -> DurabilityMarker {
        self.current.load(Ordering::SeqCst)
    }

    /// Invoke `waiter` once the watermark reaches `marker`. If it already
    /// has, the waiter runs on the calling thread.
    pub fn wait_for(&self, marker: DurabilityMarker, waiter: Waiter) {
        {
            let mut waitlist = self.waitlist.lock().expect("durability waitlist poisoned");
            // The check happens under the waitlist lock so a concurrent
            // watermark advance cannot drain between check and insert.
            if self.current() < marker {
                waitlist.entry(marker).or_default().push(waiter);
                return;
            }
        }
        waiter(self.current());
    }

    /// Watermark advance from the KV engine's durability callback.
    ///
    /// With `omit_when_idle` set, an empty waitlist skips the dispatch work
    /// entirely; a waiter that arrives after the probe is picked up by the
    /// next advance (the probe can delay a notification, never drop it).
    pub fn on_durable(&self, marker: DurabilityMarker, omit_when_idle: bool) {
        self.current.fetch_max(marker, Ordering::SeqCst);
        let watermark = self.current();

        let released: Vec<Waiter> = {
            let mut waitlist = self.waitlist.lock().expect("durability waitlist poisoned");
            if omit_when_idle && waitlist.is_empty() {
                return;
            }
            let mut released = Vec::new();
            let still_waiting = waitlist.split_off(&(watermark + 1));
            for (_, waiters) in std::mem::replace(&mut *waitlist, still_waiting) {
                released.extend(waiters);
            }
            released
        };

        for waiter in released {
            waiter(watermark);
        }
    }

    pub fn waiting(&self) -> usize {
        self.waitlist
            .lock()
            .expect("durability waitlist poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn clear(&self) {
        self.waitlist
            .lock()
            .expect("durability waitlist poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_waiter_released_in_marker_order() {
        let manager = DurabilityManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for marker in [3u64, 1, 2] {
            let order = Arc::clone(&order);
            manager.wait_for(
                marker,
                Box::new(move |_| order.lock().unwrap().push(marker)),
            );
        }
        assert_eq!(manager.waiting(), 3);

        manager.on_durable(2, false);
        manager.on_durable(3, false);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(manager.waiting(), 0);
    }

    #[test]
    fn test_already_durable_runs_inline() {
        let manager = DurabilityManager::new();
        manager.on_durable(5, false);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        manager.wait_for(
            4,
            Box::new(move |watermark| {
                assert!(watermark >= 4);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.waiting(), 0);
    }

    #[test]
    fn test_omit_when_idle_still_advances_watermark() {
        let manager = DurabilityManager::new();
        manager.on_durable(7, true);
        assert_eq!(manager.current(), 7);
    }
}
