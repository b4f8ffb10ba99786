use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Capacity-1 channel where the newest value replaces any unconsumed one.
///
/// Producers never block. A consumer either polls with `take` or waits with
/// `recv_timeout`. Replaced values are counted so the backpressure policy is
/// observable.
#[derive(Debug)]
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    closed: bool,
    published: u64,
    replaced: u64,
}

/// Outcome of a blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotRecv<T> {
    Value(T),
    Timeout,
    Closed,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
                published: 0,
                replaced: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a value. Returns true when an unconsumed value was discarded.
    /// Publishing into a closed slot drops the value.
    pub fn put(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let replaced = state.value.replace(value).is_some();
        state.published += 1;
        if replaced {
            state.replaced += 1;
        }
        drop(state);
        self.ready.notify_one();
        replaced
    }

    /// Non-blocking receive.
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Wait up to `timeout` for a value. A pending value is still delivered
    /// after `close`.
    pub fn recv_timeout(&self, timeout: Duration) -> SlotRecv<T> {
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return SlotRecv::Value(value);
            }
            if state.closed {
                return SlotRecv::Closed;
            }
            let (next, wait) = self
                .ready
                .wait_timeout(state, timeout)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
            if wait.timed_out() {
                return match state.value.take() {
                    Some(value) => SlotRecv::Value(value),
                    None if state.closed => SlotRecv::Closed,
                    None => SlotRecv::Timeout,
                };
            }
        }
    }

    /// Close the slot and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn published(&self) -> u64 {
        self.lock().published
    }

    pub fn replaced(&self) -> u64 {
        self.lock().replaced
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn newest_value_wins() {
        let slot = LatestSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert!(slot.put(3));
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.replaced(), 2);
        assert_eq!(slot.published(), 3);
    }

    #[test]
    fn recv_times_out_when_empty() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert_eq!(slot.recv_timeout(Duration::from_millis(10)), SlotRecv::Timeout);
    }

    #[test]
    fn close_wakes_waiter() {
        let slot: Arc<LatestSlot<u32>> = Arc::new(LatestSlot::new());
        let waiter = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.recv_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.close();
        assert_eq!(waiter.join().unwrap(), SlotRecv::Closed);
    }

    #[test]
    fn pending_value_survives_close_but_new_puts_do_not() {
        let slot = LatestSlot::new();
        slot.put(7);
        slot.close();
        assert!(!slot.put(8));
        assert_eq!(slot.recv_timeout(Duration::from_millis(1)), SlotRecv::Value(7));
        assert_eq!(slot.recv_timeout(Duration::from_millis(1)), SlotRecv::Closed);
    }
}
