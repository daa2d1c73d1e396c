use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How long a request should wait for its reply
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Wait {
    /// Queue the request and return at once. It is only sent on the next flush.
    NoWait,
    /// Flush, then block until the reply arrives
    #[default]
    Forever,
    /// Flush, then block for at most this long. A zero duration polls.
    UpTo(Duration),
}

impl Wait {
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Wait::NoWait)
    }

    /// Start the clock, so one budget can be spread over several waits
    pub fn start(self) -> Countdown {
        let deadline = match self {
            Wait::UpTo(timeout) => Instant::now().checked_add(timeout),
            _ => None,
        };
        Countdown {
            wait: self,
            deadline,
        }
    }
}

/// A [`Wait`] that has started running down
#[derive(Debug, Copy, Clone)]
pub struct Countdown {
    wait: Wait,
    deadline: Option<Instant>,
}

impl Countdown {
    /// What is left of the original wait
    pub fn remaining(&self) -> Wait {
        match (self.wait, self.deadline) {
            (Wait::UpTo(_), Some(deadline)) => {
                Wait::UpTo(deadline.saturating_duration_since(Instant::now()))
            }
            (Wait::UpTo(_), None) => Wait::Forever,
            (wait, _) => wait,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.wait.is_blocking()
    }
}

impl From<Duration> for Wait {
    fn from(value: Duration) -> Self {
        Wait::UpTo(value)
    }
}

impl From<Option<Duration>> for Wait {
    /// `None` waits forever
    fn from(value: Option<Duration>) -> Self {
        value.map(Wait::UpTo).unwrap_or(Wait::Forever)
    }
}

/// Single-slot handoff of an asynchronous result to a blocked caller
///
/// This is a latch, not a queue: a second [`Rendezvous::set`] before anyone
/// takes the first value replaces it. An empty slot (`None` from
/// [`Rendezvous::get`]) always means "nothing arrived", never a delivered value,
/// so payloads that can legitimately be empty stay distinguishable from a
/// timeout.
///
/// Once [`Rendezvous::close`]d, nothing more will arrive: every waiter wakes,
/// and later waits return at once.
#[derive(Debug)]
pub struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

impl<T> Slot<T> {
    fn waiting(&self) -> bool {
        self.value.is_none() && !self.closed
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and wake a waiter
    pub fn set(&self, value: T) {
        self.slot.lock().value = Some(value);
        self.ready.notify_one();
    }

    /// Discard any value that nobody collected
    pub fn clear(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Wake every waiter empty-handed, now and from now on
    pub fn close(&self) {
        self.slot.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Take the value, waiting for it as requested
    ///
    /// [`Wait::NoWait`] and a zero [`Wait::UpTo`] both poll.
    pub fn get(&self, wait: Wait) -> Option<T> {
        let mut slot = self.slot.lock();
        let deadline = match wait {
            Wait::NoWait => return slot.value.take(),
            Wait::Forever => None,
            // A deadline past the range of Instant is as good as forever
            Wait::UpTo(timeout) => Instant::now().checked_add(timeout),
        };
        while slot.waiting() {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        slot.value.take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn poll_before_and_after_set() {
        let cell = Rendezvous::new();
        assert_eq!(cell.get(Wait::UpTo(Duration::ZERO)), None);
        cell.set(7);
        assert_eq!(cell.get(Wait::UpTo(Duration::ZERO)), Some(7));
        assert_eq!(cell.get(Wait::UpTo(Duration::ZERO)), None);
        assert_eq!(cell.get(Wait::NoWait), None);
    }

    #[test]
    fn latest_value_wins() {
        let cell = Rendezvous::new();
        cell.set("first");
        cell.set("second");
        assert!(cell.is_set());
        assert_eq!(cell.get(Wait::NoWait), Some("second"));
        assert!(!cell.is_set());
    }

    #[test]
    fn empty_payload_is_not_a_timeout() {
        let cell: Rendezvous<Option<u8>> = Rendezvous::new();
        cell.set(None);
        assert_eq!(cell.get(Wait::NoWait), Some(None));
        assert_eq!(cell.get(Wait::NoWait), None);
    }

    #[test]
    fn bounded_wait_times_out() {
        let cell: Rendezvous<u8> = Rendezvous::new();
        let start = Instant::now();
        assert_eq!(cell.get(Wait::UpTo(Duration::from_millis(20))), None);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(20));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn wakes_waiter_from_other_thread() {
        let cell = Arc::new(Rendezvous::new());
        let setter = cell.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(42u32);
        });
        assert_eq!(cell.get(Wait::Forever), Some(42));
        handle.join().unwrap();

        let setter = cell.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set(43u32);
        });
        assert_eq!(cell.get(Wait::UpTo(Duration::from_secs(5))), Some(43));
        handle.join().unwrap();
    }

    #[test]
    fn wait_conversions() {
        assert_eq!(Wait::from(None), Wait::Forever);
        assert_eq!(
            Wait::from(Some(Duration::from_secs(1))),
            Wait::UpTo(Duration::from_secs(1))
        );
        assert!(!Wait::NoWait.is_blocking());
        assert!(Wait::default().is_blocking());
    }

    #[test]
    fn close_wakes_every_waiter() {
        let cell: Arc<Rendezvous<u8>> = Arc::new(Rendezvous::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.get(Wait::Forever))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        cell.close();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(cell.is_closed());
        // Closed for good, but a value already delivered is still handed over
        let start = Instant::now();
        assert_eq!(cell.get(Wait::UpTo(Duration::from_secs(5))), None);
        assert!(start.elapsed() < Duration::from_secs(1));
        cell.set(3);
        assert_eq!(cell.get(Wait::Forever), Some(3));
        cell.clear();
        assert_eq!(cell.get(Wait::Forever), None);
    }

    #[test]
    fn countdown_spends_one_budget() {
        let countdown = Wait::UpTo(Duration::from_millis(50)).start();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(countdown.remaining(), Wait::UpTo(Duration::ZERO));
        assert_eq!(Wait::Forever.start().remaining(), Wait::Forever);
        assert_eq!(Wait::NoWait.start().remaining(), Wait::NoWait);
        assert_eq!(Wait::UpTo(Duration::MAX).start().remaining(), Wait::Forever);
    }
}
