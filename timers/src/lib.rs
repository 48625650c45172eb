/*!
A shared timer scheduler.

One binary min-heap keyed by `(when, seqno)` holds live and
lazily-cancelled timers; a dedicated scheduler thread sleeps on a
notifier until the next expiry and runs callbacks with no lock held.
Cancellation only marks the timer (removing an arbitrary node from a
binary heap is linear): a cancelled timer at the top of the heap is
popped and discarded on the next pass, and when cancelled timers pile
up the live heap is swapped with an empty one under a short critical
section and a reaper thread drains the old heap at its leisure,
reinserting survivors.

Application-level signals ride the same notifier: `post_signal` sets a
flag and wakes the scheduler, which invokes registered handlers
exactly once per batch at the top of its pass.
*/

use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(test)]
mod scheduler_tests;

/// Number of distinct application signals.
pub const NUM_SIGNALS: u8 = 32;

/// Swap the heaps once this many cancelled timers have accumulated,
/// even while they are outnumbered by live ones.
const CANCELLED_HIGH_WATER: usize = 1000;

/// A scheduled action. Callbacks run on the scheduler thread with no
/// lock held and must not panic.
pub trait Timer: Send + Sync {
    fn fire(&self, now: Instant);
}

/// Blanket impl so closures can be scheduled directly.
impl<F> Timer for F
where
    F: Fn(Instant) + Send + Sync,
{
    fn fire(&self, now: Instant) {
        self(now)
    }
}

struct TimerState {
    pending: AtomicBool,
    cancelled: AtomicBool,
}

/// A cancellation handle for one scheduled timer.
///
/// The heap holds its own reference to the timer object; dropping the
/// handle does not cancel. A caller that keeps the handle may cancel
/// at any time, and the timer object is released when the heap entry
/// is popped or reaped.
#[derive(Clone)]
pub struct TimerHandle {
    state: Arc<TimerState>,
    shared: Weak<Shared>,
}

impl TimerHandle {
    /// Marks the timer cancelled. Returns true iff the timer was
    /// pending and not already cancelled; after a true return the
    /// timer will never fire.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            self.state.cancelled.store(true, Ordering::SeqCst);
            return false;
        };
        if shared.should_stop.load(Ordering::SeqCst) {
            return false;
        }

        // The cancel lock excludes the scheduler's examine-top window
        let mut counts = shared.cancel.lock();
        let was_cancelled = self.state.cancelled.swap(true, Ordering::SeqCst);
        if self.state.pending.load(Ordering::SeqCst) && !was_cancelled {
            counts.num_cancelled += 1;
            true
        } else {
            false
        }
    }

    /// True while the timer sits in a heap awaiting its deadline.
    pub fn pending(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

struct Entry {
    when: Instant,
    seqno: u64,
    state: Arc<TimerState>,
    timer: Arc<dyn Timer>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seqno == other.seqno
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Inverted: BinaryHeap is a max-heap and we want the earliest
// (when, seqno) on top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (other.when, other.seqno).cmp(&(self.when, self.seqno))
    }
}

#[derive(Default)]
struct Heaps {
    timers: BinaryHeap<Entry>,
    old_timers: BinaryHeap<Entry>,
}

#[derive(Default)]
struct CancelCounts {
    num_cancelled: usize,
    old_num_cancelled: usize,
}

type SignalHandler = Arc<dyn Fn(u8) + Send + Sync>;

struct Shared {
    // System lock: both heaps, paired with the notifier
    heaps: Mutex<Heaps>,
    notifier: Condvar,
    // Cancel lock: the cancelled counts and the examine-top window
    cancel: Mutex<CancelCounts>,

    seqno: AtomicU64,
    should_stop: AtomicBool,

    sig_fired: AtomicBool,
    signals: [AtomicBool; NUM_SIGNALS as usize],
    handlers: Mutex<HashMap<u8, SignalHandler>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            heaps: Mutex::new(Heaps::default()),
            notifier: Condvar::new(),
            cancel: Mutex::new(CancelCounts::default()),
            seqno: AtomicU64::new(0),
            should_stop: AtomicBool::new(false),
            sig_fired: AtomicBool::new(false),
            signals: core::array::from_fn(|_| AtomicBool::new(false)),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    fn handle_signals(&self) {
        // At-least-once: a signal re-posted mid-batch is seen next pass
        if self.sig_fired.swap(false, Ordering::SeqCst) {
            let handlers = self.handlers.lock().clone();
            for (sig, flag) in self.signals.iter().enumerate() {
                if flag.swap(false, Ordering::SeqCst)
                    && let Some(handler) = handlers.get(&(sig as u8))
                {
                    handler(sig as u8);
                }
            }
        }
    }
}

/// The timer system: scheduler thread, reaper thread, and the shared
/// heaps. Created once at startup.
pub struct TimerSystem {
    shared: Arc<Shared>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    reaper_interval: Duration,
}

impl TimerSystem {
    /// Starts the scheduler and reaper threads.
    pub fn start() -> Arc<Self> {
        Self::with_reaper_interval(Duration::from_secs(60))
    }

    /// Starts with a custom reaper sweep interval.
    pub fn with_reaper_interval(reaper_interval: Duration) -> Arc<Self> {
        let system = Arc::new(Self {
            shared: Arc::new(Shared::new()),
            threads: Mutex::new(Vec::new()),
            reaper_interval,
        });

        let scheduler = {
            let system = system.clone();
            std::thread::Builder::new()
                .name("timer-sched".to_string())
                .spawn(move || system.scheduler_loop())
                .expect("failed to spawn timer scheduler thread")
        };
        let reaper = {
            let system = system.clone();
            std::thread::Builder::new()
                .name("timer-reaper".to_string())
                .spawn(move || system.reaper_loop())
                .expect("failed to spawn timer reaper thread")
        };
        system.threads.lock().extend([scheduler, reaper]);
        system
    }

    /// Schedules `timer` to fire at `when`.
    pub fn schedule_at(&self, when: Instant, timer: Arc<dyn Timer>) -> TimerHandle {
        let state = Arc::new(TimerState {
            pending: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
        });
        let handle = TimerHandle {
            state: state.clone(),
            shared: Arc::downgrade(&self.shared),
        };

        let entry = Entry {
            when,
            seqno: self.shared.seqno.fetch_add(1, Ordering::Relaxed),
            state,
            timer,
        };

        let mut heaps = self.shared.heaps.lock();
        if self.shared.should_stop.load(Ordering::SeqCst) {
            // The process is exiting; the timer is dropped
            handle.state.pending.store(false, Ordering::SeqCst);
        } else {
            heaps.timers.push(entry);
        }
        self.shared.notifier.notify_all();
        handle
    }

    /// Schedules `timer` to fire after `delay`.
    pub fn schedule_in(&self, delay: Duration, timer: Arc<dyn Timer>) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, timer)
    }

    /// Schedules `timer` to fire on the scheduler's next pass.
    pub fn schedule_immediate(&self, timer: Arc<dyn Timer>) -> TimerHandle {
        self.schedule_at(Instant::now(), timer)
    }

    /// Timers scheduled and not yet fired or reaped.
    pub fn num_pending_timers(&self) -> usize {
        let heaps = self.shared.heaps.lock();
        let counts = self.shared.cancel.lock();
        (heaps.timers.len() + heaps.old_timers.len())
            .saturating_sub(counts.num_cancelled + counts.old_num_cancelled)
    }

    /// Posts an application signal: sets the flag and wakes the
    /// scheduler. Safe to call from any thread at any time.
    pub fn post_signal(&self, sig: u8) {
        assert!(sig < NUM_SIGNALS);
        self.signals_flag(sig).store(true, Ordering::SeqCst);
        self.shared.sig_fired.store(true, Ordering::SeqCst);
        // Touch the lock so a scheduler heading into its wait cannot
        // miss the notification
        drop(self.shared.heaps.lock());
        self.shared.notifier.notify_all();
    }

    fn signals_flag(&self, sig: u8) -> &AtomicBool {
        &self.shared.signals[sig as usize]
    }

    /// Registers `handler` for `sig`, replacing any previous handler.
    pub fn add_signal_handler(&self, sig: u8, handler: SignalHandler) {
        assert!(sig < NUM_SIGNALS);
        self.shared.handlers.lock().insert(sig, handler);
    }

    /// Runs every timer whose deadline has passed and discards
    /// cancelled timers found at the top of the heap. Returns the time
    /// until the next live expiry, or `None` if the heap is empty.
    /// Callbacks run with no lock held.
    pub fn run_expired_timers(&self) -> Option<Duration> {
        let shared = &self.shared;

        shared.handle_signals();

        loop {
            if shared.should_stop.load(Ordering::SeqCst) {
                return None;
            }

            // Hold the system lock only while popping; the cancel lock
            // guards the examine-top window against a racing cancel
            let popped = {
                let mut heaps = shared.heaps.lock();
                let mut counts = shared.cancel.lock();

                let top = heaps.timers.peek()?;
                if top.state.cancelled.load(Ordering::SeqCst) {
                    // Cancelled timers pop immediately, deadline or not
                    let entry = heaps.timers.pop().expect("peeked entry vanished");
                    entry.state.pending.store(false, Ordering::SeqCst);
                    if counts.num_cancelled > 0 {
                        counts.num_cancelled -= 1;
                    } else {
                        warn!("cancelled-timer count underflow while popping");
                    }
                    None
                } else {
                    let now = Instant::now();
                    if top.when > now {
                        return Some(top.when - now);
                    }
                    let entry = heaps.timers.pop().expect("peeked entry vanished");
                    entry.state.pending.store(false, Ordering::SeqCst);
                    Some((entry, now))
                }
            };

            if let Some((entry, now)) = popped {
                let late = now.saturating_duration_since(entry.when);
                if late > Duration::from_secs(2) {
                    warn!("timer thread running slow: timer is {late:?} late");
                }
                entry.timer.fire(now);
            }
            // A discarded cancelled entry just loops for the next top
        }
    }

    /// One reaper sweep: swap the heaps if enough cancellations have
    /// accumulated, then drain the old heap, reinserting survivors.
    /// Public so shutdown paths and tests can sweep deterministically.
    pub fn reap_cancelled_timers(&self) {
        let shared = &self.shared;

        {
            let mut heaps = shared.heaps.lock();
            if heaps.old_timers.is_empty() {
                let mut counts = shared.cancel.lock();
                let cancelled = counts.num_cancelled;
                let active = heaps.timers.len().saturating_sub(cancelled);
                if cancelled == 0 || (cancelled < active && cancelled < CANCELLED_HIGH_WATER) {
                    return;
                }
                let heaps = &mut *heaps;
                std::mem::swap(&mut heaps.timers, &mut heaps.old_timers);
                counts.old_num_cancelled = counts.num_cancelled;
                counts.num_cancelled = 0;
            }
        }

        // Drain without blocking the scheduler
        let old = {
            let mut heaps = shared.heaps.lock();
            std::mem::take(&mut heaps.old_timers)
        };
        let mut reinserted = 0usize;
        for entry in old.into_sorted_vec() {
            if entry.state.cancelled.load(Ordering::SeqCst) {
                entry.state.pending.store(false, Ordering::SeqCst);
                // Dropping the entry releases the timer object
            } else {
                let mut heaps = shared.heaps.lock();
                heaps.timers.push(entry);
                shared.notifier.notify_all();
                reinserted += 1;
            }
        }
        debug!("timer reap complete, {reinserted} timers reinserted");

        // Cancellations that raced the drain come out in the wash on
        // later passes
        shared.cancel.lock().old_num_cancelled = 0;
    }

    fn scheduler_loop(&self) {
        loop {
            let timeout = self.run_expired_timers();

            let mut heaps = self.shared.heaps.lock();
            if self.shared.should_stop.load(Ordering::SeqCst) {
                break;
            }
            if self.shared.sig_fired.load(Ordering::SeqCst) {
                // A signal arrived between the pass and the lock
                continue;
            }
            // Recompute against the heap top: a timer scheduled since
            // the pass may be earlier than `timeout`
            let wait = heaps
                .timers
                .peek()
                .map(|top| top.when.saturating_duration_since(Instant::now()))
                .or(timeout);
            match wait {
                Some(d) => {
                    self.shared.notifier.wait_for(&mut heaps, d);
                }
                None => self.shared.notifier.wait(&mut heaps),
            }
        }

        self.cancel_all_timers();
    }

    fn reaper_loop(&self) {
        let step = Duration::from_millis(250);
        let mut elapsed = Duration::ZERO;
        while !self.shared.should_stop.load(Ordering::SeqCst) {
            std::thread::sleep(step.min(self.reaper_interval));
            elapsed += step;
            if elapsed >= self.reaper_interval {
                if !self.shared.should_stop.load(Ordering::SeqCst) {
                    self.reap_cancelled_timers();
                }
                elapsed = Duration::ZERO;
            }
        }
    }

    /// Drains both heaps, marking every timer cancelled. Pending
    /// callbacks are skipped.
    fn cancel_all_timers(&self) {
        let mut heaps = self.shared.heaps.lock();
        let mut counts = self.shared.cancel.lock();

        let mut num_cancels = 0usize;
        let heaps = &mut *heaps;
        for heap in [&mut heaps.timers, &mut heaps.old_timers] {
            while let Some(entry) = heap.pop() {
                entry.state.cancelled.store(true, Ordering::SeqCst);
                entry.state.pending.store(false, Ordering::SeqCst);
                num_cancels += 1;
            }
        }
        counts.num_cancelled = 0;
        counts.old_num_cancelled = 0;
        if num_cancels > 0 {
            debug!("cancelled {num_cancels} timers at shutdown");
        }
    }

    /// Stops both threads, draining all queues. Timers that have not
    /// fired never will.
    pub fn shutdown(&self) {
        {
            let _heaps = self.shared.heaps.lock();
            self.shared.should_stop.store(true, Ordering::SeqCst);
            self.shared.notifier.notify_all();
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for t in threads {
            if t.thread().id() != std::thread::current().id() {
                _ = t.join();
            }
        }
    }
}

impl Drop for TimerSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
