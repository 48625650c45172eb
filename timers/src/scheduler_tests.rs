use super::*;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;

struct Tick {
    tx: mpsc::Sender<&'static str>,
    tag: &'static str,
}

impl Timer for Tick {
    fn fire(&self, _now: Instant) {
        _ = self.tx.send(self.tag);
    }
}

#[test]
fn fires_in_deadline_order() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();

    let base = Instant::now() + Duration::from_millis(50);
    // Scheduled out of order, must fire in (when, seqno) order
    system.schedule_at(
        base + Duration::from_millis(40),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "c",
        }),
    );
    system.schedule_at(
        base,
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "a",
        }),
    );
    system.schedule_at(
        base + Duration::from_millis(20),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "b",
        }),
    );

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "a");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "b");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "c");
    system.shutdown();
}

#[test]
fn ties_break_by_insertion_order() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();

    let when = Instant::now() + Duration::from_millis(50);
    for tag in ["first", "second", "third"] {
        system.schedule_at(
            when,
            Arc::new(Tick {
                tx: tx.clone(),
                tag,
            }),
        );
    }

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "first");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "second");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "third");
    system.shutdown();
}

#[test]
fn cancelled_timer_never_fires() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();

    // Timer A at T+100ms, timer B at T+50ms; cancel A
    let a = system.schedule_in(
        Duration::from_millis(100),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "a",
        }),
    );
    let _b = system.schedule_in(
        Duration::from_millis(50),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "b",
        }),
    );

    assert!(a.cancel());
    // A second cancel is a no-op
    assert!(!a.cancel());

    // B fires, A does not
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "b");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // The heap popped A without invoking it and the cancelled count
    // came back down
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(system.num_pending_timers(), 0);
    system.shutdown();
}

#[test]
fn cancel_after_fire_returns_false() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();

    let handle = system.schedule_in(
        Duration::from_millis(10),
        Arc::new(Tick { tx, tag: "t" }),
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "t");
    // Give the scheduler a moment to clear the pending flag
    std::thread::sleep(Duration::from_millis(20));
    assert!(!handle.cancel());
    system.shutdown();
}

#[test]
fn immediate_timers_fire() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();
    system.schedule_immediate(Arc::new(Tick { tx, tag: "now" }));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "now");
    system.shutdown();
}

#[test]
fn reaper_drains_cancelled_and_keeps_live() {
    let system = TimerSystem::with_reaper_interval(Duration::from_secs(3600));
    let (tx, rx) = mpsc::channel();

    // A live timer far in the future plus a pile of cancelled ones
    let _live = system.schedule_in(
        Duration::from_millis(250),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "live",
        }),
    );
    let mut handles = Vec::new();
    for _ in 0..10 {
        handles.push(system.schedule_in(
            Duration::from_secs(3600),
            Arc::new(Tick {
                tx: tx.clone(),
                tag: "dead",
            }),
        ));
    }
    for h in &handles {
        assert!(h.cancel());
    }
    assert_eq!(system.num_pending_timers(), 1);

    // Sweep synchronously: cancelled entries dropped, live reinserted
    system.reap_cancelled_timers();
    assert_eq!(system.num_pending_timers(), 1);

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "live");
    assert!(rx.try_recv().is_err());
    system.shutdown();
}

#[test]
fn signals_delivered_once_per_batch() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();
    let count = Arc::new(AtomicUsize::new(0));

    let handler_count = count.clone();
    system.add_signal_handler(
        5,
        Arc::new(move |sig| {
            assert_eq!(sig, 5);
            handler_count.fetch_add(1, Ordering::SeqCst);
            _ = tx.send("sig");
        }),
    );

    system.post_signal(5);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "sig");
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // A second post is a fresh batch
    system.post_signal(5);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "sig");
    assert_eq!(count.load(Ordering::SeqCst), 2);
    system.shutdown();
}

#[test]
fn shutdown_drains_queues_and_skips_callbacks() {
    let system = TimerSystem::start();
    let (tx, rx) = mpsc::channel();

    for _ in 0..5 {
        system.schedule_in(
            Duration::from_secs(3600),
            Arc::new(Tick {
                tx: tx.clone(),
                tag: "never",
            }),
        );
    }
    system.shutdown();
    assert_eq!(system.num_pending_timers(), 0);
    assert!(rx.try_recv().is_err());

    // Scheduling after shutdown quietly drops the timer
    let handle = system.schedule_in(
        Duration::from_millis(1),
        Arc::new(Tick {
            tx: tx.clone(),
            tag: "late",
        }),
    );
    assert!(!handle.pending());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}
