//! Auto-sleep scheduler integration tests
//!
//! The scheduler runs against the simulated clock: tests arm it, jump time
//! past the firing boundary, and observe cycles without any real waiting.

mod common;

use chrono::FixedOffset;
use common::harness;
use naiad_core::io::TimeProvider;
use naiad_engine::{ms_until_next, AutoSleepConfig, SleepOptions, SleepTarget};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const GROUP: &str = "default";

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

/// Give the scheduler task a chance to run between clock jumps.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_auto_sleep_fires_at_configured_time() {
    let h = harness(42);
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();

    // Sim clock starts at 2024-01-01T00:00:00Z; fire at 03:00.
    h.engine.start_auto_sleep(
        AutoSleepConfig::new(3, 0, SleepTarget::single(GROUP))
            .with_options(SleepOptions::new().with_cooldown_minutes(0))
            .with_utc_offset(utc())
            .on_complete(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
    );
    assert!(h.engine.auto_sleep_active());

    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 0, "not due yet");

    let delay = ms_until_next(h.clock.now_ms(), 3, 0, utc());
    h.clock.advance_ms(delay + 1);
    settle().await;

    assert_eq!(completions.load(Ordering::SeqCst), 1, "fired once at 03:00");

    // Next firing is a full day out, recomputed after the run.
    h.clock.advance_ms(60 * 60 * 1000);
    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    h.clock.advance_ms(24 * 60 * 60 * 1000);
    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 2, "re-armed for the next day");

    h.engine.stop_auto_sleep();
}

#[tokio::test]
async fn test_stop_auto_sleep_cancels() {
    let h = harness(42);
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();

    h.engine.start_auto_sleep(
        AutoSleepConfig::new(3, 0, SleepTarget::single(GROUP))
            .with_utc_offset(utc())
            .on_complete(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
    );
    settle().await;

    h.engine.stop_auto_sleep();
    assert!(!h.engine.auto_sleep_active());

    h.clock.advance_ms(48 * 60 * 60 * 1000);
    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 0, "cancelled before firing");
}

#[tokio::test]
async fn test_restart_replaces_previous_task() {
    let h = harness(42);
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    h.engine.start_auto_sleep(
        AutoSleepConfig::new(3, 0, SleepTarget::single(GROUP))
            .with_utc_offset(utc())
            .on_complete(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
    );
    settle().await;

    let counter = second.clone();
    h.engine.start_auto_sleep(
        AutoSleepConfig::new(5, 0, SleepTarget::single(GROUP))
            .with_utc_offset(utc())
            .on_complete(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
    );
    settle().await;

    h.clock.advance_ms(6 * 60 * 60 * 1000);
    settle().await;

    assert_eq!(first.load(Ordering::SeqCst), 0, "replaced task never fires");
    assert_eq!(second.load(Ordering::SeqCst), 1);

    h.engine.stop_auto_sleep();
}

#[tokio::test]
async fn test_callback_panic_does_not_kill_the_loop() {
    let h = harness(42);
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();

    h.engine.start_auto_sleep(
        AutoSleepConfig::new(3, 0, SleepTarget::single(GROUP))
            .with_utc_offset(utc())
            .on_complete(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("user callback exploded");
            })),
    );
    settle().await;

    let delay = ms_until_next(h.clock.now_ms(), 3, 0, utc());
    h.clock.advance_ms(delay + 1);
    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    // The loop survived the panic and re-armed.
    h.clock.advance_ms(24 * 60 * 60 * 1000);
    settle().await;
    assert_eq!(completions.load(Ordering::SeqCst), 2);

    h.engine.stop_auto_sleep();
}
