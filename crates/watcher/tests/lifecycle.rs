#![forbid(unsafe_code)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use kevex_core::clock::FakeClock;
use kevex_core::feed::{ChangeFeed, FeedError, Notification};
use kevex_core::metrics::MetricsStore;
use kevex_core::EnhancedEvent;
use kevex_watcher::{EventWatcher, WatcherConfig};

use common::*;

type Feed = mpsc::UnboundedSender<Result<Notification, FeedError>>;

fn watcher(omit_lookup: bool) -> (EventWatcher, Feed, Arc<MetricsStore>, Arc<Mutex<Vec<EnhancedEvent>>>) {
    let (tx, rx) = mpsc::unbounded();
    let feed: Box<dyn ChangeFeed> = Box::new(rx.boxed());
    let metrics = Arc::new(MetricsStore::new("test_"));
    let (handler, seen) = collector();
    let config = WatcherConfig { max_event_age: Duration::from_secs(300), omit_lookup, ..WatcherConfig::default() };
    let w = EventWatcher::with_parts(
        feed,
        Arc::new(FixedProvider::default()),
        Arc::new(FakeClock::new(t0())),
        config,
        Arc::clone(&metrics),
        handler,
    );
    (w, tx, metrics, seen)
}

fn applied(name: &str) -> Result<Notification, FeedError> {
    Ok(Notification::Applied(Box::new(event(name, Some(t0()), None))))
}

async fn wait_for(seen: &Arc<Mutex<Vec<EnhancedEvent>>>, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler not called in time");
}

fn names(seen: &Arc<Mutex<Vec<EnhancedEvent>>>) -> Vec<String> {
    seen.lock().unwrap().iter().map(|e| e.event.metadata.name.clone().unwrap_or_default()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_are_dispatched_in_feed_order() {
    let (mut w, tx, metrics, seen) = watcher(false);
    w.start();
    assert!(w.is_running());

    for n in ["a", "b", "c"] {
        tx.unbounded_send(applied(n)).unwrap();
    }
    wait_for(&seen, 3).await;
    w.stop().await;

    assert_eq!(names(&seen), vec!["a", "b", "c"]);
    assert_eq!(metrics.events_processed(), 3);
    assert_eq!(seen.lock().unwrap()[0].involved_object.labels, fixed_metadata().labels);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_handler_calls_after_stop() {
    let (mut w, tx, _, seen) = watcher(true);
    w.start();
    tx.unbounded_send(applied("before")).unwrap();
    wait_for(&seen, 1).await;

    w.stop().await;
    assert!(!w.is_running());
    let _ = tx.unbounded_send(applied("after"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(names(&seen), vec!["before"]);
    // second stop is a no-op
    w.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_errors_are_counted_and_not_fatal() {
    let (mut w, tx, metrics, seen) = watcher(true);
    w.start();
    tx.unbounded_send(Err(FeedError::transport("connection reset"))).unwrap();
    tx.unbounded_send(Err(FeedError::transport("connection reset"))).unwrap();
    tx.unbounded_send(applied("survivor")).unwrap();
    wait_for(&seen, 1).await;
    w.stop().await;

    assert_eq!(metrics.watch_errors(), 2);
    assert_eq!(names(&seen), vec!["survivor"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deletions_are_ignored() {
    let (mut w, tx, metrics, seen) = watcher(true);
    w.start();
    tx.unbounded_send(Ok(Notification::Deleted(Box::new(event("gone", Some(t0()), None))))).unwrap();
    tx.unbounded_send(applied("kept")).unwrap();
    wait_for(&seen, 1).await;
    w.stop().await;

    assert_eq!(names(&seen), vec!["kept"]);
    assert_eq!(metrics.events_processed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn updates_are_redelivered() {
    let (mut w, tx, _, seen) = watcher(true);
    w.start();
    tx.unbounded_send(applied("dup")).unwrap();
    tx.unbounded_send(applied("dup")).unwrap();
    wait_for(&seen, 2).await;
    w.stop().await;
    assert_eq!(names(&seen), vec!["dup", "dup"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_exits_when_feed_ends() {
    let (mut w, tx, _, _) = watcher(true);
    w.start();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), async {
        while w.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watcher task should exit");
    w.stop().await;
}

#[tokio::test]
async fn boot_time_is_fixed_while_running() {
    let (mut w, _tx, _, _) = watcher(true);
    let booted = w.boot_time();
    assert_eq!(booted, t0());
    w.start();
    w.set_boot_time(t0() - chrono::Duration::hours(1));
    assert_eq!(w.boot_time(), booted);
    w.stop().await;
    w.set_boot_time(t0() - chrono::Duration::hours(1));
    assert_eq!(w.boot_time(), t0() - chrono::Duration::hours(1));
}
