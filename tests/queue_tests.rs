//! CompletionQueue and the stage-aware consumer loops.

use anyhow::anyhow;
use grantmap::monitor::StageRegistry;
use grantmap::pipeline::{
    CompletionQueue, StageRun, batch_process_completion_queue, process_completion_queue,
};
use grantmap::{Phase, StageKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

fn run(registry: &StageRegistry) -> StageRun<'_> {
    StageRun {
        stage: StageKey::new("123", Phase::Filter),
        registry,
        poll: POLL,
    }
}

// --- CompletionQueue ---

#[test]
fn test_try_get_times_out_on_empty() {
    let q: CompletionQueue<u32> = CompletionQueue::new();
    let start = Instant::now();
    assert_eq!(q.try_get(Duration::from_millis(20)), None);
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn test_fifo_order() {
    let q = CompletionQueue::new();
    for i in 0..5 {
        q.put(i);
    }
    let got: Vec<_> = (0..5).filter_map(|_| q.try_get(POLL)).collect();
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_completion_is_monotonic_and_idempotent() {
    let q: CompletionQueue<u32> = CompletionQueue::new();
    assert!(!q.is_completed());
    q.set_completed();
    q.set_completed();
    assert!(q.is_completed());
    assert!(q.is_drained());
}

#[test]
fn test_not_drained_while_items_remain() {
    let q = CompletionQueue::new();
    q.put(1);
    q.set_completed();
    assert!(!q.is_drained());
    assert_eq!(q.try_get(POLL), Some(1));
    assert!(q.is_drained());
    assert_eq!(q.try_get(POLL), None);
}

#[test]
fn test_try_get_wakes_on_put() {
    let q = Arc::new(CompletionQueue::new());
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q.put(7);
        })
    };
    assert_eq!(q.try_get(Duration::from_secs(5)), Some(7));
    producer.join().unwrap();
}

#[test]
fn test_consumer_sees_every_item_before_completion() {
    let q = Arc::new(CompletionQueue::new());
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for i in 0..1000 {
                q.put(i);
            }
            q.set_completed();
        })
    };
    let mut got = Vec::new();
    while !q.is_drained() {
        if let Some(i) = q.try_get(POLL) {
            got.push(i);
        }
    }
    producer.join().unwrap();
    assert_eq!(got, (0..1000).collect::<Vec<_>>());
}

// --- process_completion_queue ---

#[test]
fn test_process_drains_and_signals_downstream() {
    let registry = StageRegistry::new(None);
    let src = CompletionQueue::new();
    let snk = CompletionQueue::new();
    for i in 0..10 {
        src.put(i);
    }
    src.set_completed();

    let n = process_completion_queue(
        &src,
        &run(&registry),
        |i| {
            snk.put(i * 2);
            Ok(())
        },
        || snk.set_completed(),
    )
    .unwrap();

    assert_eq!(n, 10);
    assert!(snk.is_completed());
    assert_eq!(snk.len(), 10);
    assert!(registry.active_stages().is_empty());
    assert_eq!(
        registry.notifications().drain_now(),
        vec!["123.filter_stage_completed".to_string()]
    );
}

#[test]
fn test_process_starts_stage_lazily() {
    let registry = Arc::new(StageRegistry::new(None));
    let src = Arc::new(CompletionQueue::new());
    let stage = StageKey::new("123", Phase::Filter);

    let consumer = {
        let (registry, src) = (Arc::clone(&registry), Arc::clone(&src));
        thread::spawn(move || {
            process_completion_queue(&src, &run(&registry), |_: u32| Ok(()), || {})
        })
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!registry.is_active(&stage));

    src.put(1);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !registry.is_active(&stage) && Instant::now() < deadline {
        thread::sleep(POLL);
    }
    assert!(registry.is_active(&stage));

    src.set_completed();
    assert_eq!(consumer.join().unwrap().unwrap(), 1);
    assert!(!registry.is_active(&stage));
}

#[test]
fn test_process_error_still_completes_downstream() {
    let registry = StageRegistry::new(None);
    let src = CompletionQueue::new();
    let snk: CompletionQueue<u32> = CompletionQueue::new();
    src.put(1);
    src.put(2);
    src.set_completed();

    let result = process_completion_queue(
        &src,
        &run(&registry),
        |i| if i == 1 { Err(anyhow!("boom")) } else { Ok(()) },
        || snk.set_completed(),
    );

    assert!(result.is_err());
    assert!(snk.is_completed());
    assert!(registry.active_stages().is_empty());
}

#[test]
fn test_process_panic_still_completes_downstream() {
    let registry = Arc::new(StageRegistry::new(None));
    let src = Arc::new(CompletionQueue::new());
    let snk = Arc::new(CompletionQueue::<u32>::new());
    src.put(1);
    src.set_completed();

    let handle = {
        let (registry, src, snk) = (Arc::clone(&registry), Arc::clone(&src), Arc::clone(&snk));
        thread::spawn(move || {
            process_completion_queue(
                &src,
                &run(&registry),
                |_: u32| -> anyhow::Result<()> { panic!("consumer bug") },
                || snk.set_completed(),
            )
        })
    };
    assert!(handle.join().is_err());
    assert!(snk.is_completed());
    assert!(registry.active_stages().is_empty());
}

// --- batch_process_completion_queue ---

#[test]
fn test_batch_process_flushes_partial_batch() {
    let registry = StageRegistry::new(None);
    let src = CompletionQueue::new();
    for i in 0..7 {
        src.put(i);
    }
    src.set_completed();

    let mut batches = Vec::new();
    let done = AtomicBool::new(false);
    let n = batch_process_completion_queue(
        &src,
        3,
        &run(&registry),
        |batch| {
            batches.push(batch);
            Ok(())
        },
        || done.store(true, Ordering::SeqCst),
    )
    .unwrap();

    assert_eq!(n, 7);
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn test_batch_process_empty_source() {
    let registry = StageRegistry::new(None);
    let src: CompletionQueue<u32> = CompletionQueue::new();
    src.set_completed();
    let mut calls = 0;
    let n = batch_process_completion_queue(
        &src,
        3,
        &run(&registry),
        |_| {
            calls += 1;
            Ok(())
        },
        || {},
    )
    .unwrap();
    assert_eq!((n, calls), (0, 0));
    assert!(!registry.is_active(&StageKey::new("123", Phase::Filter)));
    assert_eq!(
        registry.notifications().drain_now(),
        vec!["123.filter_stage_completed".to_string()]
    );
}
