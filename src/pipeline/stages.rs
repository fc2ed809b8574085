//! Queue consumers that tie a phase's loop to its stage lifecycle.

use anyhow::Result;
use std::time::Duration;

use super::queue::CompletionQueue;
use crate::StageKey;
use crate::monitor::StageRegistry;

/// Stage bookkeeping for one consumer loop.
pub struct StageRun<'a> {
    pub stage: StageKey,
    pub registry: &'a StageRegistry,
    pub poll: Duration,
}

/// Completes the stage and runs the exit callback however the loop ends (including panics).
struct ExitGuard<'a, C: FnOnce()> {
    run: &'a StageRun<'a>,
    on_exit: Option<C>,
}

impl<C: FnOnce()> Drop for ExitGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
        self.run.registry.complete_stage(&self.run.stage);
    }
}

/// Drain `src`, calling `f` per item. The stage starts on the first item. An error from `f`
/// stops the loop and is returned. Returns the number of items processed.
pub fn process_completion_queue<T, F, C>(
    src: &CompletionQueue<T>,
    run: &StageRun<'_>,
    mut f: F,
    on_exit: C,
) -> Result<usize>
where
    F: FnMut(T) -> Result<()>,
    C: FnOnce(),
{
    let _guard = ExitGuard {
        run,
        on_exit: Some(on_exit),
    };
    let mut processed = 0;
    while !src.is_drained() {
        let Some(item) = src.try_get(run.poll) else {
            continue;
        };
        run.registry.start_stage(&run.stage);
        f(item)?;
        processed += 1;
    }
    Ok(processed)
}

/// Like [`process_completion_queue`], but hands `f` batches of up to `batch_size` items. A
/// trailing partial batch is flushed once `src` is drained.
pub fn batch_process_completion_queue<T, F, C>(
    src: &CompletionQueue<T>,
    batch_size: usize,
    run: &StageRun<'_>,
    mut f: F,
    on_exit: C,
) -> Result<usize>
where
    F: FnMut(Vec<T>) -> Result<()>,
    C: FnOnce(),
{
    let _guard = ExitGuard {
        run,
        on_exit: Some(on_exit),
    };
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut processed = 0;
    while !src.is_drained() {
        if batch.len() >= batch_size {
            processed += batch.len();
            f(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
            continue;
        }
        if let Some(item) = src.try_get(run.poll) {
            run.registry.start_stage(&run.stage);
            batch.push(item);
        }
    }
    if !batch.is_empty() {
        processed += batch.len();
        f(batch)?;
    }
    Ok(processed)
}
