//! Threaded interface for submitting and controlling batches of rules.
//!
//! Rules are independent, so a batch is spread over a small pool of scoped
//! worker threads that share the engine read-only. Results always come back
//! in submission order. Cancellation is cooperative through an
//! `Arc<AtomicBool>`: workers check it between rules and between the stages
//! of a rule, and the SQLite store checks it while a query runs. A rule that
//! was abandoned has no result. A rule whose processing panics is recorded as
//! a failure without taking its worker, or the rest of the batch, down.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::engine::{Abandoned, RuleEngine};
use crate::error::SynthesisError;
use crate::result::RuleQueryResult;
use crate::rule::RuleDescription;

/// Cancellation token shared with worker threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
}

/// Opaque batch identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

/// Handle to a running or completed batch.
pub struct BatchHandle {
    pub id: BatchId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<Vec<Option<RuleQueryResult>>>>,
    /// `(submission index, result)` as rules complete, when streaming.
    pub results: Option<Receiver<(usize, RuleQueryResult)>>,
}
impl BatchHandle {
    /// Request cancellation (cooperative). Rules already finished keep their results.
    pub fn cancel(&self) { self.cancel.cancel(); }
    /// Elapsed time since start.
    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
    /// Wait for the batch to finish. One slot per submitted rule, `None` for abandoned rules.
    pub fn join(mut self) -> Vec<Option<RuleQueryResult>> {
        match self.join.take().map(JoinHandle::join) {
            Some(Ok(results)) => results,
            Some(Err(_)) => {
                error!(batch = self.id.0, "batch thread panicked");
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

/// Batch submission options.
pub struct BatchOptions {
    pub stream_results: bool,
    pub workers: usize,
}
impl Default for BatchOptions {
    fn default() -> Self { Self { stream_results: false, workers: default_workers() } }
}

pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Registry managing batch lifecycles.
pub struct RuleInterface {
    engine: Arc<RuleEngine>,
    workers: usize,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<BatchId, CancelToken>>>, // for external cancellation
}

impl RuleInterface {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine, workers: default_workers(), next_id: AtomicU64::new(0), active: Arc::default() }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn engine(&self) -> &RuleEngine { &self.engine }

    fn allocate_id(&self) -> BatchId { BatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1) }

    /// Process rules on the calling thread's worker pool and wait for all of them.
    /// One result per rule, in submission order.
    pub fn run_sync(&self, rules: &[RuleDescription]) -> Vec<RuleQueryResult> {
        let started = Instant::now();
        let results: Vec<RuleQueryResult> = process_ordered(&self.engine, rules, self.workers, &CancelToken::new(), None)
            .into_iter()
            .zip(rules)
            .enumerate()
            .map(|(index, (slot, rule))| {
                slot.unwrap_or_else(|| {
                    error!(rule = %rule.id, index, "rule left no result");
                    failed(rule, "rule left no result")
                })
            })
            .collect();
        info!(rules = rules.len(), ms = started.elapsed().as_millis() as u64, "batch complete");
        results
    }

    /// Submit rules for processing on a background thread.
    pub fn start_batch(&self, rules: Vec<RuleDescription>, options: BatchOptions) -> BatchHandle {
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        self.active.lock().unwrap_or_else(PoisonError::into_inner).insert(id, cancel.clone());

        let (tx, rx) = if options.stream_results {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let engine = Arc::clone(&self.engine);
        let active = Arc::clone(&self.active);
        let cancel_for_thread = cancel.clone();
        let workers = options.workers.max(1);
        let join = thread::spawn(move || {
            let results = process_ordered(&engine, &rules, workers, &cancel_for_thread, tx);
            active.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            debug!(batch = id.0, rules = rules.len(), cancelled = cancel_for_thread.is_cancelled(), "batch finished");
            results
        });

        BatchHandle { id, cancel, started: Instant::now(), join: Some(join), results: rx }
    }

    /// Cancel a batch by id. False when no such batch is running.
    pub fn cancel(&self, id: BatchId) -> bool {
        if let Some(token) = self.active.lock().unwrap_or_else(PoisonError::into_inner).get(&id) {
            token.cancel();
            true
        } else { false }
    }
}

fn failed(rule: &RuleDescription, reason: &str) -> RuleQueryResult {
    RuleQueryResult::synthesis_unavailable(&rule.id, &SynthesisError::Unavailable(reason.to_string()), 0)
}

/// Processes one rule, turning a panic into a failed result.
fn process_guarded(engine: &RuleEngine, rule: &RuleDescription, cancel: &CancelToken) -> Result<RuleQueryResult, Abandoned> {
    catch_unwind(AssertUnwindSafe(|| engine.process_cancellable(rule, cancel))).unwrap_or_else(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "unknown panic".to_string()
        };
        error!(rule = %rule.id, panic = %message, "rule processing panicked");
        Ok(failed(rule, &format!("rule processing panicked: {message}")))
    })
}

/// Processes `rules` on up to `workers` scoped threads. Slot `i` holds the
/// result for `rules[i]`, or `None` if that rule was abandoned.
pub fn process_ordered(
    engine: &RuleEngine,
    rules: &[RuleDescription],
    workers: usize,
    cancel: &CancelToken,
    sink: Option<Sender<(usize, RuleQueryResult)>>,
) -> Vec<Option<RuleQueryResult>> {
    let next = AtomicUsize::new(0);
    let mut slots: Vec<Option<RuleQueryResult>> = vec![None; rules.len()];
    let workers = workers.clamp(1, rules.len().max(1));
    let finished: Vec<Vec<(usize, RuleQueryResult)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let sink = sink.clone();
                let next = &next;
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(rule) = rules.get(index) else { break };
                        if cancel.is_cancelled() {
                            break;
                        }
                        match process_guarded(engine, rule, cancel) {
                            Ok(result) => {
                                if let Some(sink) = &sink {
                                    // a dropped receiver only means nobody is listening
                                    let _ = sink.send((index, result.clone()));
                                }
                                done.push((index, result));
                            }
                            Err(abandoned) => debug!(error = %abandoned, "rule skipped"),
                        }
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| {
                error!("rule worker panicked");
                Vec::new()
            }))
            .collect()
    });
    for (index, result) in finished.into_iter().flatten() {
        slots[index] = Some(result);
    }
    slots
}
