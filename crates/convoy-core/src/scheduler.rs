//! Level-synchronous round coordinator for signals
//!
//! The scheduler drives the batching fixpoint: collect every live task's
//! newly issued signals, partition them across the handler registry,
//! invoke each claiming handler once for its group, zip the results back
//! to the emitting tasks, and repeat until no task has code left. A round
//! boundary is a hard barrier: signals issued while resuming in round *k*
//! are only visible to the dispatch of round *k + 1*, which bounds each
//! round's batch to already-known work and defines termination.

use crate::handle::Handle;
use crate::handler::SignalHandler;
use crate::signal::{Signal, SignalQuery, SignalResult};
use crate::task::{SignalTask, TaskScope};
use bson::Bson;
use convoy_common::{ConvoyError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

struct ActiveTask {
    task: SignalTask,
    resume: Vec<SignalResult>,
}

/// Round coordinator over an ordered handler registry and a set of
/// resumable tasks.
///
/// Handlers are consulted in registration order; the first whose
/// `can_handle` accepts a query owns it for the round. A query no handler
/// accepts aborts the run before any handler executes.
#[derive(Default)]
pub struct SignalScheduler {
    handlers: Vec<Arc<dyn SignalHandler>>,
    tasks: Vec<ActiveTask>,
}

impl SignalScheduler {
    /// Create a scheduler with an empty handler registry
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Append a handler to the registry (builder pattern)
    pub fn with_handler<H: SignalHandler + 'static>(mut self, handler: H) -> Self {
        self.add_handler(handler);
        self
    }

    /// Append a handler to the registry
    pub fn add_handler<H: SignalHandler + 'static>(&mut self, handler: H) {
        tracing::debug!(handler = handler.name(), "registering signal handler");
        self.handlers.push(Arc::new(handler));
    }

    /// Register a task body for evaluation.
    ///
    /// Returns the handle that will carry the body's final value once
    /// [`SignalScheduler::run`] reaches the fixpoint.
    pub fn spawn<F, Fut>(&mut self, body: F) -> Handle<Bson>
    where
        F: FnOnce(TaskScope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bson>> + Send + 'static,
    {
        let task = SignalTask::spawn(body);
        let output = task.output();
        self.tasks.push(ActiveTask {
            task,
            resume: Vec::new(),
        });
        output
    }

    /// Number of tasks still holding code to run
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Drive all registered tasks to completion.
    ///
    /// Per-task errors stay local to each task's output handle; only
    /// structural faults (unhandled signal, double completion, handler
    /// contract violations, step-protocol misuse) abort the run.
    pub async fn run(&mut self) -> Result<()> {
        let mut round = 0usize;
        while !self.tasks.is_empty() {
            round += 1;
            self.step(round).await?;
        }
        Ok(())
    }

    /// Execute one full collect-partition-dispatch-resume cycle
    async fn step(&mut self, round: usize) -> Result<()> {
        // 1. Step every live task, tagging signals with (slot, ordinal)
        let mut emitted: Vec<(usize, usize, Signal)> = Vec::new();
        for (slot, active) in self.tasks.iter_mut().enumerate() {
            let resume = std::mem::take(&mut active.resume);
            let signals = active.task.next(resume).await?;
            for (ordinal, signal) in signals.into_iter().enumerate() {
                emitted.push((slot, ordinal, signal));
            }
        }
        tracing::debug!(round, signals = emitted.len(), "collected round signals");

        // 2. Partition by first capable handler; fault before any handler
        //    runs if a signal is unclaimed
        let mut groups: Vec<Vec<(usize, usize, Signal)>> =
            (0..self.handlers.len()).map(|_| Vec::new()).collect();
        for entry in emitted {
            let idx = self
                .handlers
                .iter()
                .position(|h| h.can_handle(entry.2.query()))
                .ok_or_else(|| ConvoyError::UnhandledSignal(entry.2.query().label()))?;
            groups[idx].push(entry);
        }

        // 3. One handler call per non-empty group, concurrently across
        //    handlers; no ordering guarantee between different handlers
        let dispatches = groups
            .into_iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .map(|(idx, group)| {
                let handler = Arc::clone(&self.handlers[idx]);
                async move {
                    let queries: Vec<SignalQuery> =
                        group.iter().map(|(_, _, s)| s.query().clone()).collect();
                    tracing::trace!(
                        handler = handler.name(),
                        batch = queries.len(),
                        "dispatching signal batch"
                    );
                    let outcomes = match handler.handle(&queries).await {
                        Ok(results) => {
                            if results.len() != queries.len() {
                                return Err(ConvoyError::Internal(format!(
                                    "handler {} returned {} results for {} queries",
                                    handler.name(),
                                    results.len(),
                                    queries.len()
                                )));
                            }
                            results
                        }
                        // Uniform failure for the whole batch, no partial
                        // success inference
                        Err(err) => vec![Err(err); queries.len()],
                    };
                    Ok((group, outcomes))
                }
            })
            .collect::<Vec<_>>();
        let finished = futures::future::join_all(dispatches).await;

        // 4. Resolve handles and rebuild per-task resume vectors, ordered
        //    by ordinal
        let mut per_task: HashMap<usize, Vec<(usize, SignalResult)>> = HashMap::new();
        for dispatch in finished {
            let (group, outcomes) = dispatch?;
            for ((slot, ordinal, signal), outcome) in group.into_iter().zip(outcomes) {
                match &outcome {
                    Ok(value) => signal.handle().complete(value.clone())?,
                    Err(err) => signal.handle().fail(err.clone())?,
                }
                per_task.entry(slot).or_default().push((ordinal, outcome));
            }
        }
        for (slot, mut items) in per_task {
            items.sort_by_key(|(ordinal, _)| *ordinal);
            self.tasks[slot].resume = items.into_iter().map(|(_, outcome)| outcome).collect();
        }

        // 5. Drop tasks whose bodies terminated
        self.tasks.retain(|active| active.task.has_next());
        Ok(())
    }
}
