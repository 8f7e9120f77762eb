//! Resumable task bodies and the step protocol
//!
//! Caller logic is written in ordinary sequential style ("compute X, ask
//! the store, use the answer, ask again"), yet the scheduler needs to step
//! it externally so that signals from many bodies can be batched together.
//! [`SignalTask::spawn`] bridges the two: the body runs on its own tokio
//! task and synchronizes with the driving call through two capacity-1
//! rendezvous channels, one handing resume values in and one surfacing
//! newly issued signals out.
//!
//! The driver sees exactly the protocol the round loop needs:
//! [`SignalTask::has_next`] is true while the body has code left, and
//! [`SignalTask::next`] feeds back the results for the signals returned by
//! the previous call (empty on the very first call) and runs the body
//! forward until it either emits new signals or terminates.

use crate::handle::Handle;
use crate::signal::{Signal, SignalResult};
use bson::Bson;
use convoy_common::{ConvoyError, Result};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The body-side half of the rendezvous protocol.
///
/// A scope is handed to the task body on spawn and consumed by it; every
/// suspension point of the body goes through [`TaskScope::dispatch`].
pub struct TaskScope {
    requests_tx: mpsc::Sender<Vec<Signal>>,
    resume_rx: mpsc::Receiver<Vec<SignalResult>>,
}

impl TaskScope {
    /// Emit a batch of signals and park until all of them are resolved.
    ///
    /// The returned vector holds one outcome per signal, in emission
    /// order. Results arrive all-or-nothing: the body is never resumed
    /// while any signal of the batch is still pending.
    pub async fn dispatch(&mut self, signals: Vec<Signal>) -> Result<Vec<SignalResult>> {
        self.requests_tx.send(signals).await.map_err(|_| {
            ConvoyError::Task("scheduler dropped while task was emitting".to_string())
        })?;
        self.resume_rx
            .recv()
            .await
            .ok_or_else(|| ConvoyError::Task("scheduler dropped before resuming task".to_string()))
    }

    /// Emit a single signal and park until it is resolved
    pub async fn emit(&mut self, signal: Signal) -> Result<SignalResult> {
        let mut results = self.dispatch(vec![signal]).await?;
        if results.len() != 1 {
            return Err(ConvoyError::Task(format!(
                "expected 1 resume value, got {}",
                results.len()
            )));
        }
        Ok(results.remove(0))
    }
}

/// Driver-side view of one resumable body.
///
/// Created by [`SignalTask::spawn`]; stepped by the scheduler once per
/// round; garbage once [`SignalTask::has_next`] reports false. The body's
/// final value (or error) resolves the task's output handle.
pub struct SignalTask {
    requests_rx: mpsc::Receiver<Vec<Signal>>,
    resume_tx: mpsc::Sender<Vec<SignalResult>>,
    output: Handle<Bson>,
    join: Option<JoinHandle<()>>,
    awaiting: usize,
    started: bool,
    finished: bool,
}

impl SignalTask {
    /// Spawn a body as a cooperative background routine.
    ///
    /// The body receives a [`TaskScope`] and runs until its first
    /// suspension point; nothing is dispatched until the driver calls
    /// [`SignalTask::next`].
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(TaskScope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bson>> + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        let output: Handle<Bson> = Handle::new();

        let scope = TaskScope {
            requests_tx,
            resume_rx,
        };
        let result_handle = output.clone();
        let join = tokio::spawn(async move {
            match body(scope).await {
                Ok(value) => {
                    let _ = result_handle.complete(value);
                }
                Err(err) => {
                    let _ = result_handle.fail(err);
                }
            }
        });

        Self {
            requests_rx,
            resume_tx,
            output,
            join: Some(join),
            awaiting: 0,
            started: false,
            finished: false,
        }
    }

    /// True while the body has not reached its end
    pub fn has_next(&self) -> bool {
        !self.finished
    }

    /// Handle resolved with the body's final value
    pub fn output(&self) -> Handle<Bson> {
        self.output.clone()
    }

    /// Number of signals emitted in the last step and not yet fed back
    pub fn awaiting(&self) -> usize {
        self.awaiting
    }

    /// Feed back the previous step's results and run the body forward.
    ///
    /// Returns the signals emitted by the new step, or an empty vector
    /// once the body terminates (after which [`SignalTask::has_next`]
    /// reports false). Faults if the body already finished or if the
    /// resume vector does not cover the previous step exactly.
    pub async fn next(&mut self, resume: Vec<SignalResult>) -> Result<Vec<Signal>> {
        if self.finished {
            return Err(ConvoyError::Task("no more code to run".to_string()));
        }
        if resume.len() != self.awaiting {
            return Err(ConvoyError::Task(format!(
                "expected {} resume values, got {}",
                self.awaiting,
                resume.len()
            )));
        }

        if self.started && self.resume_tx.send(resume).await.is_err() {
            // Body ended between steps without parking again
            self.finish().await;
            return Ok(Vec::new());
        }
        self.started = true;

        match self.requests_rx.recv().await {
            Some(signals) => {
                self.awaiting = signals.len();
                Ok(signals)
            }
            None => {
                self.finish().await;
                Ok(Vec::new())
            }
        }
    }

    /// Join the worker so the output handle is resolved before the task
    /// reports completion.
    async fn finish(&mut self) {
        self.finished = true;
        self.awaiting = 0;
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}
