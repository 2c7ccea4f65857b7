use std::time::{Duration, Instant};

use graphport_core::{EntryPoint, RtTensor};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::RunError;
use crate::request::{RunRequest, RunResponse, Timings};
use crate::session::Session;

#[derive(Debug)]
pub enum Command {
    Run(RunRequest),
    Close,
}

/// Owns one session and serves its calls one at a time.
pub struct SessionWorker<E: EntryPoint> {
    pub id: u32,
    pub inbox: mpsc::Receiver<Command>,
    pub session: Session<E>,
}

impl<E: EntryPoint> SessionWorker<E> {
    pub fn new(id: u32, session: Session<E>, capacity: usize) -> (Self, SessionHandle) {
        let (tx, inbox) = mpsc::channel(capacity.max(1));
        let worker = Self { id, inbox, session };
        (worker, SessionHandle { tx })
    }

    pub async fn run(mut self) {
        info!(worker_id = self.id, symbol = %self.session.metadata().entry_symbol, "worker started");
        while let Some(command) = self.inbox.recv().await {
            let req = match command {
                Command::Run(req) => req,
                Command::Close => break,
            };
            let queued_us = req.enqueued_at.elapsed().as_micros() as u64;
            let start = Instant::now();
            let result = self.session.run(&req.inputs).map(|outputs| RunResponse {
                outputs,
                timings: Timings {
                    queued_us,
                    run_us: start.elapsed().as_micros() as u64,
                },
            });
            if req.resp_tx.send(result).is_err() {
                warn!(worker_id = self.id, "caller went away before the result was ready");
            }
        }
        // Requests still queued are dropped with the receiver; their callers
        // observe `Closed`.
        self.inbox.close();
        self.session.close();
        info!(worker_id = self.id, "worker stopped");
    }
}

/// Spawn a worker for `session` on the current runtime.
pub fn spawn_session<E: EntryPoint>(
    id: u32,
    session: Session<E>,
    capacity: usize,
) -> (SessionHandle, JoinHandle<()>) {
    let (worker, handle) = SessionWorker::new(id, session, capacity);
    (handle, tokio::spawn(worker.run()))
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn run(&self, inputs: Vec<RtTensor<'static>>) -> Result<RunResponse, RunError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let req = RunRequest {
            inputs,
            enqueued_at: Instant::now(),
            resp_tx,
        };
        self.tx
            .send(Command::Run(req))
            .await
            .map_err(|_| RunError::Closed)?;
        resp_rx.await.map_err(|_| RunError::Closed)?
    }

    /// Like [`SessionHandle::run`], giving up after `deadline`. An abandoned
    /// call still runs to completion on the worker.
    pub async fn run_with_deadline(
        &self,
        inputs: Vec<RtTensor<'static>>,
        deadline: Duration,
    ) -> Result<RunResponse, RunError> {
        tokio::time::timeout(deadline, self.run(inputs))
            .await
            .map_err(|_| RunError::DeadlineExceeded(deadline))?
    }

    /// Ask the worker to stop once the calls queued ahead of this one are
    /// served. Every handle observes `Closed` afterwards.
    pub async fn close(&self) {
        // Already stopped is fine.
        let _ = self.tx.send(Command::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
