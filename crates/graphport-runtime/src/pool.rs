use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use graphport_core::RtTensor;
use tracing::info;

use crate::error::{LoadError, RunError};
use crate::request::RunResponse;
use crate::session::Session;
use crate::worker::{spawn_session, SessionHandle};

/// Independent sessions over one artifact, each behind its own worker,
/// served round robin.
pub struct SessionPool {
    handles: Vec<SessionHandle>,
    rr: AtomicUsize,
}

impl SessionPool {
    /// Open `size` sessions on `path`. Must be called inside a tokio runtime.
    pub fn open(
        path: impl AsRef<Path>,
        entry_symbol: &str,
        size: usize,
        queue_capacity: usize,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let mut sessions = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            sessions.push(Session::open(path, entry_symbol)?);
        }
        info!(path = %path.display(), workers = sessions.len(), "session pool ready");
        Ok(Self::from_sessions(sessions, queue_capacity))
    }

    pub fn from_sessions<E: graphport_core::EntryPoint>(
        sessions: Vec<Session<E>>,
        queue_capacity: usize,
    ) -> Self {
        let handles = sessions
            .into_iter()
            .enumerate()
            .map(|(id, session)| spawn_session(id as u32, session, queue_capacity).0)
            .collect();
        Self {
            handles,
            rr: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn next(&self) -> Result<&SessionHandle, RunError> {
        if self.handles.is_empty() {
            return Err(RunError::Closed);
        }
        let idx = self.rr.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        Ok(&self.handles[idx])
    }

    pub async fn run(&self, inputs: Vec<RtTensor<'static>>) -> Result<RunResponse, RunError> {
        self.next()?.run(inputs).await
    }

    pub async fn run_with_deadline(
        &self,
        inputs: Vec<RtTensor<'static>>,
        deadline: Duration,
    ) -> Result<RunResponse, RunError> {
        self.next()?.run_with_deadline(inputs, deadline).await
    }

    pub async fn close(&self) {
        for handle in &self.handles {
            handle.close().await;
        }
    }
}
