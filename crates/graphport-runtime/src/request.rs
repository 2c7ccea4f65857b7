use std::time::Instant;

use graphport_core::RtTensor;
use tokio::sync::oneshot;

use crate::error::RunError;

#[derive(Debug)]
pub struct RunRequest {
    pub inputs: Vec<RtTensor<'static>>,
    pub enqueued_at: Instant,
    pub resp_tx: oneshot::Sender<Result<RunResponse, RunError>>,
}

#[derive(Debug)]
pub struct RunResponse {
    pub outputs: Vec<RtTensor<'static>>,
    pub timings: Timings,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    pub queued_us: u64,
    pub run_us: u64,
}
