//! Loading compiled artifacts and executing their entry points.

pub mod backend;
pub mod category;
pub mod cleanup;
pub mod error;
pub mod kernels;
pub mod pool;
pub mod request;
pub mod session;
pub mod value;
pub mod worker;

pub use backend::{KernelBackend, KernelEntry, STATUS_KERNEL_FAULT, STATUS_MARSHAL_FAULT};
pub use cleanup::ArtifactRemover;
pub use error::{LoadError, RunError};
pub use pool::SessionPool;
pub use request::{RunRequest, RunResponse, Timings};
pub use session::Session;
pub use value::{Buffer, Value};
pub use worker::{spawn_session, Command, SessionHandle, SessionWorker};
