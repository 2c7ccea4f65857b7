pub mod artifact;
pub mod backend;
pub mod dtype;
pub mod error;
pub mod program;
pub mod spec;
pub mod tensor;

pub use artifact::*;
pub use backend::*;
pub use dtype::*;
pub use error::{Error, Result};
pub use program::*;
pub use spec::*;
pub use tensor::*;
