pub mod backoff;
pub mod controller;
pub mod error;
pub mod runtime;
pub mod transform;

pub use backoff::Backoff;
pub use controller::{Controller, ControllerCtx};
pub use error::{ReconcileError, RuntimeError};
pub use runtime::Runtime;
pub use transform::{encode_input_versions, input_versions_match, QController, Transform};
