//! Infrastructure shared by the workspace crates: callbacks, cancellation and
//! logging setup.

pub mod cancel_token;
pub mod log_setup;
pub mod shared_fn;

pub use cancel_token::CancelToken;
pub use log_setup::{LogConfig, setup_logging};
pub use shared_fn::SharedFn;
