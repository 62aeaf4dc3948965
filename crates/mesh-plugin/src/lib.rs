//! Typed package registry and dispatch for locally-addressed messages
//! (§4.6). Sits between Router (which already decided "this message is for
//! me") and user code.

mod error;
mod registry;

pub use error::{BoxError, PluginError};
pub use registry::{DispatchOutcome, PluginRegistry};
