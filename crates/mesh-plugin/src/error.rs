//! Plugin dispatch error taxonomy (§7: "Handler exception — logged,
//! swallowed; next message processed normally").

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("handler for type {type_id} panicked")]
    HandlerPanicked { type_id: u16 },

    #[error("handler for type {type_id} returned an error")]
    HandlerFailed {
        type_id: u16,
        #[source]
        source: BoxError,
    },
}
