use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internet reachability probe failed: {0}")]
    Probe(String),

    #[error("internet reachability probe timed out")]
    ProbeTimeout,

    #[error("no primary gateway is currently elected")]
    NoPrimary,

    #[error("message type {0} is not a gateway payload")]
    WrongType(u16),

    #[error("malformed gateway payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("malformed base64 gateway payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("no pending request for message id {0}")]
    UnknownMessageId(u64),
}
