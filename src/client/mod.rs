/// Async client for the Signals registry and online attribute API.
pub mod api;
pub mod settings;

use thiserror::Error;

pub use api::{OnlineAttributes, RegistryObject, SignalsClient};
pub use settings::ClientSettings;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("registry returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
