use thiserror::Error;

/// Errors surfaced by the mesh engine.
///
/// `Bind` is fatal at startup; `Transport` and `Protocol` are always
/// scoped to a single connection and never tear down the process.
#[derive(Error, Debug)]
pub enum CollectiveError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),
}
