//! WebSocket upgrade handshake and frame masking, per RFC6455.
//!
//! The crate covers the two protocol computations needed to set up and
//! secure a WebSocket connection: building and checking the HTTP upgrade
//! headers, and the XOR masking applied to client-to-server payloads.
//! Frame parsing and the rest of the frame layer are left to the caller.

use thiserror::Error;

mod handshake;
mod mask;
mod upgrade;

pub use handshake::{
    client_handshake_headers, compute_server_accept_nonce, extract_client_key,
    extract_server_accept, generate_key, server_handshake_headers, verify_server_accept,
    DEFAULT_VERSION, WEBSOCKET_GUID,
};
pub use mask::{generate_masking_key, Masker};
pub use upgrade::{
    accept, connect, read_header_block, ClientConfig, Upgraded, MAX_HEADERS, MAX_HEADER_BLOCK_LEN,
};

/// Represents errors that can occur while negotiating or masking.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A WebSocket protocol error occurred.
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),
    /// The handshake key is not valid base64 or has the wrong length.
    #[error("invalid handshake key: {0}")]
    InvalidKey(String),
    /// The masking key is not exactly 4 bytes.
    #[error("masking key must be 4 bytes, got {0}")]
    InvalidKeyLength(usize),
    /// A value could not be stored as an HTTP header.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

/// A Result type alias for handshake and masking operations.
pub type Result<T> = std::result::Result<T, Error>;
