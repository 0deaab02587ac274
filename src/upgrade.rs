//! Connection-setup routines that run the handshake over a stream.
//!
//! Only the HTTP needed for an upgrade is spoken here: a request line or a
//! status line followed by a header block.

use http::{HeaderMap, HeaderName, HeaderValue};
use smol::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use smol::prelude::*;

use crate::handshake::{
    client_handshake_headers, extract_client_key, generate_key, server_handshake_headers,
    verify_server_accept, DEFAULT_VERSION,
};
use crate::{Error, Result};

/// Most header lines accepted in one header block.
pub const MAX_HEADERS: usize = 32;
/// Most bytes accepted for the start line plus the header block.
pub const MAX_HEADER_BLOCK_LEN: usize = 8 * 1024;

/// Options for the client side of the upgrade request.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Value of the `Host` header.
    pub host: String,
    /// Request target of the `GET` line.
    pub path: String,
    /// Value of `Sec-WebSocket-Version`.
    pub version: String,
    /// A fixed handshake key; a random one is generated when `None`.
    pub key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "localhost".into(),
            path: "/".into(),
            version: DEFAULT_VERSION.into(),
            key: None,
        }
    }
}

impl ClientConfig {
    /// Sets the `Host` header.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the request path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the protocol version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Uses `key` instead of a generated handshake key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A stream whose upgrade handshake has completed.
#[derive(Debug)]
pub struct Upgraded<S> {
    /// The stream, still buffering any bytes read past the handshake.
    pub stream: BufReader<S>,
    /// The `sec-websocket-key` exchanged during the handshake.
    pub key: String,
    /// The headers received from the peer.
    pub headers: HeaderMap,
}

/// Performs the client side of the upgrade handshake.
///
/// # Errors
///
/// Returns an error if the stream fails, the configured key or version is
/// invalid, or the server does not answer with a matching `101` response.
pub async fn connect<S>(stream: S, config: &ClientConfig) -> Result<Upgraded<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = match config.key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => key.to_owned(),
        None => generate_key(),
    };
    let headers = client_handshake_headers(Some(&key), &config.version)?;

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\n",
        config.path, config.host
    )
    .into_bytes();
    write_header_block(&mut request, &headers);

    let mut reader = BufReader::new(stream);
    reader.get_mut().write_all(&request).await?;
    reader.get_mut().flush().await?;

    let (status_line, headers) = read_header_block(&mut reader).await?;
    if status_line.split_whitespace().nth(1) != Some("101") {
        tracing::warn!(%status_line, "server refused websocket upgrade");
        return Err(Error::Protocol(format!(
            "Unexpected handshake response: {}",
            status_line
        )));
    }
    if !verify_server_accept(&key, &headers)? {
        tracing::warn!("server sent a mismatched accept value");
        return Err(Error::Protocol("Invalid Sec-WebSocket-Accept value".into()));
    }

    tracing::debug!(path = %config.path, "websocket client upgrade complete");
    Ok(Upgraded {
        stream: reader,
        key,
        headers,
    })
}

/// Performs the server side of the upgrade handshake.
///
/// A request that is malformed, is not a websocket upgrade, or carries a key
/// that is not base64, is answered with `400 Bad Request` before the error
/// is returned.
///
/// # Errors
///
/// Returns an error if the stream fails or the request is rejected.
pub async fn accept<S>(stream: S) -> Result<Upgraded<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let (request_line, headers) = match read_header_block(&mut reader).await {
        Ok(request) => request,
        Err(err @ Error::Protocol(_)) => return Err(reject(reader.get_mut(), "", err).await),
        Err(err) => return Err(err),
    };

    let response = match extract_client_key(&headers) {
        Some(key) => server_handshake_headers(key).map(|response| (key.to_owned(), response)),
        None => Err(Error::Protocol("Not a websocket upgrade request".into())),
    };
    let (key, response) = match response {
        Ok(accepted) => accepted,
        Err(err) => return Err(reject(reader.get_mut(), &request_line, err).await),
    };

    let mut out = b"HTTP/1.1 101 Switching Protocols\r\n".to_vec();
    write_header_block(&mut out, &response);
    reader.get_mut().write_all(&out).await?;
    reader.get_mut().flush().await?;

    tracing::debug!(%request_line, "websocket server upgrade complete");
    Ok(Upgraded {
        stream: reader,
        key,
        headers,
    })
}

/// Answers a rejected request with `400 Bad Request` and hands back `err`.
async fn reject<W>(writer: &mut W, request_line: &str, err: Error) -> Error
where
    W: AsyncWrite + Unpin,
{
    tracing::warn!(%request_line, error = %err, "rejecting upgrade request");
    let written = writer
        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
        .await;
    let written = match written {
        Ok(()) => writer.flush().await,
        Err(write_err) => Err(write_err),
    };
    if let Err(write_err) = written {
        tracing::debug!(error = %write_err, "could not send 400 response");
    }
    err
}

/// Reads a start line and the header block that follows it.
///
/// Lines without a colon are skipped. Repeated names are kept in order. At
/// most [`MAX_HEADERS`] headers and [`MAX_HEADER_BLOCK_LEN`] bytes are read.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the stream ends before the blank line, a
/// limit is exceeded, or a line is not UTF-8 or not a valid header.
pub async fn read_header_block<R>(reader: &mut R) -> Result<(String, HeaderMap)>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEADER_BLOCK_LEN;
    let start_line = read_limited_line(reader, &mut budget)
        .await?
        .ok_or_else(|| Error::Protocol("Connection closed before handshake".into()))?;

    let mut headers = HeaderMap::new();
    let mut count = 0;
    loop {
        let line = read_limited_line(reader, &mut budget)
            .await?
            .ok_or_else(|| Error::Protocol("Connection closed inside header block".into()))?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            count += 1;
            if count > MAX_HEADERS {
                return Err(Error::Protocol(format!("More than {} headers", MAX_HEADERS)));
            }
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|err| Error::Protocol(format!("Invalid header name: {}", err)))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|err| Error::Protocol(format!("Invalid header value: {}", err)))?;
            headers
                .try_append(name, value)
                .map_err(|err| Error::Protocol(format!("Header map full: {}", err)))?;
        }
    }

    Ok((start_line.trim_end().to_owned(), headers))
}

/// Reads one `\n`-terminated line, spending at most `budget` bytes on it.
///
/// Returns `None` at end of stream.
async fn read_limited_line<R>(reader: &mut R, budget: &mut usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        if *budget == 0 {
            return Err(header_block_too_large());
        }
        return Ok(None);
    }
    *budget -= read;
    if !buf.ends_with(b"\n") {
        if *budget == 0 {
            return Err(header_block_too_large());
        }
        return Ok(None);
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| Error::Protocol("Header block is not valid UTF-8".into()))
}

fn header_block_too_large() -> Error {
    Error::Protocol(format!("Header block exceeds {} bytes", MAX_HEADER_BLOCK_LEN))
}

fn write_header_block(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}
