//! WebSocket handshake header negotiation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderMap, HeaderValue};
use sha1::{Digest, Sha1};

use crate::{Error, Result};

/// The GUID every server appends to the client key to prove it speaks RFC6455.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The protocol version sent by default in `Sec-WebSocket-Version`.
pub const DEFAULT_VERSION: &str = "13";

const KEY_LEN: usize = 16;

/// Generates a random key for the WebSocket handshake.
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut random_bytes = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    STANDARD.encode(random_bytes)
}

/// Builds the headers of a client upgrade request.
///
/// When `key` is `None` or empty a fresh one is generated; it can be read
/// back from `sec-websocket-key` in the returned map.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if a supplied key is not the base64
/// encoding of 16 bytes, and [`Error::InvalidHeader`] if `version` cannot be
/// used as a header value.
pub fn client_handshake_headers(key: Option<&str>, version: &str) -> Result<HeaderMap> {
    let key = match key.filter(|key| !key.is_empty()) {
        Some(key) => {
            let decoded = decode_key(key)?;
            if decoded.len() != KEY_LEN {
                return Err(Error::InvalidKey(format!(
                    "expected {} bytes, decoded {}",
                    KEY_LEN,
                    decoded.len()
                )));
            }
            key.to_owned()
        }
        None => generate_key(),
    };

    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::try_from(key)?);
    headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_str(version)?);
    tracing::debug!(?headers, "built client handshake headers");
    Ok(headers)
}

/// Builds the headers of a server's `101 Switching Protocols` response.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if `key` is not valid base64.
pub fn server_handshake_headers(key: &str) -> Result<HeaderMap> {
    let nonce = compute_server_accept_nonce(key)?;

    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, HeaderValue::try_from(nonce)?);
    tracing::debug!(?headers, "built server handshake headers");
    Ok(headers)
}

/// Returns the client's `sec-websocket-key` if the request asks for a
/// websocket upgrade, `None` otherwise.
///
/// A key that is not visible ASCII is treated as missing.
pub fn extract_client_key(headers: &HeaderMap) -> Option<&str> {
    if !is_websocket_upgrade(headers) {
        return None;
    }
    headers.get(SEC_WEBSOCKET_KEY)?.to_str().ok()
}

/// Returns the server's `sec-websocket-accept` if the response confirms a
/// websocket upgrade, `None` otherwise.
pub fn extract_server_accept(headers: &HeaderMap) -> Option<&str> {
    if !is_websocket_upgrade(headers) {
        return None;
    }
    headers.get(SEC_WEBSOCKET_ACCEPT)?.to_str().ok()
}

/// Computes the accept value a server must answer `key` with.
///
/// This is `base64(sha1(key ++ GUID))` over the raw 20-byte digest.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if `key` is not valid base64.
pub fn compute_server_accept_nonce(key: &str) -> Result<String> {
    decode_key(key)?;
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Checks a server response against the key the client sent.
///
/// Returns `false` when the response is not an upgrade or carries the wrong
/// accept value.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if `key` is not valid base64.
pub fn verify_server_accept(key: &str, headers: &HeaderMap) -> Result<bool> {
    let expected = compute_server_accept_nonce(key)?;
    let valid = extract_server_accept(headers) == Some(expected.as_str());
    tracing::debug!(valid, "verified server accept value");
    Ok(valid)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(key)
        .map_err(|err| Error::InvalidKey(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderName;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    #[test]
    fn accept_nonce_matches_rfc_example() {
        assert_eq!(compute_server_accept_nonce(SAMPLE_KEY).unwrap(), SAMPLE_ACCEPT);
    }

    #[test]
    fn accept_nonce_is_deterministic() {
        let key = generate_key();
        let first = compute_server_accept_nonce(&key).unwrap();
        let second = compute_server_accept_nonce(&key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn accept_nonce_rejects_invalid_base64() {
        assert!(matches!(
            compute_server_accept_nonce("!!not base64!!"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn generated_key_decodes_to_sixteen_bytes() {
        for _ in 0..32 {
            let headers = client_handshake_headers(None, DEFAULT_VERSION).unwrap();
            let key = headers.get(SEC_WEBSOCKET_KEY).unwrap().to_str().unwrap();
            assert_eq!(STANDARD.decode(key).unwrap().len(), 16);
        }
    }

    #[test]
    fn client_headers_carry_upgrade_fields() {
        let headers = client_handshake_headers(Some(SAMPLE_KEY), "8").unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[CONNECTION], "Upgrade");
        assert_eq!(headers[UPGRADE], "websocket");
        assert_eq!(headers[SEC_WEBSOCKET_KEY], SAMPLE_KEY);
        assert_eq!(headers[SEC_WEBSOCKET_VERSION], "8");
    }

    #[test]
    fn empty_client_key_is_generated() {
        let headers = client_handshake_headers(Some(""), DEFAULT_VERSION).unwrap();
        let key = headers[SEC_WEBSOCKET_KEY].to_str().unwrap();
        assert_eq!(STANDARD.decode(key).unwrap().len(), 16);
    }

    #[test]
    fn client_headers_default_version() {
        let headers = client_handshake_headers(None, DEFAULT_VERSION).unwrap();
        assert_eq!(headers[SEC_WEBSOCKET_VERSION], "13");
    }

    #[test]
    fn client_headers_reject_bad_supplied_key() {
        assert!(matches!(
            client_handshake_headers(Some("not base64?"), DEFAULT_VERSION),
            Err(Error::InvalidKey(_))
        ));
        let short = STANDARD.encode(b"too short");
        assert!(matches!(
            client_handshake_headers(Some(&short), DEFAULT_VERSION),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn client_headers_reject_bad_version() {
        assert!(matches!(
            client_handshake_headers(None, "13\r\n"),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn server_headers_carry_accept_value() {
        let headers = server_handshake_headers(SAMPLE_KEY).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[CONNECTION], "Upgrade");
        assert_eq!(headers[UPGRADE], "websocket");
        assert_eq!(headers[SEC_WEBSOCKET_ACCEPT], SAMPLE_ACCEPT);
    }

    #[test]
    fn server_headers_reject_invalid_key() {
        assert!(matches!(
            server_handshake_headers("%%%"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn extract_client_key_requires_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static(SAMPLE_KEY));
        assert_eq!(extract_client_key(&headers), None);

        headers.insert(UPGRADE, HeaderValue::from_static("h2"));
        assert_eq!(extract_client_key(&headers), None);

        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert_eq!(extract_client_key(&headers), Some(SAMPLE_KEY));
    }

    #[test]
    fn extract_client_key_ignores_name_case() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"UPGRADE").unwrap(),
            HeaderValue::from_static("websocket"),
        );
        headers.insert(
            HeaderName::from_bytes(b"Sec-WebSocket-Key").unwrap(),
            HeaderValue::from_static(SAMPLE_KEY),
        );
        assert_eq!(extract_client_key(&headers), Some(SAMPLE_KEY));
    }

    #[test]
    fn extract_client_key_missing_key_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        assert_eq!(extract_client_key(&headers), None);
    }

    #[test]
    fn extract_server_accept_requires_websocket_upgrade() {
        let mut headers = server_handshake_headers(SAMPLE_KEY).unwrap();
        assert_eq!(extract_server_accept(&headers), Some(SAMPLE_ACCEPT));

        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
        assert_eq!(extract_server_accept(&headers), None);

        headers.remove(UPGRADE);
        assert_eq!(extract_server_accept(&headers), None);
    }

    #[test]
    fn client_verifies_server_nonce() {
        let request = client_handshake_headers(None, DEFAULT_VERSION).unwrap();
        let key = extract_client_key(&request).unwrap().to_owned();

        let response = server_handshake_headers(&key).unwrap();
        assert_eq!(
            extract_server_accept(&response).unwrap(),
            compute_server_accept_nonce(&key).unwrap()
        );
        assert!(verify_server_accept(&key, &response).unwrap());

        let other = server_handshake_headers(&generate_key()).unwrap();
        assert!(!verify_server_accept(&key, &other).unwrap());
    }
}
