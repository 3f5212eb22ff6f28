//! WebSocket upgrade handling.
//!
//! Performs the HTTP upgrade handshake on the accept path (blocking, bounded
//! by a socket read timeout), validates the request path, extracts bearer
//! credentials, and rewraps the established socket for the mio event loop.

use std::io::{self, Write};
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

use mio::net::TcpStream;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::protocol::{Role, WebSocketConfig};
use tungstenite::{HandshakeError, WebSocket};

use crate::auth::{AuthProvider, HandshakeContext, Principal};
use crate::config::LimitsConfig;

/// Gateway WebSocket subprotocol identifier.
const GATEWAY_SUBPROTOCOL: &str = "wsgate";

/// Error during WebSocket upgrade.
#[derive(Debug)]
pub enum WsAcceptError {
    /// Handshake I/O error (includes the handshake timeout expiring).
    Io(io::Error),
    /// Handshake protocol error or rejection.
    Handshake(String),
    /// Credentials were presented and denied.
    Unauthorized,
}

impl std::fmt::Display for WsAcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsAcceptError::Io(e) => write!(f, "I/O error: {}", e),
            WsAcceptError::Handshake(msg) => write!(f, "handshake error: {}", msg),
            WsAcceptError::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

impl std::error::Error for WsAcceptError {}

impl From<io::Error> for WsAcceptError {
    fn from(e: io::Error) -> Self {
        WsAcceptError::Io(e)
    }
}

/// Extract a bearer token from the upgrade request.
///
/// Checks the `Authorization: Bearer ...` header first, then a `token`
/// query parameter.
fn extract_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get("Authorization") {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Accept a WebSocket upgrade with path validation and authentication.
///
/// The stream must be in blocking mode; the handshake window is bounded by
/// the socket read/write timeouts set here. Returns the established
/// WebSocket and the principal resolved from the presented credentials.
pub fn accept_websocket(
    stream: StdTcpStream,
    expected_path: &str,
    auth: &AuthProvider,
    handshake_timeout: Duration,
) -> Result<(WebSocket<StdTcpStream>, Option<Principal>), WsAcceptError> {
    stream.set_read_timeout(Some(handshake_timeout))?;
    stream.set_write_timeout(Some(handshake_timeout))?;
    let remote_addr = stream.peer_addr()?;

    let expected_path = expected_path.to_string();
    let mut principal: Option<Principal> = None;
    let mut denied = false;

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        // Validate path if configured
        if !expected_path.is_empty() {
            let request_path = request.uri().path();
            if request_path != expected_path {
                log::debug!(
                    "WebSocket path mismatch: expected '{}', got '{}'",
                    expected_path,
                    request_path
                );
                let mut err_response = ErrorResponse::new(Some("Invalid path".to_string()));
                *err_response.status_mut() = tungstenite::http::StatusCode::NOT_FOUND;
                return Err(err_response);
            }
        }

        // Authenticate before completing the upgrade
        let token = extract_token(request);
        let ctx = HandshakeContext {
            token: token.as_deref(),
            remote_addr,
        };
        let (result, resolved) = auth.authenticate(&ctx);
        if !result.is_allowed() {
            denied = true;
            let mut err_response = ErrorResponse::new(Some("Unauthorized".to_string()));
            *err_response.status_mut() = tungstenite::http::StatusCode::UNAUTHORIZED;
            return Err(err_response);
        }
        principal = resolved;

        // Echo the gateway subprotocol when the client offered it
        let offered = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .map(|protocols: &str| {
                protocols
                    .split(',')
                    .any(|p: &str| p.trim().eq_ignore_ascii_case(GATEWAY_SUBPROTOCOL))
            })
            .unwrap_or(false);

        if offered {
            response.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(GATEWAY_SUBPROTOCOL),
            );
        }

        Ok(response)
    };

    match tungstenite::accept_hdr(stream, callback) {
        Ok(ws) => Ok((ws, principal)),
        Err(HandshakeError::Interrupted(_)) => {
            Err(WsAcceptError::Handshake("handshake interrupted".into()))
        }
        Err(HandshakeError::Failure(e)) => {
            if denied {
                Err(WsAcceptError::Unauthorized)
            } else {
                Err(WsAcceptError::Handshake(e.to_string()))
            }
        }
    }
}

/// Wrap an established WebSocket for the mio event loop.
///
/// Converts the std TcpStream to a mio TcpStream using fd duplication. The
/// original WebSocket is dropped (closing its fd), but the duplicated fd
/// remains valid for the new WebSocket.
pub fn wrap_websocket(
    mut ws: WebSocket<StdTcpStream>,
    limits: &LimitsConfig,
) -> io::Result<WebSocket<TcpStream>> {
    use std::os::unix::io::{AsRawFd, FromRawFd};

    // Ensure handshake response is fully flushed before converting
    ws.flush().map_err(io::Error::other)?;

    let fd = ws.get_ref().as_raw_fd();

    // Duplicate the fd - this creates a new fd pointing to the same socket
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd == -1 {
        return Err(io::Error::last_os_error());
    }

    let new_std_stream = unsafe { StdTcpStream::from_raw_fd(new_fd) };
    new_std_stream.set_nonblocking(true)?;
    let mio_stream = TcpStream::from_std(new_std_stream);

    // Drop the original WebSocket (closes the original fd; the dup'd fd stays valid)
    drop(ws);

    let config = WebSocketConfig::default()
        .max_message_size(Some(limits.max_frame_size))
        .max_frame_size(Some(limits.max_frame_size))
        .max_write_buffer_size(limits.write_buffer_size);

    Ok(WebSocket::from_raw_socket(
        mio_stream,
        Role::Server,
        Some(config),
    ))
}

/// Refuse an upgrade because the connection limit is reached.
pub fn reject_unavailable(mut stream: StdTcpStream) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    let _ = stream.write_all(
        b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungstenite::http::Request as HttpRequest;

    fn request(uri: &str, auth_header: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(value) = auth_header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_extract_token_from_header() {
        let req = request("/ws", Some("Bearer abc123"));
        assert_eq!(extract_token(&req), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_from_query() {
        let req = request("/ws?token=qtok&x=1", None);
        assert_eq!(extract_token(&req), Some("qtok".to_string()));
    }

    #[test]
    fn test_header_wins_over_query() {
        let req = request("/ws?token=qtok", Some("Bearer htok"));
        assert_eq!(extract_token(&req), Some("htok".to_string()));
    }

    #[test]
    fn test_no_token() {
        let req = request("/ws", None);
        assert_eq!(extract_token(&req), None);
        let req = request("/ws?other=1", Some("Basic abc"));
        assert_eq!(extract_token(&req), None);
    }

    #[test]
    fn test_empty_token_ignored() {
        let req = request("/ws?token=", None);
        assert_eq!(extract_token(&req), None);
    }
}
