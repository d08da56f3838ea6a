//! Handshake status lines and responses.

use super::headers::{header_names, HandshakeHeaders};
use crate::error::{GnutellaError, Result};

/// Protocol token that starts every 0.6 status line.
pub const GNUTELLA_06: &str = "GNUTELLA/0.6";

/// Status codes used during the handshake.
pub mod status {
    pub const OK: u16 = 200;
    pub const UNAUTHORIZED: u16 = 401;
    pub const SLOTS_FULL: u16 = 503;
}

/// Status code, reason and headers of one side of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    status_code: u16,
    status_message: String,
    headers: HandshakeHeaders,
}

impl HandshakeResponse {
    pub fn new(status_code: u16, status_message: &str, headers: HandshakeHeaders) -> Self {
        Self {
            status_code,
            status_message: status_message.to_string(),
            headers,
        }
    }

    /// `200 OK` with the given headers.
    pub fn ok(headers: HandshakeHeaders) -> Self {
        Self::new(status::OK, "OK", headers)
    }

    /// A rejection. `code` should not be 200.
    pub fn reject(code: u16, reason: &str) -> Self {
        Self::new(code, reason, HandshakeHeaders::new())
    }

    /// `503` with an optional list of other hosts to try.
    pub fn slots_full(try_hosts: Option<&str>) -> Self {
        let mut headers = HandshakeHeaders::new();
        if let Some(hosts) = try_hosts {
            headers.insert(header_names::X_TRY_ULTRAPEERS, hosts);
        }
        Self::new(status::SLOTS_FULL, "Service unavailable", headers)
    }

    /// Parse a status line such as `GNUTELLA/0.6 200 OK`.
    ///
    /// The reason phrase may be missing. A non-numeric code or a line that
    /// does not start with `GNUTELLA/0.6` is a bad handshake.
    pub fn parse_status_line(line: &str) -> Result<(u16, String)> {
        let rest = line.strip_prefix(GNUTELLA_06).ok_or_else(|| {
            GnutellaError::BadHandshake(format!("Unexpected status line: {:?}", line))
        })?;
        let rest = rest.trim_start();
        let (code, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason.trim()),
            None => (rest.trim(), ""),
        };
        let code = code.parse::<u16>().map_err(|_| {
            GnutellaError::BadHandshake(format!("Bad status code in line: {:?}", line))
        })?;
        Ok((code, reason.to_string()))
    }

    /// `GNUTELLA/0.6 <code> <reason>` without line terminator.
    pub fn status_line(&self) -> String {
        format!("{} {} {}", GNUTELLA_06, self.status_code, self.status_message)
    }

    /// Status line, headers and blank line as they go on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.headers.len() * 32);
        out.extend_from_slice(self.status_line().as_bytes());
        out.extend_from_slice(b"\r\n");
        self.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &HandshakeHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HandshakeHeaders {
        &mut self.headers
    }

    pub fn is_accepted(&self) -> bool {
        self.status_code == status::OK
    }

    /// Error for a response that did not accept.
    pub fn to_rejection(&self) -> GnutellaError {
        GnutellaError::NoGnutellaOk {
            code: self.status_code,
            reason: self.status_message.clone(),
        }
    }

    /// Whether the sender of these headers will deflate its stream.
    pub fn is_deflate_encoded(&self) -> bool {
        self.headers
            .lists_token(header_names::CONTENT_ENCODING, header_names::DEFLATE)
    }

    /// Whether the sender of these headers can inflate a deflated stream.
    pub fn accepts_deflate(&self) -> bool {
        self.headers
            .lists_token(header_names::ACCEPT_ENCODING, header_names::DEFLATE)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(header_names::USER_AGENT)
    }

    pub fn remote_ip(&self) -> Option<&str> {
        self.headers.get(header_names::REMOTE_IP)
    }

    pub fn is_ultrapeer(&self) -> bool {
        self.headers
            .get(header_names::X_ULTRAPEER)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn max_ttl(&self) -> Option<u8> {
        self.headers
            .get(header_names::X_MAX_TTL)
            .and_then(|v| v.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            HandshakeResponse::parse_status_line("GNUTELLA/0.6 200 OK").unwrap(),
            (200, "OK".to_string())
        );
        assert_eq!(
            HandshakeResponse::parse_status_line("GNUTELLA/0.6 503 Service unavailable").unwrap(),
            (503, "Service unavailable".to_string())
        );
        assert_eq!(
            HandshakeResponse::parse_status_line("GNUTELLA/0.6 401").unwrap(),
            (401, String::new())
        );
    }

    #[test]
    fn test_parse_status_line_errors() {
        assert!(HandshakeResponse::parse_status_line("HTTP/1.1 200 OK").is_err());
        assert!(HandshakeResponse::parse_status_line("GNUTELLA/0.6 abc OK").is_err());
        assert!(HandshakeResponse::parse_status_line("").is_err());
    }

    #[test]
    fn test_to_bytes() {
        let headers: HandshakeHeaders = [("User-Agent", "test/1")].into_iter().collect();
        let response = HandshakeResponse::ok(headers);
        assert_eq!(
            response.to_bytes(),
            b"GNUTELLA/0.6 200 OK\r\nUser-Agent: test/1\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_capability_helpers() {
        let headers: HandshakeHeaders = [
            ("Content-Encoding", "deflate"),
            ("Accept-Encoding", "deflate"),
            ("X-Ultrapeer", "True"),
            ("Remote-IP", "10.0.0.1"),
            ("X-Max-TTL", "4"),
        ]
        .into_iter()
        .collect();
        let response = HandshakeResponse::ok(headers);
        assert!(response.is_deflate_encoded());
        assert!(response.accepts_deflate());
        assert!(response.is_ultrapeer());
        assert_eq!(response.remote_ip(), Some("10.0.0.1"));
        assert_eq!(response.max_ttl(), Some(4));
        assert_eq!(response.user_agent(), None);
    }

    #[test]
    fn test_rejection_error() {
        let response = HandshakeResponse::reject(status::UNAUTHORIZED, "Unauthorized");
        assert!(!response.is_accepted());
        assert_eq!(response.to_rejection().rejection_code(), Some(401));
    }

    #[test]
    fn test_slots_full() {
        let response = HandshakeResponse::slots_full(Some("1.2.3.4:6346"));
        assert_eq!(response.status_code(), 503);
        assert_eq!(
            response.headers().get(header_names::X_TRY_ULTRAPEERS),
            Some("1.2.3.4:6346")
        );
    }
}
