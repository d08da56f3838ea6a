//! Handshake state machine.
//!
//! [`Handshaker`] does no I/O. Bytes from the peer go in through
//! [`Handshaker::feed`], bytes for the peer come out of
//! [`Handshaker::take_output`]. [`perform_handshake`] drives it over a tokio
//! transport.
//!
//! ```text
//! outgoing:  CONNECT ─► read status+headers ─► write final status+headers
//! incoming:  read CONNECT+headers ─► write status+headers ─► read final status+headers
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::headers::{header_names, HandshakeHeaders};
use super::response::{status, HandshakeResponse};
use super::version::{
    classify_connect_line, ConnectVersion, CONNECT_04, CONNECT_LINE_06, GNUTELLA_CONNECT_PREFIX,
    LEGACY_OK,
};
use crate::config::{ConnectionConfig, DEFAULT_MAX_HEADERS, DEFAULT_MAX_LINE_LENGTH};
use crate::error::{GnutellaError, Result};

/// Read chunk used by the async driver.
const HANDSHAKE_READ_CHUNK: usize = 1024;

/// Decides our side of the handshake.
pub trait HandshakeResponder {
    /// Produce our response to `peer`.
    ///
    /// `outgoing` is true when we initiated the connection, in which case
    /// `peer` is the peer's response to our connect request. Otherwise it
    /// holds the peer's connect request headers.
    fn respond(&mut self, peer: &HandshakeResponse, outgoing: bool) -> HandshakeResponse;
}

impl<F> HandshakeResponder for F
where
    F: FnMut(&HandshakeResponse, bool) -> HandshakeResponse,
{
    fn respond(&mut self, peer: &HandshakeResponse, outgoing: bool) -> HandshakeResponse {
        self(peer, outgoing)
    }
}

/// Accepts every peer with a fixed header set.
///
/// Agrees to deflate when enabled and the peer accepts it.
#[derive(Debug, Clone, Default)]
pub struct DefaultResponder {
    headers: HandshakeHeaders,
    offer_deflate: bool,
}

impl DefaultResponder {
    pub fn new(headers: HandshakeHeaders, offer_deflate: bool) -> Self {
        Self {
            headers,
            offer_deflate,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.headers.clone(), config.enable_deflate)
    }

    /// Headers for our connect request on an outgoing connection.
    pub fn request_headers(&self) -> HandshakeHeaders {
        let mut headers = self.headers.clone();
        if self.offer_deflate {
            headers.insert(header_names::ACCEPT_ENCODING, header_names::DEFLATE);
        }
        headers
    }
}

impl HandshakeResponder for DefaultResponder {
    fn respond(&mut self, peer: &HandshakeResponse, outgoing: bool) -> HandshakeResponse {
        // Outgoing: our headers already went out with the request.
        let mut headers = if outgoing {
            HandshakeHeaders::new()
        } else {
            self.request_headers()
        };
        if self.offer_deflate && peer.accepts_deflate() {
            headers.insert(header_names::CONTENT_ENCODING, header_names::DEFLATE);
        }
        HandshakeResponse::ok(headers)
    }
}

/// Limits and switches for one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOptions {
    pub max_headers: usize,
    pub max_line_length: usize,
    pub allow_legacy: bool,
}

impl HandshakeOptions {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_headers: config.max_headers,
            max_line_length: config.max_line_length,
            allow_legacy: config.allow_legacy,
        }
    }
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            max_headers: DEFAULT_MAX_HEADERS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            allow_legacy: false,
        }
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitStatus,
    AwaitResponseHeaders,
    AwaitConnectLine,
    AwaitLegacyBlank,
    AwaitRequestHeaders,
    AwaitFinalStatus,
    AwaitFinalHeaders,
    Complete,
    Failed,
}

/// Result of a completed handshake.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub role: Role,
    pub version: ConnectVersion,
    /// Every header the peer sent, later blocks overriding earlier ones.
    pub headers_read: HandshakeHeaders,
    /// Every header we sent, later blocks overriding earlier ones.
    pub headers_written: HandshakeHeaders,
    /// Bytes received after the final blank line.
    pub remaining: Bytes,
}

impl HandshakeOutcome {
    /// Whether we agreed to deflate what we write.
    pub fn writes_deflated(&self) -> bool {
        self.headers_written
            .lists_token(header_names::CONTENT_ENCODING, header_names::DEFLATE)
    }

    /// Whether the peer deflates what it writes.
    pub fn reads_deflated(&self) -> bool {
        self.headers_read
            .lists_token(header_names::CONTENT_ENCODING, header_names::DEFLATE)
    }
}

/// Sans-I/O handshake for one connection.
pub struct Handshaker<R: HandshakeResponder> {
    role: Role,
    phase: Phase,
    version: ConnectVersion,
    options: HandshakeOptions,
    responder: R,
    input: BytesMut,
    output: BytesMut,
    headers_read: HandshakeHeaders,
    headers_written: HandshakeHeaders,
    block_headers: usize,
    pending_status: (u16, String),
}

impl<R: HandshakeResponder> Handshaker<R> {
    /// Start an outgoing handshake. The connect request is queued at once.
    pub fn outgoing(request_headers: HandshakeHeaders, responder: R, options: HandshakeOptions) -> Self {
        let mut handshaker = Self::with_phase(Role::Outgoing, Phase::AwaitStatus, responder, options);
        handshaker.output.extend_from_slice(CONNECT_LINE_06.as_bytes());
        handshaker.output.extend_from_slice(b"\r\n");
        let mut block = Vec::new();
        request_headers.write_to(&mut block);
        block.extend_from_slice(b"\r\n");
        handshaker.output.extend_from_slice(&block);
        handshaker.headers_written = request_headers;
        handshaker
    }

    /// Start an incoming handshake. Expects the connect line, with or
    /// without the leading `GNUTELLA `.
    pub fn incoming(responder: R, options: HandshakeOptions) -> Self {
        Self::with_phase(Role::Incoming, Phase::AwaitConnectLine, responder, options)
    }

    fn with_phase(role: Role, phase: Phase, responder: R, options: HandshakeOptions) -> Self {
        Self {
            role,
            phase,
            version: ConnectVersion::Modern,
            options,
            responder,
            input: BytesMut::new(),
            output: BytesMut::new(),
            headers_read: HandshakeHeaders::new(),
            headers_written: HandshakeHeaders::new(),
            block_headers: 0,
            pending_status: (0, String::new()),
        }
    }

    /// Process bytes from the peer.
    ///
    /// Output generated before an error (a rejection response, say) stays
    /// available from [`take_output`](Self::take_output).
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        if self.phase == Phase::Failed {
            return Err(GnutellaError::BadHandshake("Handshake already failed".into()));
        }
        self.input.extend_from_slice(data);
        if self.phase == Phase::Complete {
            return Ok(());
        }

        let result = self.process();
        if result.is_err() {
            self.phase = Phase::Failed;
        }
        result
    }

    fn process(&mut self) -> Result<()> {
        while self.phase != Phase::Complete {
            let line = match self.take_line()? {
                Some(line) => line,
                None => return Ok(()),
            };
            self.on_line(&line)?;
        }
        Ok(())
    }

    fn take_line(&mut self) -> Result<Option<String>> {
        let newline = self.input.iter().position(|&b| b == b'\n');
        let limit = self.options.max_line_length;
        match newline {
            None if self.input.len() > limit => Err(GnutellaError::BadHandshake(format!(
                "Handshake line longer than {} bytes",
                limit
            ))),
            None => Ok(None),
            Some(pos) if pos > limit => Err(GnutellaError::BadHandshake(format!(
                "Handshake line longer than {} bytes",
                limit
            ))),
            Some(pos) => {
                let raw = self.input.split_to(pos + 1);
                let mut line = &raw[..pos];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
        }
    }

    fn on_line(&mut self, line: &str) -> Result<()> {
        match self.phase {
            Phase::AwaitStatus | Phase::AwaitFinalStatus => {
                self.pending_status = HandshakeResponse::parse_status_line(line)?;
                self.block_headers = 0;
                self.phase = if self.phase == Phase::AwaitStatus {
                    Phase::AwaitResponseHeaders
                } else {
                    Phase::AwaitFinalHeaders
                };
                Ok(())
            }
            Phase::AwaitConnectLine => self.on_connect_line(line),
            Phase::AwaitLegacyBlank => {
                if line.is_empty() {
                    self.output.extend_from_slice(LEGACY_OK);
                    self.complete();
                }
                Ok(())
            }
            Phase::AwaitResponseHeaders if line.is_empty() => self.on_response_block(),
            Phase::AwaitRequestHeaders if line.is_empty() => self.on_request_block(),
            Phase::AwaitFinalHeaders if line.is_empty() => {
                let (code, reason) = std::mem::take(&mut self.pending_status);
                if code != status::OK {
                    tracing::warn!("Peer refused our response: {} {}", code, reason);
                    return Err(GnutellaError::NoGnutellaOk { code, reason });
                }
                self.complete();
                Ok(())
            }
            Phase::AwaitResponseHeaders | Phase::AwaitRequestHeaders | Phase::AwaitFinalHeaders => {
                self.on_header_line(line)
            }
            Phase::Complete | Phase::Failed => Ok(()),
        }
    }

    fn on_connect_line(&mut self, line: &str) -> Result<()> {
        let line = line.strip_prefix(GNUTELLA_CONNECT_PREFIX).unwrap_or(line);
        match classify_connect_line(line) {
            ConnectVersion::Modern => {
                self.version = ConnectVersion::Modern;
                self.block_headers = 0;
                self.phase = Phase::AwaitRequestHeaders;
                Ok(())
            }
            ConnectVersion::Legacy if self.options.allow_legacy && line == CONNECT_04 => {
                tracing::debug!("Accepting legacy 0.4 peer");
                self.version = ConnectVersion::Legacy;
                self.phase = Phase::AwaitLegacyBlank;
                Ok(())
            }
            ConnectVersion::Legacy => Err(GnutellaError::BadHandshake(format!(
                "Unsupported connect line: {:?}",
                line
            ))),
        }
    }

    fn on_header_line(&mut self, line: &str) -> Result<()> {
        let (key, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => {
                tracing::debug!("Skipping malformed header line: {:?}", line);
                return Ok(());
            }
        };
        self.block_headers += 1;
        if self.block_headers > self.options.max_headers {
            return Err(GnutellaError::BadHandshake(format!(
                "More than {} handshake headers",
                self.options.max_headers
            )));
        }
        self.headers_read.insert(key.trim(), value.trim());
        Ok(())
    }

    /// Outgoing: the peer answered our connect request.
    fn on_response_block(&mut self) -> Result<()> {
        let (code, reason) = std::mem::take(&mut self.pending_status);
        let peer = HandshakeResponse::new(code, &reason, self.headers_read.clone());
        if !peer.is_accepted() {
            tracing::warn!("Connection refused by peer: {} {}", code, reason);
            return Err(peer.to_rejection());
        }

        let ours = self.responder.respond(&peer, true);
        self.write_response(&ours);
        if !ours.is_accepted() {
            tracing::debug!("Refusing peer after its response: {}", ours.status_line());
            return Err(ours.to_rejection());
        }
        self.complete();
        Ok(())
    }

    /// Incoming: the peer finished its connect request.
    fn on_request_block(&mut self) -> Result<()> {
        let peer = HandshakeResponse::ok(self.headers_read.clone());
        let ours = self.responder.respond(&peer, false);
        self.write_response(&ours);
        if !ours.is_accepted() {
            tracing::debug!("Refusing incoming peer: {}", ours.status_line());
            return Err(ours.to_rejection());
        }
        self.phase = Phase::AwaitFinalStatus;
        Ok(())
    }

    fn write_response(&mut self, response: &HandshakeResponse) {
        self.output.extend_from_slice(&response.to_bytes());
        self.headers_written.merge(response.headers());
    }

    fn complete(&mut self) {
        tracing::debug!(
            "Handshake complete ({:?}, {} headers read)",
            self.role,
            self.headers_read.len()
        );
        self.phase = Phase::Complete;
    }

    /// Take the bytes that should be sent to the peer.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn headers_read(&self) -> &HandshakeHeaders {
        &self.headers_read
    }

    pub fn headers_written(&self) -> &HandshakeHeaders {
        &self.headers_written
    }

    /// Finish a completed handshake.
    pub fn into_outcome(self) -> Result<HandshakeOutcome> {
        if self.phase != Phase::Complete {
            return Err(GnutellaError::Precondition("Handshake not complete".into()));
        }
        Ok(HandshakeOutcome {
            role: self.role,
            version: self.version,
            headers_read: self.headers_read,
            headers_written: self.headers_written,
            remaining: self.input.freeze(),
        })
    }
}

/// Run `handshaker` over `io` until it completes, fails or times out.
///
/// Transport failures and timeouts surface as `BadHandshake`. Output the
/// handshaker produced before failing is written before the error returns.
pub async fn perform_handshake<T, R>(
    io: &mut T,
    mut handshaker: Handshaker<R>,
    timeout: Duration,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
    R: HandshakeResponder,
{
    match tokio::time::timeout(timeout, drive(io, &mut handshaker)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(GnutellaError::BadHandshake(format!(
                "Handshake timed out after {:?}",
                timeout
            )))
        }
    }
    handshaker.into_outcome()
}

async fn drive<T, R>(io: &mut T, handshaker: &mut Handshaker<R>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    R: HandshakeResponder,
{
    let mut buf = vec![0u8; HANDSHAKE_READ_CHUNK];
    loop {
        flush_output(io, handshaker).await?;
        if handshaker.is_complete() {
            return Ok(());
        }

        let n = io.read(&mut buf).await.map_err(handshake_io)?;
        if n == 0 {
            return Err(GnutellaError::BadHandshake(
                "Connection closed during handshake".into(),
            ));
        }

        if let Err(e) = handshaker.feed(&buf[..n]) {
            if let Err(flush_err) = flush_output(io, handshaker).await {
                tracing::debug!("Could not deliver handshake response: {}", flush_err);
            }
            return Err(e);
        }
    }
}

async fn flush_output<T, R>(io: &mut T, handshaker: &mut Handshaker<R>) -> Result<()>
where
    T: AsyncWrite + Unpin,
    R: HandshakeResponder,
{
    let out = handshaker.take_output();
    if out.is_empty() {
        return Ok(());
    }
    io.write_all(&out).await.map_err(handshake_io)?;
    io.flush().await.map_err(handshake_io)
}

fn handshake_io(e: std::io::Error) -> GnutellaError {
    GnutellaError::BadHandshake(format!("I/O error: {}", e))
}
