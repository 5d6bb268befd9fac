// SPDX-License-Identifier: Apache-2.0
//
// Per-connection worker: the dual-protocol state machine that multiplexes
// the web status surface with IPP-over-HTTP on one socket, including the
// first-byte TLS sniff and in-line TLS upgrade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use platen_core::{PlatenError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::ops::{self, ResponseBody};
use crate::server::ServerContext;
use crate::web;

/// Idle limit between requests on a kept-alive connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a request body; prevents unbounded memory consumption
/// from misbehaving clients.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// First bytes of the methods we speak; anything else on a fresh
/// connection is treated as a TLS ClientHello.
const PLAINTEXT_FIRST_BYTES: &[u8] = b"DGHOPT";

/// The first-byte sniff: printable method initials stay plaintext,
/// everything else (e.g. a 0x16 TLS handshake record) negotiates TLS.
fn is_plaintext_first_byte(byte: u8) -> bool {
    byte != 0 && PLAINTEXT_FIRST_BYTES.contains(&byte)
}

/// Object-safe duplex stream: plain TCP or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Options,
    Get,
    Head,
    Post,
    Other,
}

struct Request {
    method: Method,
    /// Path component of the request target.
    path: String,
    version: String,
    /// Header names lowercased.
    headers: Vec<(String, String)>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One client connection.
pub struct Client {
    stream: Box<dyn Stream>,
    buffer: Vec<u8>,
    pos: usize,
    peer: SocketAddr,
    encrypted: bool,
}

/// Entry point for an accepted socket: sniff, maybe handshake, then run
/// the request loop.
pub async fn process_client(ctx: Arc<ServerContext>, socket: TcpStream, peer: SocketAddr) {
    // Wait for the first byte (bounded), then decide HTTP vs TLS.
    let mut first = [0u8; 1];
    let peeked = tokio::time::timeout(IDLE_TIMEOUT, socket.peek(&mut first)).await;
    let n = match peeked {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "peek failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "idle timeout before first request");
            return;
        }
    };
    if n == 0 {
        return;
    }

    let wants_tls = !is_plaintext_first_byte(first[0]);
    let (stream, encrypted): (Box<dyn Stream>, bool) = if wants_tls {
        let Some(acceptor) = ctx.tls.clone() else {
            warn!(peer = %peer, "TLS client but no certificate configured");
            return;
        };
        match acceptor.accept(socket).await {
            Ok(tls) => {
                info!(peer = %peer, "connection now encrypted");
                (Box::new(tls), true)
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
        }
    } else {
        (Box::new(socket), false)
    };

    let client = Client {
        stream,
        buffer: Vec::with_capacity(8192),
        pos: 0,
        peer,
        encrypted,
    };
    run_connection(ctx, client).await;
}

/// The request loop: serialized requests bounded by the idle timeout.
pub async fn run_connection(ctx: Arc<ServerContext>, mut client: Client) {
    loop {
        // Wait for the next request.
        if client.available() == 0 {
            match tokio::time::timeout(IDLE_TIMEOUT, client.fill()).await {
                Ok(Ok(0)) => {
                    debug!(peer = %client.peer, "client closed connection");
                    return;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(peer = %client.peer, error = %e, "read error");
                    return;
                }
                Err(_) => {
                    debug!(peer = %client.peer, "idle timeout, closing");
                    return;
                }
            }
        }

        match process_http(&ctx, &mut client).await {
            Ok(true) => continue,
            Ok(false) => return,
            Err(e) => {
                debug!(peer = %client.peer, error = %e, "request failed");
                return;
            }
        }
    }
}

/// Process one HTTP request. Returns whether to keep the connection.
async fn process_http(ctx: &Arc<ServerContext>, client: &mut Client) -> Result<bool> {
    let request = match client.read_request().await {
        Ok(request) => request,
        Err(e) => {
            debug!(peer = %client.peer, error = %e, "bad request line");
            client.write_simple_error(400, "Bad Request").await?;
            return Ok(false);
        }
    };

    info!(peer = %client.peer, method = ?request.method, path = %request.path, "request");

    if request.method == Method::Other {
        client.write_simple_error(400, "Bad Request").await?;
        return Ok(false);
    }

    // HTTP/1.1 and higher require Host.
    if request.version != "HTTP/1.0" && request.header("host").is_none() {
        client.write_simple_error(400, "Bad Request").await?;
        return Ok(false);
    }

    // In-line TLS upgrade on a plaintext connection.
    if request
        .header("connection")
        .is_some_and(|c| c.eq_ignore_ascii_case("upgrade"))
    {
        let upgrade_tls = request
            .header("upgrade")
            .is_some_and(|u| u.contains("TLS/"));
        if upgrade_tls && !client.encrypted {
            let Some(acceptor) = ctx.tls.clone() else {
                client.write_simple_error(501, "Not Implemented").await?;
                return Ok(true);
            };
            client
                .write_head(
                    101,
                    "Switching Protocols",
                    &[
                        ("Connection", "Upgrade"),
                        ("Upgrade", "TLS/1.2,HTTP/1.1"),
                    ],
                )
                .await?;
            client.upgrade_tls(acceptor).await?;
            info!(peer = %client.peer, "connection upgraded to TLS");
            return Ok(true);
        }
        if !upgrade_tls {
            client.write_simple_error(501, "Not Implemented").await?;
            return Ok(true);
        }
    }

    // Expect handling for body-bearing methods.
    if request.method == Method::Post {
        match request.header("expect") {
            Some(expect) if expect.eq_ignore_ascii_case("100-continue") => {
                client.write_head(100, "Continue", &[]).await?;
            }
            Some(_) => {
                client
                    .write_simple_error(417, "Expectation Failed")
                    .await?;
                return Ok(false);
            }
            None => {}
        }
    }

    let keep_alive = match request.header("connection") {
        Some(c) if c.eq_ignore_ascii_case("close") => false,
        _ => request.version != "HTTP/1.0",
    };

    match request.method {
        Method::Options => {
            client
                .write_head(
                    200,
                    "OK",
                    &[
                        ("Allow", "GET, HEAD, OPTIONS, POST"),
                        ("Content-Length", "0"),
                    ],
                )
                .await?;
        }
        Method::Head => {
            handle_head(client, &request).await?;
        }
        Method::Get => {
            handle_get(ctx, client, &request).await?;
        }
        Method::Post => {
            let body = client.read_body(&request).await?;
            handle_post(ctx, client, &request, body).await?;
        }
        Method::Other => unreachable!("rejected above"),
    }

    Ok(keep_alive)
}

// ---------------------------------------------------------------------------
// Method handlers
// ---------------------------------------------------------------------------

async fn handle_head(client: &mut Client, request: &Request) -> Result<()> {
    if request.path == "/icon.png" {
        client
            .write_head(200, "OK", &[("Content-Type", "image/png")])
            .await
    } else if request.path == "/" || request.path == "/media" || request.path == "/supplies" {
        client
            .write_head(200, "OK", &[("Content-Type", "text/html; charset=utf-8")])
            .await
    } else {
        client.write_head(404, "Not Found", &[]).await
    }
}

async fn handle_get(
    ctx: &Arc<ServerContext>,
    client: &mut Client,
    request: &Request,
) -> Result<()> {
    match request.path.as_str() {
        "/" => {
            let Some(printer) = ctx.registry.iter().next() else {
                return client.write_simple_error(503, "Service Unavailable").await;
            };
            let page = web::status_page(printer).await;
            client
                .write_body(
                    200,
                    "OK",
                    "text/html; charset=utf-8",
                    page.as_bytes(),
                )
                .await
        }
        "/icon.png" => {
            let icon = ctx
                .registry
                .iter()
                .next()
                .and_then(|p| p.config.icon.clone());
            match icon {
                Some(path) => match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        client.write_body(200, "OK", "image/png", &bytes).await
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "icon unreadable");
                        client.write_simple_error(404, "Not Found").await
                    }
                },
                None => client.write_simple_error(404, "Not Found").await,
            }
        }
        // The media/supplies forms remain disabled.
        _ => client.write_simple_error(404, "Not Found").await,
    }
}

async fn handle_post(
    ctx: &Arc<ServerContext>,
    client: &mut Client,
    request: &Request,
    body: Vec<u8>,
) -> Result<()> {
    let is_ipp = request
        .header("content-type")
        .is_some_and(|t| t.starts_with("application/ipp"));
    if !is_ipp {
        return client.write_simple_error(400, "Bad Request").await;
    }

    let Some(printer) = ctx.registry.find(&request.path) else {
        return client.write_simple_error(404, "Not Found").await;
    };

    let (message, document_offset) = match platen_ipp::IppMessage::parse(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(peer = %client.peer, error = %e, "IPP parse error");
            return client.write_simple_error(400, "Bad Request").await;
        }
    };

    let (response, payload) =
        ops::dispatch(printer, message, &body[document_offset..]).await;
    let mut bytes = response.encode();
    if let ResponseBody::Bytes(more) = payload {
        bytes.extend_from_slice(&more);
    }

    client
        .write_body(200, "OK", "application/ipp", &bytes)
        .await
}

// ---------------------------------------------------------------------------
// Buffered stream plumbing
// ---------------------------------------------------------------------------

impl Client {
    /// Build a client over an established stream (tests drive this with an
    /// in-memory duplex).
    pub fn new(stream: Box<dyn Stream>, peer: SocketAddr, encrypted: bool) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(8192),
            pos: 0,
            peer,
            encrypted,
        }
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Read more bytes into the buffer; 0 means EOF.
    async fn fill(&mut self) -> std::io::Result<usize> {
        if self.pos > 0 && self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        }
        let mut chunk = [0u8; 8192];
        let n = self.stream.read(&mut chunk).await?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// One CRLF-terminated line, without the terminator.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(offset) = self.buffer[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + offset;
                let line = &self.buffer[self.pos..end];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let text = String::from_utf8_lossy(line).into_owned();
                self.pos = end + 1;
                return Ok(text);
            }
            if self.buffer.len() - self.pos > 16384 {
                return Err(PlatenError::Http("header line too long".into()));
            }
            if self.fill().await? == 0 {
                return Err(PlatenError::Http("connection closed mid-request".into()));
            }
        }
    }

    async fn read_exact_vec(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(length.min(1 << 20));
        while out.len() < length {
            if self.available() == 0 && self.fill().await? == 0 {
                return Err(PlatenError::Http("connection closed mid-body".into()));
            }
            let take = (length - out.len()).min(self.available());
            out.extend_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    /// Parse the request line and headers.
    async fn read_request(&mut self) -> Result<Request> {
        let line = self.read_line().await?;
        let mut parts = line.split_whitespace();
        let method = match parts.next() {
            Some("OPTIONS") => Method::Options,
            Some("GET") => Method::Get,
            Some("HEAD") => Method::Head,
            Some("POST") => Method::Post,
            Some(_) => Method::Other,
            None => return Err(PlatenError::Http("empty request line".into())),
        };
        let target = parts
            .next()
            .ok_or_else(|| PlatenError::Http("missing request target".into()))?;
        let version = parts
            .next()
            .ok_or_else(|| PlatenError::Http("missing HTTP version".into()))?
            .to_string();

        // Accept absolute-form targets and strip any query string.
        let path = if let Some(rest) = target
            .strip_prefix("http://")
            .or_else(|| target.strip_prefix("https://"))
            .or_else(|| target.strip_prefix("ipp://"))
        {
            match rest.find('/') {
                Some(index) => &rest[index..],
                None => "/",
            }
        } else {
            target
        };
        let path = path.split('?').next().unwrap_or("/").to_string();

        let mut headers = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        Ok(Request {
            method,
            path,
            version,
            headers,
        })
    }

    /// Read a request body: Content-Length or chunked.
    async fn read_body(&mut self, request: &Request) -> Result<Vec<u8>> {
        if request
            .header("transfer-encoding")
            .is_some_and(|t| t.to_ascii_lowercase().contains("chunked"))
        {
            let mut body = Vec::new();
            loop {
                let size_line = self.read_line().await?;
                let size = usize::from_str_radix(
                    size_line.split(';').next().unwrap_or("").trim(),
                    16,
                )
                .map_err(|_| PlatenError::Http("bad chunk size".into()))?;
                if size == 0 {
                    // Trailers until the blank line.
                    loop {
                        if self.read_line().await?.is_empty() {
                            break;
                        }
                    }
                    return Ok(body);
                }
                if body.len() + size > MAX_BODY_BYTES {
                    return Err(PlatenError::Http("request body too large".into()));
                }
                body.extend_from_slice(&self.read_exact_vec(size).await?);
                self.read_line().await?; // chunk terminator
            }
        }

        match request.header("content-length") {
            Some(length) => {
                let length: usize = length
                    .parse()
                    .map_err(|_| PlatenError::Http("bad Content-Length".into()))?;
                if length > MAX_BODY_BYTES {
                    return Err(PlatenError::Http("request body too large".into()));
                }
                self.read_exact_vec(length).await
            }
            None => Ok(Vec::new()),
        }
    }

    // -- Response writing ---------------------------------------------------

    /// Headers-only response (also used for 100/101 interim responses).
    async fn write_head(
        &mut self,
        code: u16,
        reason: &str,
        headers: &[(&str, &str)],
    ) -> Result<()> {
        let mut head = format!("HTTP/1.1 {code} {reason}\r\n");
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        self.stream.write_all(head.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Full response with a body.
    async fn write_body(
        &mut self,
        code: u16,
        reason: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        let length = body.len().to_string();
        let mut headers: Vec<(&str, &str)> = vec![
            ("Content-Type", content_type),
            ("Content-Length", &length),
        ];
        if code == 405 {
            headers.push(("Allow", "GET, HEAD, OPTIONS, POST"));
        }
        self.write_head(code, reason, &headers).await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Plain-text error body: `"{code} - {reason}\n"`.
    async fn write_simple_error(&mut self, code: u16, reason: &str) -> Result<()> {
        let body = format!("{code} - {reason}\n");
        self.write_body(code, reason, "text/plain; charset=utf-8", body.as_bytes())
            .await
    }

    /// Swap the plaintext stream for a TLS session after `101`.
    async fn upgrade_tls(&mut self, acceptor: tokio_rustls::TlsAcceptor) -> Result<()> {
        // The handshake consumes the raw stream; buffered bytes would be
        // lost, so an upgrade is only honored at a request boundary.
        if self.available() != 0 {
            return Err(PlatenError::Tls("pipelined data before TLS upgrade".into()));
        }
        let placeholder: Box<dyn Stream> = Box::new(tokio::io::duplex(1).0);
        let stream = std::mem::replace(&mut self.stream, placeholder);
        let tls = acceptor
            .accept(UpgradeIo(stream))
            .await
            .map_err(|e| PlatenError::Tls(format!("handshake: {e}")))?;
        self.stream = Box::new(tls);
        self.encrypted = true;
        Ok(())
    }
}

/// Adapter giving the TLS acceptor a sized stream type.
struct UpgradeIo(Box<dyn Stream>);

impl AsyncRead for UpgradeIo {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UpgradeIo {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use platen_core::ServerConfig;
    use platen_ipp::{GroupTag, IppAttribute, IppMessage, Operation, StatusCode};

    fn test_context(spool: &std::path::Path) -> Arc<ServerContext> {
        let config = ServerConfig {
            printer_name: "p1".into(),
            port: 631,
            spool_directory: spool.to_path_buf(),
            ..Default::default()
        };
        Arc::new(ServerContext::for_tests(config, "host"))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Drive one connection over an in-memory duplex, returning the raw
    /// response bytes after the driver closes its end.
    async fn exchange(ctx: Arc<ServerContext>, input: Vec<u8>) -> Vec<u8> {
        let (near, far) = tokio::io::duplex(1 << 20);
        let client = Client::new(Box::new(near), peer(), false);
        let server = tokio::spawn(run_connection(ctx, client));

        let (mut read_half, mut write_half) = tokio::io::split(far);
        write_half.write_all(&input).await.expect("write");
        write_half.shutdown().await.expect("shutdown");

        let mut response = Vec::new();
        read_half.read_to_end(&mut response).await.expect("read");
        server.abort();
        response
    }

    fn http_post_ipp(path: &str, body: &[u8]) -> Vec<u8> {
        let mut request = format!(
            "POST {path} HTTP/1.1\r\nHost: host\r\nContent-Type: application/ipp\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        request
    }

    fn parse_ipp_response(response: &[u8]) -> IppMessage {
        let header_end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header end")
            + 4;
        IppMessage::parse(&response[header_end..]).expect("IPP parse").0
    }

    #[test]
    fn tls_sniff_byte_classes() {
        // Method initials stay plaintext.
        for byte in *b"DGHOPT" {
            assert!(is_plaintext_first_byte(byte));
        }
        // A TLS ClientHello record (0x16), NUL, and arbitrary bytes all
        // trigger the TLS path.
        assert!(!is_plaintext_first_byte(0x16));
        assert!(!is_plaintext_first_byte(0x00));
        assert!(!is_plaintext_first_byte(b'X'));
    }

    #[tokio::test]
    async fn get_status_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"GET / HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Content-Type: text/html; charset=utf-8"));
        assert!(text.contains("0 job(s)."));
    }

    #[tokio::test]
    async fn missing_host_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(ctx, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(text.contains("400 - Bad Request\n"));
    }

    #[tokio::test]
    async fn unknown_method_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"BREW /coffee HTTP/1.1\r\nHost: host\r\n\r\n".to_vec(),
        )
        .await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn options_lists_allowed_methods() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"OPTIONS * HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.contains("Allow: GET, HEAD, OPTIONS, POST"));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"GET /nope HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 404 Not Found"));
        assert!(text.contains("404 - Not Found\n"));
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());

        let mut ipp = IppMessage::request(Operation::GetPrinterAttributes, 7);
        ipp.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host:631/ipp/print",
        ));
        let body = ipp.encode();

        let mut request = format!(
            "POST /ipp/print HTTP/1.1\r\nHost: host\r\nContent-Type: application/ipp\r\nExpect: 100-continue\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        let response = exchange(ctx, request).await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 100 Continue"));
        assert!(text.contains("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn other_expectations_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"POST /ipp/print HTTP/1.1\r\nHost: host\r\nExpect: 200-maybe\r\nContent-Length: 0\r\n\r\n"
                .to_vec(),
        )
        .await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 417"));
    }

    #[tokio::test]
    async fn print_job_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());

        let mut ipp = IppMessage::request(Operation::PrintJob, 99);
        {
            let operation = &mut ipp.groups[0];
            operation.push(IppAttribute::uri(
                "printer-uri",
                "ipp://host:631/ipp/print",
            ));
            operation.push(IppAttribute::name_value("requesting-user-name", "alice"));
            operation.push(IppAttribute::mime_type("document-format", "application/pdf"));
        }
        let mut body = ipp.encode();
        body.extend_from_slice(b"%PDF-1.4 tiny document");

        let response = exchange(ctx.clone(), http_post_ipp("/ipp/print", &body)).await;
        let message = parse_ipp_response(&response);

        assert_eq!(message.code, StatusCode::SuccessfulOk.as_u16());
        assert_eq!(message.request_id, 99);
        let job = message.group(GroupTag::JobAttributes).expect("job group");
        assert_eq!(job.get_int("job-id"), Some(1));
        assert_eq!(
            job.get_str("job-uri"),
            Some("ipp://host:631/ipp/print/1")
        );
        // The scheduler only runs after the response is built, so the
        // reported state is always pending.
        assert_eq!(job.get("job-state").and_then(|a| a.as_int()), Some(3));

        // The status page now shows the job and its owner.
        let page = exchange(
            ctx,
            b"GET / HTTP/1.1\r\nHost: host\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let text = String::from_utf8_lossy(&page);
        assert!(text.contains("1 job(s)."));
        assert!(text.contains("alice"));
    }

    #[tokio::test]
    async fn chunked_body_is_reassembled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());

        let mut ipp = IppMessage::request(Operation::GetPrinterAttributes, 5);
        ipp.groups[0].push(IppAttribute::uri(
            "printer-uri",
            "ipp://host:631/ipp/print",
        ));
        let body = ipp.encode();

        let mut request = Vec::from(
            &b"POST /ipp/print HTTP/1.1\r\nHost: host\r\nContent-Type: application/ipp\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"[..],
        );
        // Two chunks.
        let (first, second) = body.split_at(body.len() / 2);
        for chunk in [first, second] {
            request.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            request.extend_from_slice(chunk);
            request.extend_from_slice(b"\r\n");
        }
        request.extend_from_slice(b"0\r\n\r\n");

        let response = exchange(ctx, request).await;
        let message = parse_ipp_response(&response);
        assert_eq!(message.code, StatusCode::SuccessfulOk.as_u16());
        assert_eq!(message.request_id, 5);
    }

    #[tokio::test]
    async fn post_without_ipp_content_type_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(
            ctx,
            b"POST /ipp/print HTTP/1.1\r\nHost: host\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi"
                .to_vec(),
        )
        .await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn malformed_ipp_is_400() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let response = exchange(ctx, http_post_ipp("/ipp/print", b"\x01")).await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn post_to_unknown_printer_is_404() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = test_context(dir.path());
        let ipp = IppMessage::request(Operation::GetPrinterAttributes, 1).encode();
        let response = exchange(ctx, http_post_ipp("/ipp/other", &ipp)).await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404"));
    }
}
