//! Test harness and mock queryset service.
//!
//! # Example
//!
//! ```ignore
//! #[test]
//! fn lists_querysets() {
//!     let harness = TestHarness::new("lists_querysets");
//!     let server = harness.start_mock_http_server();
//!     server.add_route("GET", "/querysets", MockHttpResponse::json(200, &json!({"querysets": []})));
//!     // ... point a client at server.base_url() ...
//! }
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Timestamped lines shared between a harness and its helpers.
#[derive(Debug, Clone, Default)]
pub struct TestLog {
    started: Option<Instant>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl TestLog {
    fn new() -> Self {
        Self {
            started: Some(Instant::now()),
            lines: Arc::default(),
        }
    }

    pub fn info(&self, category: &str, message: impl AsRef<str>) {
        let elapsed = self.started.map_or(0.0, |s| s.elapsed().as_secs_f64());
        self.lines
            .lock()
            .unwrap()
            .push(format!("[{elapsed:>8.3}s] {category:<10} {}", message.as_ref()));
    }

    pub fn dump(&self) -> String {
        self.lines.lock().unwrap().join("\n")
    }
}

/// Temp directory plus a test log dumped to stderr if the test panics.
pub struct TestHarness {
    name: String,
    temp_dir: TempDir,
    log: TestLog,
}

impl TestHarness {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log = TestLog::new();
        log.info("harness", format!("Test '{name}' started in {}", temp_dir.path().display()));
        Self {
            name,
            temp_dir,
            log,
        }
    }

    pub const fn log(&self) -> &TestLog {
        &self.log
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn temp_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Create a file (and its parents) in the temp directory.
    pub fn create_file(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.temp_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content.as_ref()).expect("Failed to create test file");
        self.log.info(
            "harness",
            format!("Created {} ({} bytes)", path.display(), content.as_ref().len()),
        );
        path
    }

    pub fn section(&self, name: &str) {
        self.log.info("section", format!("=== {name} ==="));
    }

    pub fn start_mock_http_server(&self) -> MockHttpServer {
        MockHttpServer::start(self.log.clone())
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if thread::panicking() {
            eprintln!("\n=== TEST LOGS: {} ===\n{}", self.name, self.log.dump());
        }
    }
}

// ============================================================================
// Mock HTTP Server (offline, deterministic)
// ============================================================================

#[derive(Debug, Clone)]
pub struct MockHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockHttpResponse {
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::bytes(status, "text/plain", body.into().into_bytes())
    }

    #[must_use]
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::bytes(
            status,
            "application/json",
            serde_json::to_vec(value).unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockHttpRequest {
    pub method: String,
    /// Path including any query string.
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: String,
    path: String,
}

/// Responses per route are served in order; the last one repeats.
type Routes = Arc<Mutex<HashMap<RouteKey, VecDeque<MockHttpResponse>>>>;

pub struct MockHttpServer {
    addr: SocketAddr,
    routes: Routes,
    requests: Arc<Mutex<Vec<MockHttpRequest>>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    log: TestLog,
}

impl MockHttpServer {
    #[must_use]
    pub fn start(log: TestLog) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock http listener");
        let addr = listener.local_addr().expect("mock http listener addr");
        listener
            .set_nonblocking(true)
            .expect("set mock http listener nonblocking");

        let routes: Routes = Arc::default();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_routes = Arc::clone(&routes);
        let thread_requests = Arc::clone(&requests);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_log = log.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();

        let join = thread::spawn(move || {
            let _ = ready_tx.send(());
            while !thread_shutdown.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, peer)) => {
                        if let Err(err) =
                            handle_connection(&mut stream, &thread_routes, &thread_requests, &thread_log)
                        {
                            thread_log.info("mock_http", format!("{peer}: handler error: {err}"));
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(err) => {
                        thread_log.info("mock_http", format!("accept error: {err}"));
                        break;
                    }
                }
            }
        });
        let _ = ready_rx.recv();
        log.info("mock_http", format!("Mock HTTP server started on {addr}"));

        Self {
            addr,
            routes,
            requests,
            shutdown,
            join: Some(join),
            log,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue `response` for `method path` (path includes the query string).
    pub fn add_route(&self, method: &str, path: &str, response: MockHttpResponse) {
        let key = RouteKey {
            method: method.trim().to_ascii_uppercase(),
            path: path.to_string(),
        };
        self.routes
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<MockHttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.log.info(
            "mock_http",
            format!("Stopped after {} requests", self.requests.lock().unwrap().len()),
        );
    }
}

fn handle_connection(
    stream: &mut TcpStream,
    routes: &Routes,
    requests: &Arc<Mutex<Vec<MockHttpRequest>>>,
    log: &TestLog,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;

    let mut scratch = [0u8; 16 * 1024];
    let mut buf = Vec::with_capacity(8192);
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut scratch)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before request headers",
            ));
        }
        buf.extend_from_slice(&scratch[..n]);
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut body = buf[header_end + 4..].to_vec();
    let mut lines = header_text.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_ascii_uppercase();
    let path = request_line.next().unwrap_or_default().to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while body.len() < content_length {
        let n = stream.read(&mut scratch)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&scratch[..n]);
    }

    log.info("mock_http", format!("{method} {path} ({} body bytes)", body.len()));
    requests.lock().unwrap().push(MockHttpRequest {
        method: method.clone(),
        path: path.clone(),
        body,
    });

    let response = {
        let mut routes = routes.lock().unwrap();
        match routes.get_mut(&RouteKey { method, path }) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    }
    .unwrap_or_else(|| MockHttpResponse::text(404, "not found"));

    write_response(stream, &response)
}

const fn reason_phrase(status: u16) -> &'static str {
    match status {
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

fn write_response(stream: &mut TcpStream, response: &MockHttpResponse) -> std::io::Result<()> {
    let mut head = String::new();
    let _ = write!(
        &mut head,
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    for (name, value) in &response.headers {
        let _ = write!(&mut head, "{name}: {value}\r\n");
    }
    let _ = write!(&mut head, "Content-Length: {}\r\n", response.body.len());
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_creates_nested_files() {
        let harness = TestHarness::new("harness_creates_nested_files");
        let path = harness.create_file("a/b/c.txt", "content");
        assert!(path.exists());
        assert!(harness.log().dump().contains("c.txt"));
    }

    #[test]
    fn mock_server_serves_scripted_sequence() {
        let harness = TestHarness::new("mock_server_serves_scripted_sequence");
        let server = harness.start_mock_http_server();
        server.add_route("GET", "/seq", MockHttpResponse::text(202, "first"));
        server.add_route("GET", "/seq", MockHttpResponse::text(200, "second"));

        let fetch = || {
            let mut stream = TcpStream::connect(server.addr).unwrap();
            stream
                .write_all(b"GET /seq HTTP/1.1\r\nHost: x\r\n\r\n")
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        };
        assert!(fetch().ends_with("first"));
        assert!(fetch().ends_with("second"));
        assert!(fetch().ends_with("second"));
        assert_eq!(server.requests().len(), 3);
    }
}
