//! Minimal HTTP fixture standing in for the Drive API in integration tests.
//!
//! Serves canned responses from a route table over a raw `TcpListener`
//! (one connection per request, `Connection: close`) and records every hit
//! so tests can assert how many network calls a scenario produced.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One canned response
pub struct Route {
    pub method: String,
    pub path: String,
    /// Substring the raw query string must contain (form-encoded)
    pub query_contains: Option<String>,
    pub status: u16,
    pub body: String,
    /// Response delay, for last-response-wins scenarios
    pub delay_ms: u64,
    /// How many requests this route may serve; `None` = unlimited
    pub remaining: Option<u32>,
}

impl Route {
    pub fn new(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query_contains: None,
            status,
            body: body.to_string(),
            delay_ms: 0,
            remaining: None,
        }
    }

    pub fn matching(mut self, query_fragment: &str) -> Self {
        self.query_contains = Some(query_fragment.to_string());
        self
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }
}

/// One observed request
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: String,
    pub path: String,
    pub query: String,
}

#[derive(Default)]
struct ServerState {
    routes: Vec<Route>,
    hits: Vec<Hit>,
}

pub struct MockDrive {
    origin: String,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl MockDrive {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let server_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    let _ = handle_connection(socket, state).await;
                });
            }
        });

        Self {
            origin: format!("http://127.0.0.1:{}", port),
            state,
            handle,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub async fn route(&self, route: Route) {
        self.state.lock().await.routes.push(route);
    }

    /// Number of requests observed for `(method, path)`
    pub async fn hits(&self, method: &str, path: &str) -> usize {
        self.state
            .lock()
            .await
            .hits
            .iter()
            .filter(|h| h.method == method && h.path == path)
            .count()
    }

    /// Query strings of every request observed for `(method, path)`
    pub async fn hit_queries(&self, method: &str, path: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .hits
            .iter()
            .filter(|h| h.method == method && h.path == path)
            .map(|h| h.query.clone())
            .collect()
    }
}

impl Drop for MockDrive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    state: Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    // Read the request head
    let mut buffer = Vec::with_capacity(4096);
    let head_end = loop {
        let mut chunk = [0u8; 1024];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
        if buffer.len() > 1 << 20 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.to_string(), String::new()),
    };

    // Drain the body so the client never sees a reset mid-write
    let content_length: usize = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);
    let mut body_read = buffer.len() - (head_end + 4);
    while body_read < content_length {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    // Pick the first live matching route
    let (status, body, delay_ms) = {
        let mut state = state.lock().await;
        state.hits.push(Hit {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
        });

        let found = state.routes.iter_mut().find(|r| {
            r.method == method
                && r.path == path
                && r.remaining != Some(0)
                && r.query_contains
                    .as_ref()
                    .map_or(true, |fragment| query.contains(fragment.as_str()))
        });
        match found {
            Some(route) => {
                if let Some(ref mut remaining) = route.remaining {
                    *remaining -= 1;
                }
                (route.status, route.body.clone(), route.delay_ms)
            }
            None => (404, r#"{"error":"no matching route"}"#.to_string(), 0),
        }
    };

    if delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
    }

    let reason = match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    // 204 must carry neither a body nor a Content-Length header
    let response = if status == 204 {
        format!("HTTP/1.1 {} {}\r\nConnection: close\r\n\r\n", status, reason)
    } else {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        )
    };
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    Ok(())
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
