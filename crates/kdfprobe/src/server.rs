//! HTTP front end. `/` reports the fan-out and triggers it.

use crate::error::{Error, Result};
use crate::fanout::FanOut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tiny_http::{Request, Response, Server};

/// How long `serve` blocks on the socket before rechecking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wall-clock time of day, as shown in responses and origin labels
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Body written for a request on `/`
pub fn status_line(timestamp: &str, count: usize) -> String {
    format!("{timestamp} executing key derivation count: {count}\n")
}

/// Whether `url` targets the trigger endpoint. The query string is ignored.
fn is_root(url: &str) -> bool {
    url.split(['?', '#']).next() == Some("/")
}

pub struct TriggerServer {
    server: Server,
}

impl TriggerServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| Error::Server(format!("bind {addr}: {e}")))?;
        Ok(Self { server })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until `running` is cleared or `deadline` passes.
    ///
    /// Returns the number of requests that triggered a fan-out.
    pub fn serve(
        &self,
        fanout: &FanOut,
        running: &AtomicBool,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let mut triggered = 0u64;

        while running.load(Ordering::SeqCst) {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                break;
            }

            let Some(request) = self.server.recv_timeout(POLL_INTERVAL)? else {
                continue;
            };
            if handle(request, fanout) {
                triggered += 1;
            }
        }

        Ok(triggered)
    }
}

/// Answer one request. Returns `true` if it launched invocations.
fn handle(request: Request, fanout: &FanOut) -> bool {
    if !is_root(request.url()) {
        tracing::debug!(url = request.url(), "not found");
        if let Err(e) = request.respond(Response::from_string("Not Found").with_status_code(404)) {
            tracing::debug!("failed to write response: {e}");
        }
        return false;
    }

    let now = timestamp();
    let body = status_line(&now, fanout.config().count.get());

    // The status line goes out before any invocation starts
    if let Err(e) = request.respond(Response::from_string(body)) {
        tracing::debug!("failed to write response: {e}");
    }
    fanout.on_request(&now);
    true
}
