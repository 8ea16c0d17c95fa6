//! Shared fakes for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use update_relay::limiter::RateLimitPolicy;
use update_relay::message::UpdateMessage;
use update_relay::origin::{FetchError, OriginClient, OriginKind, WorkerIdentity};
use update_relay::publisher::{PublishError, Publisher};
use update_relay::resilience::BreakerPolicy;
use update_relay::worker::WorkerSettings;

/// What a scripted origin does on each fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginBehavior {
    /// Return a fresh update every time.
    Updates,
    /// Return no update.
    Empty,
    /// Fail every fetch.
    Fail,
    /// Panic on the first fetch.
    Panic,
    /// Never finish a fetch.
    Hang,
}

/// Observations shared between a scripted origin and the test.
#[derive(Debug, Default)]
pub struct OriginTally {
    pub opened: AtomicU32,
    pub closed: AtomicU32,
    pub fetches: Mutex<Vec<Instant>>,
}

impl OriginTally {
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) > 0
    }
}

pub struct ScriptedOrigin {
    identity: WorkerIdentity,
    behavior: OriginBehavior,
    tally: Arc<OriginTally>,
    next_chat: i64,
}

impl ScriptedOrigin {
    pub fn new(identity: WorkerIdentity, behavior: OriginBehavior, tally: Arc<OriginTally>) -> Self {
        Self {
            identity,
            behavior,
            tally,
            next_chat: 1,
        }
    }
}

impl OriginClient for ScriptedOrigin {
    fn kind(&self) -> OriginKind {
        OriginKind::TamTam
    }

    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    async fn open(&mut self) -> Result<(), FetchError> {
        self.tally.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn fetch_next_update(&mut self) -> Result<Option<UpdateMessage>, FetchError> {
        self.tally.fetches.lock().unwrap().push(Instant::now());
        match self.behavior {
            OriginBehavior::Updates => {
                let chat_id = self.next_chat;
                self.next_chat += 1;
                Ok(Some(UpdateMessage::new(
                    OriginKind::TamTam,
                    chat_id,
                    Some(format!("update from {}", self.identity)),
                    Some("tester".to_string()),
                )))
            }
            OriginBehavior::Empty => Ok(None),
            OriginBehavior::Fail => Err(FetchError::Status(502)),
            OriginBehavior::Panic => panic!("scripted origin panic"),
            OriginBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

/// Publisher that records messages, or fails on demand.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, UpdateMessage)>>,
    pub attempts: AtomicU64,
    pub failing: AtomicBool,
    /// Time each send takes before it is recorded.
    pub delay: Option<Duration>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Publisher for RecordingPublisher {
    async fn send(&self, message: &UpdateMessage, queue: &str) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Nacked);
        }
        self.sent
            .lock()
            .unwrap()
            .push((queue.to_string(), message.clone()));
        Ok(())
    }
}

/// Worker settings for tests: short delays, long breaker resets.
pub fn settings(capacity: u32, window: Duration) -> WorkerSettings {
    let breaker = BreakerPolicy {
        max_failures: 3,
        reset_timeout: Duration::from_secs(60),
        half_open_max_attempts: 1,
    };
    WorkerSettings {
        key: "rate_limiter:test".to_string(),
        policy: RateLimitPolicy::new(capacity, window),
        max_total_wait: Duration::from_secs(30),
        fail_open: true,
        breaker_open_delay: Duration::from_millis(20),
        queue: "notifications".to_string(),
        store_breaker: breaker,
        publish_breaker: breaker,
    }
}

pub fn identities(count: usize) -> Vec<WorkerIdentity> {
    (0..count)
        .map(|i| WorkerIdentity::new(format!("test-token-{:04}", i)))
        .collect()
}

/// Largest number of instants that fall within any span shorter than `span`.
pub fn max_in_span(times: &[Instant], span: Duration) -> usize {
    let mut sorted = times.to_vec();
    sorted.sort();
    (0..sorted.len())
        .map(|i| {
            sorted[i..]
                .iter()
                .take_while(|t| t.duration_since(sorted[i]) < span)
                .count()
        })
        .max()
        .unwrap_or(0)
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` receives the request line and body and returns status and body.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some((request_line, body)) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(&request_line, &body);
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            204 => "204 No Content",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read one HTTP/1.1 request: headers, then `Content-Length` bytes of body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some((request_line, body))
}
