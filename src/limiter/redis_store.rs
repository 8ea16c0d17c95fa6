//! Redis-backed admission store.
//!
//! Each key is a sorted set of members scored by their admission time in
//! microseconds of the Redis server clock. The scripted path runs purge,
//! count, insert and expire as one Lua script; the fallback path runs the
//! same steps in a `MULTI`/`EXEC` transaction with an unconditional insert.

use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Script};
use std::future::Future;
use std::time::Duration;

use crate::config::schema::redact_url;
use crate::config::StoreConfig;
use crate::limiter::store::{
    denial_hint, Admission, AdmissionStore, RateLimitPolicy, StoreError, WindowSnapshot,
};

/// KEYS[1] window key; ARGV[1] window ms, ARGV[2] capacity, ARGV[3] member.
/// Returns `{1, remaining}` when admitted, `{0, oldest_age_us}` when denied.
const ADMISSION_SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local member = ARGV[3]

local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000000 + tonumber(t[2])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window_ms * 1000)
local count = redis.call('ZCARD', key)

if count < capacity then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window_ms)
    return {1, capacity - count - 1}
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local age = -1
if oldest[2] then
    age = now - tonumber(oldest[2])
end
return {0, age}
"#;

/// Admission store shared by every process pointed at the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    admission: Script,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the configured Redis. The manager reconnects on its own
    /// after the first connection succeeds.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {}", e)))?;

        let connection = tokio::time::timeout(config.request_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable("timed out connecting to Redis".into()))?
            .map_err(classify)?;

        tracing::info!(url = %redact_url(&config.url), "Redis admission store connected");

        Ok(Self {
            connection,
            admission: Script::new(ADMISSION_SCRIPT),
            timeout: config.request_timeout(),
        })
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Unavailable(format!(
                "Redis did not answer within {:?}",
                self.timeout
            ))),
        }
    }

    /// Server clock in microseconds.
    async fn server_time(&self) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let (secs, micros): (i64, i64) = self
            .bounded(redis::cmd("TIME").query_async(&mut conn))
            .await?;
        Ok(secs * 1_000_000 + micros)
    }
}

/// Map a Redis error onto the store's error classes.
fn classify(err: RedisError) -> StoreError {
    if script_unsupported(&err) {
        StoreError::ScriptUnsupported
    } else if matches!(err.kind(), ErrorKind::TypeError | ErrorKind::ParseError) {
        StoreError::Protocol(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

/// Scripting disabled, or `EVALSHA`/`EVAL` unknown to the server or a proxy.
fn script_unsupported(err: &RedisError) -> bool {
    if err.kind() == ErrorKind::NoScriptError || err.code() == Some("NOSCRIPT") {
        return true;
    }
    let message = err.to_string().to_ascii_lowercase();
    message.contains("unknown command") && (message.contains("eval") || message.contains("script"))
}

fn micros(value: i64) -> Duration {
    Duration::from_micros(u64::try_from(value).unwrap_or(0))
}

fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl AdmissionStore for RedisStore {
    async fn eval_admission(
        &self,
        key: &str,
        member: &str,
        policy: RateLimitPolicy,
    ) -> Result<Admission, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.admission.prepare_invoke();
        invocation
            .key(key)
            .arg(window_millis(policy.window))
            .arg(policy.capacity)
            .arg(member);

        let (allowed, value): (i64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;

        match allowed {
            1 => Ok(Admission::Allowed {
                remaining: u32::try_from(value).unwrap_or(0),
            }),
            0 => {
                let oldest_age = (value >= 0).then(|| micros(value));
                Ok(Admission::Denied {
                    retry_after: denial_hint(policy.window, oldest_age),
                })
            }
            other => Err(StoreError::Protocol(format!(
                "unexpected admission flag {}",
                other
            ))),
        }
    }

    async fn insert_and_count(
        &self,
        key: &str,
        member: &str,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        let now = self.server_time().await?;
        let window_ms = window_millis(window);
        let horizon = now - i64::try_from(window.as_micros()).unwrap_or(i64::MAX);

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(horizon)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore();

        let (count, oldest): (u32, Vec<String>) = self.bounded(pipe.query_async(&mut conn)).await?;

        let oldest_age = oldest
            .get(1)
            .and_then(|score| score.parse::<f64>().ok())
            .map(|score| micros(now - score as i64));

        Ok(WindowSnapshot { count, oldest_age })
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .bounded(redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn))
            .await?;
        Ok(())
    }
}
