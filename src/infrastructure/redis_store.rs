//! Redis-backed counter store.
//!
//! Lets several application instances share one quota per client.
//!
//! ## Layout
//!
//! - Sliding windows: a sorted set of event timestamps (score = millis),
//!   pruned on every check.
//! - Fixed windows: one integer counter per bucket, keyed by the bucket start.
//! - Every key carries a TTL of the window length plus `key_grace`, so idle
//!   clients cost nothing.
//!
//! All keys of one client share the `{identity}` hash tag, so every key a
//! script touches hashes to the same slot. Braces and `%` in the identity are
//! percent-encoded so a crafted forwarded address cannot end the tag early.
//! The store talks to a single node through `ConnectionManager`; it does not
//! route requests across a cluster.
//!
//! ## Atomicity
//!
//! A check is a single Lua script. Redis runs scripts without interleaving,
//! and the script only writes once every window has admitted, so a check is
//! all-or-nothing across windows and linearizable across instances.
//!
//! ## Example
//!
//! ```rust,ignore
//! use designosaur_quota::{AdmissionController, RedisCounterStore, RedisStoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisStoreConfig {
//!         key_prefix: "designosaur:quota:".to_string(),
//!         ..RedisStoreConfig::default()
//!     };
//!     let store = RedisCounterStore::connect_with_config("redis://127.0.0.1/", config).await?;
//!     let controller = AdmissionController::builder(store).build()?;
//!     Ok(())
//! }
//! ```

use crate::application::ports::{CounterStore, StoreError, StoreOutcome, WindowRequest};
use crate::domain::identity::{ClientIdentity, ScopeKey};
use crate::domain::policy::QuotaPolicy;
use crate::domain::time::{duration_millis, Timestamp};
use crate::domain::window::{QuotaWindow, WindowKind, WindowVerdict};
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, Script};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Stores created so far in this process.
static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Values returned by the script per window, after the overall flag.
const REPLY_PER_WINDOW: usize = 3;

// KEYS[i]: counter key of window i.
// ARGV[1]: now (ms). ARGV[2]: unique member for sliding windows.
// Then per window: kind, limit, duration (ms), ttl (ms).
// Reply: admitted, then per window: admitted, count, reset_at.
const CHECK_AND_RECORD: &str = r"
local now = tonumber(ARGV[1])
local member = ARGV[2]
local n = #KEYS
local counts, resets, admits = {}, {}, {}
local admitted = 1

for i = 1, n do
  local base = 2 + (i - 1) * 4
  local kind = ARGV[base + 1]
  local limit = tonumber(ARGV[base + 2])
  local duration = tonumber(ARGV[base + 3])
  local key = KEYS[i]
  local count, reset
  if kind == 'sliding' then
    redis.call('ZREMRANGEBYSCORE', key, '-inf', now - duration)
    count = redis.call('ZCARD', key)
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    if oldest[2] then
      reset = tonumber(oldest[2]) + duration
    else
      reset = now + duration
    end
  else
    count = tonumber(redis.call('GET', key) or '0')
    reset = now - (now % duration) + duration
  end
  counts[i] = count
  resets[i] = reset
  if count < limit then
    admits[i] = 1
  else
    admits[i] = 0
    admitted = 0
  end
end

if admitted == 1 then
  for i = 1, n do
    local base = 2 + (i - 1) * 4
    local kind = ARGV[base + 1]
    local ttl = tonumber(ARGV[base + 4])
    local key = KEYS[i]
    if kind == 'sliding' then
      redis.call('ZADD', key, now, member)
      redis.call('PEXPIRE', key, ttl)
    else
      redis.call('INCR', key)
      redis.call('PEXPIREAT', key, resets[i] + ttl)
    end
    counts[i] = counts[i] + 1
  end
end

local reply = { admitted }
for i = 1, n do
  reply[#reply + 1] = admits[i]
  reply[#reply + 1] = counts[i]
  reply[#reply + 1] = resets[i]
end
return reply
";

/// Configuration for the Redis counter store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Key prefix (default: "designosaur-quota:")
    pub key_prefix: String,
    /// Extra lifetime of a key past its window, to absorb clock skew
    /// between instances (default: 60 seconds)
    pub key_grace: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "designosaur-quota:".to_string(),
            key_grace: Duration::from_secs(60),
        }
    }
}

/// Counter store shared through Redis.
///
/// Requests for several windows must belong to one client, as the controller
/// guarantees, so that all keys hash to the same Cluster slot.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisStoreConfig,
    /// Distinguishes this instance's sliding-window members from others'.
    instance: u64,
    sequence: AtomicU64,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection, config))
    }

    /// Use an existing connection manager.
    pub fn from_connection(connection: ConnectionManager, config: RedisStoreConfig) -> Self {
        Self {
            connection,
            script: Script::new(CHECK_AND_RECORD),
            config,
            instance: ahash::RandomState::new()
                .hash_one((std::process::id(), INSTANCES.fetch_add(1, Ordering::Relaxed))),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Redis key of the counter behind `key` at `now`.
    fn redis_key(&self, key: &ScopeKey, window: &QuotaWindow, now: Timestamp) -> String {
        counter_key(&self.config.key_prefix, key, window, now)
    }

    fn next_member(&self, now: Timestamp) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}:{:x}:{seq}", now.as_millis(), self.instance)
    }

    /// Delete every counter of `identity` under `policy` that is live at `now`.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if Redis cannot be reached.
    pub async fn forget(
        &self,
        identity: &ClientIdentity,
        policy: &QuotaPolicy,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let keys: Vec<String> = policy
            .windows()
            .iter()
            .map(|window| {
                let key = ScopeKey::new(identity.clone(), policy.shared_name(), window.scope());
                self.redis_key(&key, window, now)
            })
            .collect();
        let mut connection = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

impl CounterStore for RedisCounterStore {
    async fn check_and_record(
        &self,
        requests: &[WindowRequest],
        now: Timestamp,
    ) -> Result<StoreOutcome, StoreError> {
        let grace = duration_millis(self.config.key_grace);
        let mut invocation = self.script.prepare_invoke();
        for request in requests {
            invocation.key(self.redis_key(&request.key, &request.window, now));
        }
        invocation.arg(now.as_millis()).arg(self.next_member(now));
        for request in requests {
            let window = &request.window;
            let duration = duration_millis(window.duration());
            // Fixed keys expire at the bucket end plus the grace.
            let ttl = match window.kind() {
                WindowKind::Sliding => duration.saturating_add(grace),
                WindowKind::Fixed => grace,
            };
            invocation
                .arg(window.kind().as_str())
                .arg(window.limit())
                .arg(duration)
                .arg(ttl);
        }

        let mut connection = self.connection.clone();
        let reply: Vec<i64> = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "redis quota script failed");
                store_error(e)
            })?;
        parse_reply(requests, &reply)
    }
}

fn counter_key(prefix: &str, key: &ScopeKey, window: &QuotaWindow, now: Timestamp) -> String {
    let base = format!(
        "{prefix}{{{}}}:{}:{}",
        hash_tag(key.identity().as_str()),
        key.policy(),
        key.scope()
    );
    match window.kind() {
        WindowKind::Sliding => base,
        WindowKind::Fixed => format!("{base}:{}", window.bucket_start(now).as_millis()),
    }
}

/// Percent-encode the characters that would change where the hash tag ends.
fn hash_tag(identity: &str) -> Cow<'_, str> {
    if !identity.contains(['{', '}', '%']) {
        return Cow::Borrowed(identity);
    }
    let mut encoded = String::with_capacity(identity.len() + 6);
    for c in identity.chars() {
        match c {
            '{' => encoded.push_str("%7B"),
            '}' => encoded.push_str("%7D"),
            '%' => encoded.push_str("%25"),
            c => encoded.push(c),
        }
    }
    Cow::Owned(encoded)
}

fn store_error(error: RedisError) -> StoreError {
    match error.kind() {
        ErrorKind::TypeError => StoreError::Protocol(error.to_string()),
        _ => StoreError::Unavailable(error.to_string()),
    }
}

fn parse_reply(requests: &[WindowRequest], reply: &[i64]) -> Result<StoreOutcome, StoreError> {
    let expected = 1 + requests.len() * REPLY_PER_WINDOW;
    if reply.len() != expected {
        return Err(StoreError::Protocol(format!(
            "expected {expected} values, got {}",
            reply.len()
        )));
    }

    let non_negative = |value: i64| {
        u64::try_from(value).map_err(|_| StoreError::Protocol(format!("negative value {value}")))
    };

    let verdicts = requests
        .iter()
        .zip(reply[1..].chunks_exact(REPLY_PER_WINDOW))
        .map(|(request, values)| {
            let count = u32::try_from(non_negative(values[1])?).unwrap_or(u32::MAX);
            Ok(WindowVerdict {
                scope: request.window.scope(),
                limit: request.window.limit(),
                count,
                reset_at: Timestamp::from_millis(non_negative(values[2])?),
                admitted: values[0] == 1,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(StoreOutcome {
        admitted: reply[0] == 1,
        verdicts,
    })
}
