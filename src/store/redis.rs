//! Redis-backed store
//!
//! Registry change propagation relies on keyspace event notifications for
//! set commands, e.g. `CONFIG SET notify-keyspace-events Es`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};

use super::{FrameStore, QueueKeys, SetEvent, StreamStore};
use crate::error::Result;

// KEYS: list, lease, dropped counter. ARGV: payload, lease ttl (ms), capacity.
const PUSH_SCRIPT: &str = r"
local len = redis.call('RPUSH', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], '1', 'PX', ARGV[2])
local cap = tonumber(ARGV[3])
local dropped = 0
if len > cap then
    redis.call('LTRIM', KEYS[1], -cap, -1)
    dropped = len - cap
    redis.call('INCRBY', KEYS[3], dropped)
end
return dropped
";

/// Store implementation over a Redis server
///
/// Commands share one multiplexed connection; every pub/sub subscription
/// opens its own dedicated connection, closed when its stream is dropped.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    push_script: Script,
    db: i64,
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let db = client.get_connection_info().redis.db;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::info!(url = url, db = db, "Connected to redis");

        Ok(Self {
            client,
            conn,
            push_script: Script::new(PUSH_SCRIPT),
            db,
        })
    }

    fn keyevent_pattern(&self) -> String {
        format!("__keyevent@{}__:*", self.db)
    }
}

/// Map a keyevent channel + payload to a set event for `set`
fn parse_keyevent(channel: &str, key: &str, set: &str) -> Option<SetEvent> {
    if key != set {
        return None;
    }
    match channel.rsplit(':').next() {
        Some("sadd") => Some(SetEvent::Added),
        Some("srem") => Some(SetEvent::Removed),
        _ => None,
    }
}

#[async_trait]
impl FrameStore for RedisStore {
    async fn push(
        &self,
        keys: &QueueKeys,
        lease: &str,
        payload: Bytes,
        lease_ttl: Duration,
        capacity: usize,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let dropped: u64 = self
            .push_script
            .key(&keys.list)
            .key(lease)
            .key(&keys.dropped)
            .arg(payload.as_ref())
            .arg(lease_ttl.as_millis() as u64)
            .arg(capacity)
            .invoke_async(&mut conn)
            .await?;
        Ok(dropped)
    }

    async fn pop(&self, keys: &QueueKeys) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let entry: Option<Vec<u8>> = conn.lpop(&keys.list, None).await?;
        Ok(entry.map(Bytes::from))
    }

    async fn len(&self, keys: &QueueKeys) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&keys.list).await?)
    }

    async fn take_dropped(&self, keys: &QueueKeys) -> Result<u64> {
        let mut conn = self.conn.clone();
        let previous: Option<u64> = conn.getset(&keys.dropped, 0u64).await?;
        Ok(previous.unwrap_or(0))
    }

    async fn is_expired(&self, lease: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(lease).await?;
        Ok(!exists)
    }
}

#[async_trait]
impl StreamStore for RedisStore {
    async fn add(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(set, member).await?;
        Ok(added > 0)
    }

    async fn remove(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(set, member).await?;
        Ok(removed > 0)
    }

    async fn members(&self, set: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(set).await?)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload.as_ref()).await?;
        Ok(())
    }

    async fn watch(&self, set: &str) -> Result<BoxStream<'static, SetEvent>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(self.keyevent_pattern()).await?;

        let set = set.to_string();
        let events = pubsub.into_on_message().filter_map(move |msg| {
            let event = match msg.get_payload::<String>() {
                Ok(key) => parse_keyevent(msg.get_channel_name(), &key, &set),
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable keyevent payload");
                    None
                }
            };
            futures_util::future::ready(event)
        });

        Ok(events.boxed())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let frames = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));

        Ok(frames.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keyevent_add_remove() {
        assert_eq!(
            parse_keyevent("__keyevent@0__:sadd", "streams", "streams"),
            Some(SetEvent::Added)
        );
        assert_eq!(
            parse_keyevent("__keyevent@0__:srem", "streams", "streams"),
            Some(SetEvent::Removed)
        );
    }

    #[test]
    fn test_parse_keyevent_ignores_other_keys_and_commands() {
        assert_eq!(parse_keyevent("__keyevent@0__:sadd", "other", "streams"), None);
        assert_eq!(parse_keyevent("__keyevent@0__:expired", "streams", "streams"), None);
        assert_eq!(parse_keyevent("__keyevent@0__:rpush", "queue_face", "streams"), None);
    }
}
