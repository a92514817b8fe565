//! Redis adapters for the counter store and the crisis channel.

use crate::counter::{CounterError, CounterStore};
use crate::crisis::CrisisBroadcaster;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client as RedisClient;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CounterError::Timeout
        } else {
            CounterError::Unavailable(err.to_string())
        }
    }
}

/// Counter store shared across service instances through Redis
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
}

impl RedisCounterStore {
    pub async fn connect(client: &RedisClient) -> Result<Self, CounterError> {
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, delta: f64) -> Result<f64, CounterError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .query_async::<_, f64>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<f64>, CounterError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<f64>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: f64,
        ttl: Duration,
    ) -> Result<f64, CounterError> {
        let mut conn = self.conn.clone();
        let (value,): (f64,) = redis::pipe()
            .atomic()
            .cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }
}

/// Relay every crisis event to Redis `PUBLISH` on the broadcaster's topic.
///
/// Best effort: a failed publish is logged and the connection is re-opened
/// for the next event.
pub fn spawn_crisis_relay(broadcaster: &CrisisBroadcaster, client: RedisClient) -> JoinHandle<()> {
    let mut rx = broadcaster.subscribe();
    let topic = broadcaster.topic().to_string();

    tokio::spawn(async move {
        let mut conn: Option<MultiplexedConnection> = None;
        info!(topic = %topic, "Crisis relay started");

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Crisis relay lagged behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let body = match serde_json::to_string(&event) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Failed to encode crisis event");
                    continue;
                }
            };

            if conn.is_none() {
                match client.get_multiplexed_tokio_connection().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        warn!(error = %e, "Crisis relay cannot reach Redis");
                        continue;
                    }
                }
            }

            if let Some(c) = conn.as_mut() {
                let published: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                    .arg(&topic)
                    .arg(body)
                    .query_async(c)
                    .await;
                if let Err(e) = published {
                    warn!(error = %e, "Crisis relay publish failed");
                    conn = None;
                }
            }
        }

        info!(topic = %topic, "Crisis relay stopped");
    })
}
