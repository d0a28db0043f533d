// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed store session.
//!
//! Commands run over a [`ConnectionManager`], which multiplexes one
//! reconnecting connection across tasks. Pub/sub needs a dedicated
//! connection, so `subscribe` opens one per subscription and ties its
//! lifetime to the returned stream.

use crate::conn::{MessageStream, ScoreOrder, StoreConn};
use crate::error::StoreError;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;

/// Store session over a Redis server.
///
/// `connect` establishes and verifies the connection; operations invoked
/// after `disconnect` (or on a store that never connected) fail with
/// [`StoreError::NotConnected`].
pub struct RedisStore {
    client: ::redis::Client,
    manager: Mutex<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Connect to the store and verify the session with a ping.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client.clone()).await?;
        let _: String = ::redis::cmd("PING").query_async(&mut manager).await?;
        tracing::info!(url, "connected to store");
        Ok(Self { client, manager: Mutex::new(Some(manager)) })
    }

    /// Drop the command connection. Subsequent operations fail with
    /// `NotConnected`; existing subscription streams are unaffected.
    pub fn disconnect(&self) {
        *self.manager.lock() = None;
        tracing::info!("disconnected from store");
    }

    pub fn is_connected(&self) -> bool {
        self.manager.lock().is_some()
    }

    fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.manager.lock().clone().ok_or(StoreError::NotConnected)
    }
}

#[async_trait]
impl StoreConn for RedisStore {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.rpop(key, None).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.llen(key).await?)
    }

    async fn lrem(&self, key: &str, count: usize, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.lrem(key, count as isize, value).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.srem(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.smembers(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.zrem(key, member).await?)
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: ScoreOrder,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        let members = match order {
            ScoreOrder::Ascending => conn.zrange(key, start, stop).await?,
            ScoreOrder::Descending => conn.zrevrange(key, start, stop).await?,
        };
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.zcard(key).await?)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.hgetall(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let _: usize = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::NotConnected);
        }
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Box::pin(stream))
    }
}
