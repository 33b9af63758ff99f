use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::cache::SharedCache;
use crate::error::{QueueError, Result};

/// Shared cache on a Redis server.
///
/// Lists are pushed with `LPUSH` and popped with `RPOP`, which keeps them
/// FIFO; `RPOP` is atomic on the server, so concurrent workers never receive
/// the same entry.
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(QueueError::redis("connect"))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::redis("connect"))?;
        debug!(%url, "connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("get"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("set"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("delete"))?;
        Ok(())
    }

    async fn set_and_push(&self, key: &str, value: &str, list: &str, item: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("LPUSH")
            .arg(list)
            .arg(item)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("set_and_push"))?;
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("RPOP")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("pop_front"))?;
        Ok(value)
    }

    async fn list(&self, list: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut values: Vec<String> = redis::cmd("LRANGE")
            .arg(list)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::redis("list"))?;
        // LPUSH puts the newest entry at index 0
        values.reverse();
        Ok(values)
    }
}
