use super::Cache;
use crate::errors::AppError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const ENQUEUE_UNIQUE: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
  return 0
end
redis.call('SADD', KEYS[1], ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
"#;

const SCAN_BATCH: usize = 200;

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Cache backed by a shared Redis deployment.
///
/// `ConnectionManager` multiplexes one connection and reconnects on failure; each call
/// works on a cheap clone of it.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("✅ Connected to Redis");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.is_some())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(redis::cmd("GET").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut self.conn()).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut self.conn()).await?;
        Ok(count > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, AppError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(COMPARE_AND_DELETE).arg(1).arg(key).arg(expected);
        let deleted: i64 = cmd.query_async(&mut self.conn()).await?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(COMPARE_AND_EXPIRE)
            .arg(1)
            .arg(key)
            .arg(expected)
            .arg(ttl.as_millis().max(1) as u64);
        let renewed: i64 = cmd.query_async(&mut self.conn()).await?;
        Ok(renewed == 1)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, AppError> {
        let added: i64 = redis::cmd("SADD").arg(key).arg(member).query_async(&mut self.conn()).await?;
        Ok(added == 1)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, AppError> {
        let removed: i64 = redis::cmd("SREM").arg(key).arg(member).query_async(&mut self.conn()).await?;
        Ok(removed == 1)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        Ok(redis::cmd("SISMEMBER").arg(key).arg(member).query_async(&mut self.conn()).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        Ok(redis::cmd("SMEMBERS").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn scard(&self, key: &str) -> Result<u64, AppError> {
        Ok(redis::cmd("SCARD").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>, AppError> {
        Ok(redis::cmd("RPOPLPUSH")
            .arg(source)
            .arg(destination)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<bool, AppError> {
        let removed: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(1)
            .arg(value)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed > 0)
    }

    async fn llen(&self, key: &str) -> Result<u64, AppError> {
        Ok(redis::cmd("LLEN").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), AppError> {
        redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), AppError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<_, ()>(&mut self.conn()).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
        Ok(redis::cmd("HGETALL").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn enqueue_unique(&self, set: &str, list: &str, member: &str, payload: &str) -> Result<bool, AppError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(ENQUEUE_UNIQUE)
            .arg(2)
            .arg(set)
            .arg(list)
            .arg(member)
            .arg(payload);
        let pushed: i64 = cmd.query_async(&mut self.conn()).await?;
        Ok(pushed == 1)
    }
}
