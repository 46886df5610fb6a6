//! Cache abstraction over the Redis primitives the scheduler relies on.
//!
//! The cache is an accelerator and lock service only. Anything that must survive a
//! restart lives in the job store.

mod memory;
mod redis_cache;
pub mod keys;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use crate::errors::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait Cache: Send + Sync {
    /// SET key value NX EX ttl. Returns true when the key was created.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn delete(&self, key: &str) -> Result<bool, AppError>;
    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    /// Delete `key` only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, AppError>;
    /// Reset the TTL of `key` only while it still holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Returns true when the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, AppError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, AppError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError>;
    async fn scard(&self, key: &str) -> Result<u64, AppError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError>;
    /// Pop the tail of `source` and push it onto the head of `destination` atomically.
    async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>, AppError>;
    /// Remove the first occurrence of `value`.
    async fn lrem(&self, key: &str, value: &str) -> Result<bool, AppError>;
    async fn llen(&self, key: &str) -> Result<u64, AppError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), AppError>;

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), AppError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AppError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    /// Add `member` to `set` and push `payload` onto `list` in one step, unless the
    /// member is already in the set. Returns false when nothing was enqueued.
    async fn enqueue_unique(&self, set: &str, list: &str, member: &str, payload: &str) -> Result<bool, AppError>;
}

/// Resolve a Redis-style inclusive `[start, stop]` range against a length.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
