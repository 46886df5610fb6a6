use super::{resolve_range, Cache};
use crate::errors::AppError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Cache(format!("WRONGTYPE operation against key {}", key))
}

/// In-process cache for single-node runs and tests.
///
/// All keys sit behind one mutex, so multi-key operations are atomic the same way a
/// Lua script is on Redis. Expiry is evaluated lazily on access.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        f(&mut entries)
    }
}

fn set_of<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut HashSet<String>, AppError> {
    let entry = entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
    match &mut entry.value {
        Value::Set(set) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

fn list_of<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut VecDeque<String>, AppError> {
    let entry = entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
    match &mut entry.value {
        Value::List(list) => Ok(list),
        _ => Err(wrong_type(key)),
    }
}

// Redis drops collections once they become empty.
fn drop_if_empty(entries: &mut HashMap<String, Entry>, key: &str) {
    let empty = match entries.get(key).map(|e| &e.value) {
        Some(Value::Set(set)) => set.is_empty(),
        Some(Value::List(list)) => list.is_empty(),
        Some(Value::Hash(hash)) => hash.is_empty(),
        _ => false,
    };
    if empty {
        entries.remove(key);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.with_entries(|entries| entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.with_entries(|entries| entries.contains_key(key)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, AppError> {
        Ok(self.with_entries(|entries| {
            let matches = matches!(entries.get(key).map(|e| &e.value), Some(Value::Str(v)) if v == expected);
            if matches {
                entries.remove(key);
            }
            matches
        }))
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, AppError> {
        Ok(self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, Value::Str(v) if v == expected) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| Ok(set_of(entries, key)?.insert(member.to_string())))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| {
            let removed = match entries.get_mut(key).map(|e| &mut e.value) {
                None => false,
                Some(Value::Set(set)) => set.remove(member),
                Some(_) => return Err(wrong_type(key)),
            };
            drop_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn scard(&self, key: &str) -> Result<u64, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.with_entries(|entries| {
            list_of(entries, key)?.push_front(value.to_string());
            Ok(())
        })
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>, AppError> {
        self.with_entries(|entries| {
            let popped = match entries.get_mut(source).map(|e| &mut e.value) {
                None => return Ok(None),
                Some(Value::List(list)) => list.pop_back(),
                Some(_) => return Err(wrong_type(source)),
            };
            drop_if_empty(entries, source);
            if let Some(value) = &popped {
                list_of(entries, destination)?.push_front(value.clone());
            }
            Ok(popped)
        })
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| {
            let removed = match entries.get_mut(key).map(|e| &mut e.value) {
                None => false,
                Some(Value::List(list)) => match list.iter().position(|v| v == value) {
                    Some(idx) => list.remove(idx).is_some(),
                    None => false,
                },
                Some(_) => return Err(wrong_type(key)),
            };
            drop_if_empty(entries, key);
            Ok(removed)
        })
    }

    async fn llen(&self, key: &str) -> Result<u64, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.iter().skip(from).take(to - from + 1).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), AppError> {
        self.with_entries(|entries| {
            match entries.get_mut(key).map(|e| &mut e.value) {
                None => return Ok(()),
                Some(Value::List(list)) => {
                    *list = match resolve_range(list.len(), start, stop) {
                        Some((from, to)) => list.iter().skip(from).take(to - from + 1).cloned().collect(),
                        None => VecDeque::new(),
                    };
                }
                Some(_) => return Err(wrong_type(key)),
            }
            drop_if_empty(entries, key);
            Ok(())
        })
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), AppError> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            match &mut entry.value {
                Value::Hash(hash) => {
                    for (field, value) in fields {
                        hash.insert(field.clone(), value.clone());
                    }
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        Ok(self.with_entries(|entries| {
            entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect()
        }))
    }

    async fn enqueue_unique(&self, set: &str, list: &str, member: &str, payload: &str) -> Result<bool, AppError> {
        self.with_entries(|entries| {
            if !set_of(entries, set)?.insert(member.to_string()) {
                return Ok(false);
            }
            list_of(entries, list)?.push_front(payload.to_string());
            Ok(true)
        })
    }
}
