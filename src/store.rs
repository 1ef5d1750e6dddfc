use async_trait::async_trait;
use dashmap::DashMap;
use redis::Client;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// 带版本号的文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub key: String,
    pub version: u64,
    pub doc: String,
}

impl Versioned {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_str(&self.doc).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// 写入前置条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// 文档必须不存在
    Absent,
    /// 文档当前版本必须等于给定值
    Version(u64),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, doc: String, expect: Expect },
    Delete { key: String, expect: Expect },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }

    pub fn expect(&self) -> Expect {
        match self {
            WriteOp::Put { expect, .. } | WriteOp::Delete { expect, .. } => *expect,
        }
    }
}

/// 一组要么全部生效、要么全部不生效的写操作
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<String>, doc: String, expect: Expect) -> Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            doc,
            expect,
        });
        self
    }

    pub fn put_json<T: Serialize>(
        self,
        key: impl Into<String>,
        value: &T,
        expect: Expect,
    ) -> Result<Self, StoreError> {
        let doc =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self.put(key, doc, expect))
    }

    pub fn delete(mut self, key: impl Into<String>, expect: Expect) -> Self {
        self.ops.push(WriteOp::Delete {
            key: key.into(),
            expect,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("版本冲突: {0}")]
    Conflict(String),
    #[error("存储后端错误: {0}")]
    Backend(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
}

impl From<StoreError> for crate::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(key) => crate::Error::Conflict(key),
            other => crate::Error::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// 文档存储：按键读取、原子批量条件写入、订阅变更
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// 原子提交；任一前置条件不满足时整批不生效并返回 `Conflict`
    ///
    /// 返回每个 `Put` 写入后的文档（按批内顺序）。
    async fn commit(&self, batch: WriteBatch) -> Result<Vec<Versioned>, StoreError>;

    /// 订阅某个键之后的每次写入
    fn subscribe(&self, key: &str) -> broadcast::Receiver<Versioned>;
}

/// 读取并反序列化，同时返回版本号
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<(T, u64)>, StoreError> {
    match store.get(key).await? {
        Some(versioned) => Ok(Some((versioned.decode()?, versioned.version))),
        None => Ok(None),
    }
}

/// 本进程内的订阅者表，两种后端共用
#[derive(Default)]
struct Subscribers {
    channels: DashMap<String, broadcast::Sender<Versioned>>,
}

impl Subscribers {
    fn subscribe(&self, key: &str) -> broadcast::Receiver<Versioned> {
        self.channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, written: &[Versioned]) {
        for doc in written {
            let Some(sender) = self.channels.get(&doc.key) else {
                continue;
            };
            if sender.send(doc.clone()).is_err() {
                // 已经没有接收者
                drop(sender);
                self.channels.remove(&doc.key);
            }
        }
    }
}

/// 内存存储，用于测试和单机部署
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, (u64, String)>>,
    subscribers: Subscribers,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_expect(key: &str, expect: Expect, current: Option<u64>) -> Result<(), StoreError> {
    let ok = match (expect, current) {
        (Expect::Any, _) => true,
        (Expect::Absent, None) => true,
        (Expect::Version(want), Some(have)) => want == have,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::Conflict(key.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(key).map(|(version, doc)| Versioned {
            key: key.to_string(),
            version: *version,
            doc: doc.clone(),
        }))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Vec<Versioned>, StoreError> {
        let written = {
            let mut docs = self.docs.lock().await;
            for op in batch.ops() {
                let current = docs.get(op.key()).map(|(v, _)| *v);
                check_expect(op.key(), op.expect(), current)?;
            }

            let mut written = Vec::new();
            for op in batch.ops {
                match op {
                    WriteOp::Put { key, doc, .. } => {
                        let version = docs.get(&key).map(|(v, _)| v + 1).unwrap_or(1);
                        docs.insert(key.clone(), (version, doc.clone()));
                        written.push(Versioned { key, version, doc });
                    }
                    WriteOp::Delete { key, .. } => {
                        docs.remove(&key);
                    }
                }
            }
            written
        };

        self.subscribers.publish(&written);
        Ok(written)
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<Versioned> {
        self.subscribers.subscribe(key)
    }
}

/// 在一次脚本调用内检查全部前置条件后再写入，保证整批原子
///
/// 每个键占用 ARGV 中的四项：操作、前置条件、期望版本、文档。
/// 冲突时返回 `{-1, 键下标}`，成功时返回各键写入后的版本（删除为 0）。
const COMMIT_SCRIPT: &str = r#"
for i = 1, #KEYS do
  local base = (i - 1) * 4
  local expect = ARGV[base + 2]
  local current = redis.call('HGET', KEYS[i], 'v')
  if expect == 'absent' and current then
    return {-1, i}
  end
  if expect == 'version' and ((not current) or tonumber(current) ~= tonumber(ARGV[base + 3])) then
    return {-1, i}
  end
end
local versions = {}
for i = 1, #KEYS do
  local base = (i - 1) * 4
  if ARGV[base + 1] == 'put' then
    versions[i] = redis.call('HINCRBY', KEYS[i], 'v', 1)
    redis.call('HSET', KEYS[i], 'doc', ARGV[base + 4])
  else
    redis.call('DEL', KEYS[i])
    versions[i] = 0
  end
end
return versions
"#;

/// Redis 存储；每个文档是一个哈希 `{v, doc}`
///
/// 订阅只覆盖本进程内的写入。
#[derive(Clone)]
pub struct RedisStore {
    manager: Arc<Mutex<ConnectionManager>>,
    script: Arc<redis::Script>,
    prefix: String,
    subscribers: Arc<Subscribers>,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        debug!("已连接 Redis: {}", redis_url);
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
            script: Arc::new(redis::Script::new(COMMIT_SCRIPT)),
            prefix: "word_mines:".to_string(),
            subscribers: Arc::new(Subscribers::default()),
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let mut conn = self.manager.lock().await;
        let (version, doc): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(self.redis_key(key))
            .arg("v")
            .arg("doc")
            .query_async(&mut *conn)
            .await?;

        Ok(match (version, doc) {
            (Some(version), Some(doc)) => Some(Versioned {
                key: key.to_string(),
                version,
                doc,
            }),
            _ => None,
        })
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Vec<Versioned>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.script.prepare_invoke();
        for op in batch.ops() {
            invocation.key(self.redis_key(op.key()));
            let (kind, doc) = match op {
                WriteOp::Put { doc, .. } => ("put", doc.as_str()),
                WriteOp::Delete { .. } => ("del", ""),
            };
            let (expect, version) = match op.expect() {
                Expect::Absent => ("absent", 0),
                Expect::Version(v) => ("version", v),
                Expect::Any => ("any", 0),
            };
            invocation.arg(kind).arg(expect).arg(version).arg(doc);
        }

        let result: Vec<i64> = {
            let mut conn = self.manager.lock().await;
            invocation.invoke_async(&mut *conn).await?
        };

        if result.first() == Some(&-1) {
            let index = result.get(1).copied().unwrap_or(1).max(1) as usize - 1;
            let key = batch
                .ops()
                .get(index)
                .map(|op| op.key().to_string())
                .unwrap_or_default();
            warn!("Redis 提交冲突: {}", key);
            return Err(StoreError::Conflict(key));
        }

        let written: Vec<Versioned> = batch
            .ops
            .into_iter()
            .zip(result)
            .filter_map(|(op, version)| match op {
                WriteOp::Put { key, doc, .. } => Some(Versioned {
                    key,
                    version: version as u64,
                    doc,
                }),
                WriteOp::Delete { .. } => None,
            })
            .collect();

        self.subscribers.publish(&written);
        Ok(written)
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<Versioned> {
        self.subscribers.subscribe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn versions_start_at_one_and_increase() {
        let store = MemoryStore::new();
        let written = store
            .commit(WriteBatch::new().put("a", "1".into(), Expect::Absent))
            .await
            .unwrap();
        assert_eq!(written[0].version, 1);

        store
            .commit(WriteBatch::new().put("a", "2".into(), Expect::Version(1)))
            .await
            .unwrap();
        let doc = store.get("a").await.unwrap().unwrap();
        assert_eq!((doc.version, doc.doc.as_str()), (2, "2"));
    }

    #[tokio::test]
    async fn failed_precondition_leaves_batch_unapplied() {
        let store = MemoryStore::new();
        store
            .commit(WriteBatch::new().put("a", "1".into(), Expect::Absent))
            .await
            .unwrap();

        let batch = WriteBatch::new()
            .put("b", "new".into(), Expect::Absent)
            .put("a", "stale".into(), Expect::Version(7));
        let err = store.commit(batch).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict("a".to_string()));
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.get("a").await.unwrap().unwrap().doc, "1");
    }

    #[tokio::test]
    async fn subscribers_see_each_write() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("k");
        store
            .commit(WriteBatch::new().put("k", "x".into(), Expect::Any))
            .await
            .unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.version, 1);
        assert_eq!(seen.doc, "x");
    }
}
