//! 客户数据存储（RecipientStore）
//!
//! 委派出去的查询 / 删除必须带所属用户过滤条件：ScopedQuery 只能通过 builder 构造，
//! 缺少 owner 时在构造阶段即返回 ScopeViolation；ScopedRecipientStore 在转发前再校验一次，
//! 任何缺少作用域的请求都不会到达底层存储。更新同样是一次带作用域的查询，由存储在一次写锁内原地完成。

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::HiveError;

pub use memory::InMemoryRecipientStore;

/// 文档即 JSON 对象
pub type Document = Map<String, Value>;

/// 所属用户字段名
pub const OWNER_FIELD: &str = "user_email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOp {
    Read,
    Delete,
    Update,
}

/// 带所属用户作用域的查询（字段私有，只能经 builder 构造）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedQuery {
    collection: String,
    owner: String,
    filter: Document,
    /// 备选条件，命中任一即可（为空表示不限制）
    any_of: Vec<Document>,
    /// Update 时写入的字段
    set: Document,
    limit: Option<usize>,
    skip: usize,
    op: QueryOp,
}

impl ScopedQuery {
    pub fn builder(collection: impl Into<String>) -> ScopedQueryBuilder {
        ScopedQueryBuilder {
            collection: collection.into(),
            owner: None,
            filter: Document::new(),
            any_of: Vec::new(),
            set: Document::new(),
            limit: None,
            skip: 0,
            op: QueryOp::Read,
        }
    }

    pub fn read(collection: &str, owner: &str) -> Result<Self, HiveError> {
        Self::builder(collection).owner(owner).build()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 含 owner 条件的完整过滤器
    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn any_of(&self) -> &[Document] {
        &self.any_of
    }

    pub fn set(&self) -> &Document {
        &self.set
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn op(&self) -> QueryOp {
        self.op
    }

    /// 过滤器中的 owner 条件必须存在且与 owner 一致
    pub fn validate(&self) -> Result<(), HiveError> {
        if self.owner.trim().is_empty() {
            return Err(HiveError::ScopeViolation(format!(
                "{:?} on '{}' without owner",
                self.op, self.collection
            )));
        }
        match self.filter.get(OWNER_FIELD).and_then(Value::as_str) {
            Some(owner) if owner == self.owner => Ok(()),
            _ => Err(HiveError::ScopeViolation(format!(
                "{:?} on '{}' has no matching owner filter",
                self.op, self.collection
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScopedQueryBuilder {
    collection: String,
    owner: Option<String>,
    filter: Document,
    any_of: Vec<Document>,
    set: Document,
    limit: Option<usize>,
    skip: usize,
    op: QueryOp,
}

impl ScopedQueryBuilder {
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn filters(mut self, filter: Document) -> Self {
        self.filter.extend(filter);
        self
    }

    pub fn any_of(mut self, alternatives: Vec<Document>) -> Self {
        self.any_of.extend(alternatives);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn delete(mut self) -> Self {
        self.op = QueryOp::Delete;
        self
    }

    /// 把匹配文档的字段原地合并为 `fields`
    pub fn update(mut self, fields: Document) -> Self {
        self.op = QueryOp::Update;
        self.set = fields;
        self
    }

    /// 缺少 owner，或过滤器 / 备选条件 / 更新字段试图指定另一个用户时返回 ScopeViolation
    pub fn build(self) -> Result<ScopedQuery, HiveError> {
        let owner = self
            .owner
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                HiveError::ScopeViolation(format!(
                    "{:?} on '{}' without owner",
                    self.op, self.collection
                ))
            })?;

        let mut filter = self.filter;
        if let Some(existing) = filter.get(OWNER_FIELD) {
            if existing.as_str() != Some(owner.as_str()) {
                return Err(HiveError::ScopeViolation(format!(
                    "filter on '{}' targets another owner",
                    self.collection
                )));
            }
        }
        filter.insert(OWNER_FIELD.to_string(), Value::String(owner.clone()));

        if self.any_of.iter().any(|alt| alt.contains_key(OWNER_FIELD)) {
            return Err(HiveError::ScopeViolation(format!(
                "alternative filter on '{}' names an owner",
                self.collection
            )));
        }
        let mut set = self.set;
        if set.contains_key(OWNER_FIELD) {
            return Err(HiveError::ScopeViolation(format!(
                "update on '{}' would reassign the owner",
                self.collection
            )));
        }
        set.remove("_id");

        Ok(ScopedQuery {
            collection: self.collection,
            owner,
            filter,
            any_of: self.any_of,
            set,
            limit: self.limit,
            skip: self.skip,
            op: self.op,
        })
    }
}

/// 数据存储接口
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Read 返回匹配文档；Delete 删除并返回被删除的文档；Update 原地合并并返回更新后的文档
    async fn query(&self, query: &ScopedQuery) -> Result<Vec<Document>, HiveError>;

    /// 写入一条文档（自动附加 owner），返回文档 id
    async fn insert(&self, collection: &str, owner: &str, document: Document)
        -> Result<String, HiveError>;
}

#[async_trait]
impl<S: RecipientStore + ?Sized> RecipientStore for Arc<S> {
    async fn query(&self, query: &ScopedQuery) -> Result<Vec<Document>, HiveError> {
        (**self).query(query).await
    }

    async fn insert(
        &self,
        collection: &str,
        owner: &str,
        document: Document,
    ) -> Result<String, HiveError> {
        (**self).insert(collection, owner, document).await
    }
}

/// 作用域守卫：转发前校验 owner
pub struct ScopedRecipientStore<S> {
    inner: S,
}

impl<S: RecipientStore> ScopedRecipientStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: RecipientStore> RecipientStore for ScopedRecipientStore<S> {
    async fn query(&self, query: &ScopedQuery) -> Result<Vec<Document>, HiveError> {
        if let Err(e) = query.validate() {
            tracing::warn!("rejected unscoped query: {}", e);
            return Err(e);
        }
        self.inner.query(query).await
    }

    async fn insert(
        &self,
        collection: &str,
        owner: &str,
        document: Document,
    ) -> Result<String, HiveError> {
        if owner.trim().is_empty() {
            return Err(HiveError::ScopeViolation(format!(
                "insert into '{}' without owner",
                collection
            )));
        }
        if let Some(existing) = document.get(OWNER_FIELD) {
            if existing.as_str() != Some(owner) {
                return Err(HiveError::ScopeViolation(format!(
                    "insert into '{}' for another owner",
                    collection
                )));
            }
        }
        self.inner.insert(collection, owner, document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 只计数、不返回数据的存储
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecipientStore for CountingStore {
        async fn query(&self, _query: &ScopedQuery) -> Result<Vec<Document>, HiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn insert(&self, _: &str, _: &str, _: Document) -> Result<String, HiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("id".into())
        }
    }

    #[test]
    fn test_bulk_delete_without_owner_is_rejected() {
        let result = ScopedQuery::builder("customers").delete().build();
        assert!(matches!(result, Err(HiveError::ScopeViolation(_))));

        let result = ScopedQuery::builder("customers").owner("   ").delete().build();
        assert!(matches!(result, Err(HiveError::ScopeViolation(_))));
    }

    #[test]
    fn test_cross_owner_filter_is_rejected() {
        let result = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .filter(OWNER_FIELD, "b@x.io")
            .build();
        assert!(matches!(result, Err(HiveError::ScopeViolation(_))));
    }

    #[test]
    fn test_owner_filter_is_attached() {
        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .filter("city", "Dubai")
            .limit(5)
            .build()
            .unwrap();
        assert_eq!(q.filter()[OWNER_FIELD], "a@x.io");
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_update_cannot_reassign_owner() {
        let mut fields = Document::new();
        fields.insert(OWNER_FIELD.into(), Value::String("b@x.io".into()));
        let result = ScopedQuery::builder("customers").owner("a@x.io").update(fields).build();
        assert!(matches!(result, Err(HiveError::ScopeViolation(_))));

        let mut alt = Document::new();
        alt.insert(OWNER_FIELD.into(), Value::String("b@x.io".into()));
        let result = ScopedQuery::builder("customers").owner("a@x.io").any_of(vec![alt]).build();
        assert!(matches!(result, Err(HiveError::ScopeViolation(_))));
    }

    #[tokio::test]
    async fn test_guard_forwards_only_scoped_requests() {
        let store = ScopedRecipientStore::new(CountingStore::default());
        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .delete()
            .build()
            .unwrap();
        store.query(&q).await.unwrap();
        assert!(store.insert("customers", "", Document::new()).await.is_err());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }
}
