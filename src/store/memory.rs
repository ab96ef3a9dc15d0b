//! 内存实现：collection -> 文档列表

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::HiveError;
use crate::store::{Document, QueryOp, RecipientStore, ScopedQuery, OWNER_FIELD};

#[derive(Default)]
pub struct InMemoryRecipientStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

/// 字符串忽略大小写比较，其余按 JSON 值相等
fn value_matches(expected: &Value, actual: Option<&Value>) -> bool {
    match (expected, actual) {
        (Value::String(e), Some(Value::String(a))) => e.eq_ignore_ascii_case(a),
        (e, Some(a)) => e == a,
        (_, None) => false,
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| value_matches(v, doc.get(k)))
}

fn matches_query(doc: &Document, query: &ScopedQuery) -> bool {
    matches(doc, query.filter())
        && (query.any_of().is_empty() || query.any_of().iter().any(|alt| matches(doc, alt)))
}

impl InMemoryRecipientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientStore for InMemoryRecipientStore {
    async fn query(&self, query: &ScopedQuery) -> Result<Vec<Document>, HiveError> {
        let limit = query.limit().unwrap_or(usize::MAX);
        match query.op() {
            QueryOp::Read => {
                let collections = self.collections.read().await;
                Ok(collections
                    .get(query.collection())
                    .map(|docs| {
                        docs.iter()
                            .filter(|d| matches_query(d, query))
                            .skip(query.skip())
                            .take(limit)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default())
            }
            QueryOp::Delete => {
                let mut collections = self.collections.write().await;
                let Some(docs) = collections.get_mut(query.collection()) else {
                    return Ok(Vec::new());
                };
                let mut removed = Vec::new();
                let mut kept = Vec::with_capacity(docs.len());
                let mut seen = 0usize;
                for doc in docs.drain(..) {
                    if matches_query(&doc, query) {
                        seen += 1;
                        if seen > query.skip() && removed.len() < limit {
                            removed.push(doc);
                            continue;
                        }
                    }
                    kept.push(doc);
                }
                *docs = kept;
                Ok(removed)
            }
            QueryOp::Update => {
                let mut collections = self.collections.write().await;
                let Some(docs) = collections.get_mut(query.collection()) else {
                    return Ok(Vec::new());
                };
                let mut updated = Vec::new();
                for doc in docs
                    .iter_mut()
                    .filter(|d| matches_query(d, query))
                    .skip(query.skip())
                    .take(limit)
                {
                    doc.extend(query.set().clone());
                    updated.push(doc.clone());
                }
                Ok(updated)
            }
        }
    }

    async fn insert(
        &self,
        collection: &str,
        owner: &str,
        mut document: Document,
    ) -> Result<String, HiveError> {
        let id = uuid::Uuid::new_v4().to_string();
        document.insert("_id".to_string(), Value::String(id.clone()));
        document.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_reads_are_scoped_to_owner() {
        let store = InMemoryRecipientStore::new();
        store
            .insert("customers", "a@x.io", doc(json!({"name": "Ali"})))
            .await
            .unwrap();
        store
            .insert("customers", "b@x.io", doc(json!({"name": "Mona"})))
            .await
            .unwrap();

        let found = store
            .query(&ScopedQuery::read("customers", "a@x.io").unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["name"], "Ali");
    }

    #[tokio::test]
    async fn test_delete_only_touches_owner_documents() {
        let store = InMemoryRecipientStore::new();
        for owner in ["a@x.io", "a@x.io", "b@x.io"] {
            store
                .insert("customers", owner, doc(json!({"city": "Dubai"})))
                .await
                .unwrap();
        }
        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .filter("city", "dubai")
            .delete()
            .build()
            .unwrap();
        assert_eq!(store.query(&q).await.unwrap().len(), 2);

        let remaining = store
            .query(&ScopedQuery::read("customers", "b@x.io").unwrap())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_in_place_and_keeps_id() {
        let store = InMemoryRecipientStore::new();
        let id = store
            .insert("customers", "a@x.io", doc(json!({"name": "Ali", "city": "Dubai"})))
            .await
            .unwrap();
        store
            .insert("customers", "b@x.io", doc(json!({"name": "Ali", "city": "Dubai"})))
            .await
            .unwrap();

        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .filter("name", "ali")
            .update(doc(json!({"city": "Riyadh", "_id": "forged"})))
            .build()
            .unwrap();
        let updated = store.query(&q).await.unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["_id"], id.as_str());

        let mine = store
            .query(&ScopedQuery::read("customers", "a@x.io").unwrap())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0]["_id"], id.as_str());
        assert_eq!(mine[0]["city"], "Riyadh");
        let theirs = store
            .query(&ScopedQuery::read("customers", "b@x.io").unwrap())
            .await
            .unwrap();
        assert_eq!(theirs[0]["city"], "Dubai");
    }

    #[tokio::test]
    async fn test_any_of_matches_one_alternative() {
        let store = InMemoryRecipientStore::new();
        for (name, phone) in [("Ali", "+1"), ("Sara", "+2"), ("Mona", "+3")] {
            store
                .insert("customers", "a@x.io", doc(json!({"name": name, "phone": phone})))
                .await
                .unwrap();
        }
        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .any_of(vec![doc(json!({"name": "ali"})), doc(json!({"phone": "+3"}))])
            .build()
            .unwrap();
        let found = store.query(&q).await.unwrap();
        let names: Vec<&str> = found.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, vec!["Ali", "Mona"]);
    }

    #[tokio::test]
    async fn test_skip_and_limit() {
        let store = InMemoryRecipientStore::new();
        for i in 0..5 {
            store
                .insert("customers", "a@x.io", doc(json!({"n": i})))
                .await
                .unwrap();
        }
        let q = ScopedQuery::builder("customers")
            .owner("a@x.io")
            .skip(1)
            .limit(2)
            .build()
            .unwrap();
        let found = store.query(&q).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0]["n"], 1);
    }
}
