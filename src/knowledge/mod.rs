//! 知识检索：按用户命名空间隔离，检索时合并用户命名空间与共享的 system 命名空间
//!
//! 配置了嵌入模型时用余弦相似度排序，否则按关键词重叠（Jaccard）排序，结果总数不超过 k。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::HiveError;
use crate::llm::{cosine_similarity, EmbeddingProvider};

/// 所有用户共享的命名空间
pub const SYSTEM_NAMESPACE: &str = "system";

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// 返回拼接后的文本；无命中时为空字符串
    async fn retrieve(&self, query: &str, namespace: &str, k: usize) -> Result<String, HiveError>;
}

#[derive(Debug, Clone)]
struct Chunk {
    text: String,
    tokens: HashSet<String>,
    embedding: Option<Vec<f32>>,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn keyword_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    inter / union
}

/// 内存知识库
#[derive(Default)]
pub struct InMemoryKnowledge {
    namespaces: RwLock<HashMap<String, Vec<Chunk>>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 写入一段文本；嵌入失败时退化为仅关键词检索
    pub async fn add(&self, namespace: &str, text: impl Into<String>) {
        let text = text.into();
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&text).await {
                Ok(v) if !v.is_empty() => Some(v),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("embedding failed, keyword-only for this chunk: {}", e);
                    None
                }
            },
            None => None,
        };
        let chunk = Chunk {
            tokens: tokenize(&text),
            text,
            embedding,
        };
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(chunk);
    }

    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledge {
    async fn retrieve(&self, query: &str, namespace: &str, k: usize) -> Result<String, HiveError> {
        if k == 0 {
            return Ok(String::new());
        }
        let query_embedding = match &self.embedder {
            Some(embedder) => embedder.embed(query).await.ok().filter(|v| !v.is_empty()),
            None => None,
        };
        let query_tokens = tokenize(query);

        let namespaces = self.namespaces.read().await;
        let mut scored: Vec<(f32, &str)> = [namespace, SYSTEM_NAMESPACE]
            .iter()
            .enumerate()
            .filter(|(i, ns)| *i == 0 || **ns != namespace)
            .filter_map(|(_, ns)| namespaces.get(*ns))
            .flatten()
            .map(|chunk| {
                let score = match (&query_embedding, &chunk.embedding) {
                    (Some(q), Some(c)) => cosine_similarity(q, c),
                    _ => keyword_overlap(&query_tokens, &chunk.tokens),
                };
                (score, chunk.text.as_str())
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[tokio::test]
    async fn test_merges_user_and_system_namespaces() {
        let kb = InMemoryKnowledge::new();
        kb.add("a@x.io", "Our brand voice is warm and playful").await;
        kb.add(SYSTEM_NAMESPACE, "Campaign emails must include an unsubscribe link").await;
        kb.add("b@x.io", "Brand voice: strictly formal campaign emails").await;

        let text = kb.retrieve("campaign emails brand voice", "a@x.io", 5).await.unwrap();
        assert!(text.contains("warm and playful"));
        assert!(text.contains("unsubscribe"));
        assert!(!text.contains("strictly formal"));
    }

    #[tokio::test]
    async fn test_caps_results_at_k() {
        let kb = InMemoryKnowledge::new();
        for i in 0..6 {
            kb.add(SYSTEM_NAMESPACE, format!("pricing tier {} details", i)).await;
        }
        let text = kb.retrieve("pricing tier", "a@x.io", 2).await.unwrap();
        assert_eq!(text.split("\n\n").count(), 2);
        assert_eq!(kb.retrieve("pricing", "a@x.io", 0).await.unwrap(), "");
    }

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(if text.contains("refund") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }
    }

    #[tokio::test]
    async fn test_embeddings_rank_by_similarity() {
        let kb = InMemoryKnowledge::new().with_embedder(Arc::new(AxisEmbedder));
        kb.add(SYSTEM_NAMESPACE, "Shipping takes three days").await;
        kb.add(SYSTEM_NAMESPACE, "A refund is issued within a week").await;
        let text = kb.retrieve("how do refunds work? refund", "u", 1).await.unwrap();
        assert_eq!(text, "A refund is issued within a week");
    }
}
