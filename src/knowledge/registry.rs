//! 엔진 레지스트리 - 소유자별 엔진 캐시
//!
//! 소유자 ID마다 엔진 하나를 지연 생성하여 공유합니다.
//! 전역 상태 없이 `Arc<EngineRegistry>`로 전달해서 사용합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::generation::GenerationProvider;

use super::engine::{EngineStats, RagEngine};
use super::store::KnowledgeStore;

/// 엔진 레지스트리
pub struct EngineRegistry {
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    store: Option<Arc<KnowledgeStore>>,
    engines: Mutex<HashMap<String, Arc<RagEngine>>>,
}

impl EngineRegistry {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            config,
            embedder,
            generator,
            store: None,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// 새로 만드는 엔진에 영구 저장소 연결
    pub fn with_store(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn engines(&self) -> MutexGuard<'_, HashMap<String, Arc<RagEngine>>> {
        self.engines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 캐시된 엔진 반환, 없으면 생성 후 저장소에서 복원
    pub fn get_or_create(&self, owner_id: &str) -> Result<Arc<RagEngine>> {
        self.get_or_create_with(owner_id, self.config.clone())
    }

    /// 설정을 지정해서 생성 (이미 있으면 기존 엔진과 설정 유지)
    pub fn get_or_create_with(&self, owner_id: &str, config: EngineConfig) -> Result<Arc<RagEngine>> {
        let mut engines = self.engines();
        if let Some(engine) = engines.get(owner_id) {
            return Ok(engine.clone());
        }

        let mut engine = RagEngine::new(
            owner_id,
            config,
            self.embedder.clone(),
            self.generator.clone(),
        )?;
        if let Some(ref store) = self.store {
            engine = engine.with_store(store.clone());
        }
        engine.load_from_database()?;

        let engine = Arc::new(engine);
        engines.insert(owner_id.to_string(), engine.clone());
        tracing::debug!("Created engine for owner {}", owner_id);
        Ok(engine)
    }

    pub fn get(&self, owner_id: &str) -> Option<Arc<RagEngine>> {
        self.engines().get(owner_id).cloned()
    }

    /// 캐시에서 제거 (저장된 데이터는 유지)
    pub fn remove(&self, owner_id: &str) -> bool {
        self.engines().remove(owner_id).is_some()
    }

    pub fn clear(&self) {
        self.engines().clear();
    }

    pub fn len(&self) -> usize {
        self.engines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines().is_empty()
    }

    /// 소유자 ID순 전체 통계
    pub fn stats_for_all(&self) -> BTreeMap<String, EngineStats> {
        let engines: Vec<(String, Arc<RagEngine>)> = self
            .engines()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        engines
            .into_iter()
            .map(|(owner, engine)| (owner, engine.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ChatMessage;
    use crate::knowledge::document::NewDocument;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct UnitEmbedding;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, text.len() as f32 / 100.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "unit"
        }
    }

    struct SilentChat;

    #[async_trait]
    impl GenerationProvider for SilentChat {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> anyhow::Result<String> {
            Ok("{}".to_string())
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    fn registry() -> EngineRegistry {
        EngineRegistry::new(
            EngineConfig::default(),
            Arc::new(UnitEmbedding),
            Arc::new(SilentChat),
        )
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let a = registry.get_or_create("alice").unwrap();
        let b = registry.get_or_create("alice").unwrap();
        let c = registry.get_or_create("bob").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert_eq!(a.knowledge_base_id(), "kb-alice");
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = registry();
        registry.get_or_create("alice").unwrap();
        registry.get_or_create("bob").unwrap();

        assert!(registry.remove("alice"));
        assert!(!registry.remove("alice"));
        assert!(registry.get("alice").is_none());
        assert!(registry.get("bob").is_some());

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_recreated_engine_restores_from_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KnowledgeStore::open(&dir.path().join("kb.db")).unwrap());
        let registry = registry().with_store(store);

        let engine = registry.get_or_create("alice").unwrap();
        engine
            .add_document(NewDocument::new("Note", "Persisted content"))
            .await
            .unwrap();

        registry.remove("alice");
        let restored = registry.get_or_create("alice").unwrap();
        assert!(!Arc::ptr_eq(&engine, &restored));
        assert_eq!(restored.stats().documents, 1);
        assert_eq!(restored.stats().chunks, 1);

        let all = registry.stats_for_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all["alice"].documents, 1);
    }
}
