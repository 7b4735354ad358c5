//! Knowledge Graph - 엔티티/관계 인덱스
//!
//! 엔티티와 관계를 ID 맵에 보관하고, 이름/타입/방향별 보조 인덱스를
//! 삽입 시 갱신합니다 (가져오기 시 재구축).
//!
//! - 이웃 조회: BFS (깊이 제한, 중복 제거)
//! - 경로 탐색: DFS (간선 수 제한, 단순 경로 전부)
//! - 서브그래프: 키워드 매칭 엔티티 + 1홉 확장

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::document::Metadata;
use super::schema::TableSchema;
use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 엔티티 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Table,
    Column,
    Concept,
    Person,
    Org,
    Location,
    Time,
    Event,
    Metric,
    #[serde(other)]
    Custom,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Table => "table",
            EntityType::Column => "column",
            EntityType::Concept => "concept",
            EntityType::Person => "person",
            EntityType::Org => "org",
            EntityType::Location => "location",
            EntityType::Time => "time",
            EntityType::Event => "event",
            EntityType::Metric => "metric",
            EntityType::Custom => "custom",
        }
    }

    /// 모델이 만든 타입 이름 해석 (알 수 없으면 `Custom`)
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "table" => EntityType::Table,
            "column" => EntityType::Column,
            "concept" => EntityType::Concept,
            "person" => EntityType::Person,
            "org" | "organization" => EntityType::Org,
            "location" => EntityType::Location,
            "time" => EntityType::Time,
            "event" => EntityType::Event,
            "metric" => EntityType::Metric,
            _ => EntityType::Custom,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 관계 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    HasColumn,
    References,
    BelongsTo,
    RelatedTo,
    PartOf,
    InstanceOf,
    Synonym,
    Antonym,
    Causes,
    Follows,
    #[serde(other)]
    Custom,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::HasColumn => "has_column",
            RelationType::References => "references",
            RelationType::BelongsTo => "belongs_to",
            RelationType::RelatedTo => "related_to",
            RelationType::PartOf => "part_of",
            RelationType::InstanceOf => "instance_of",
            RelationType::Synonym => "synonym",
            RelationType::Antonym => "antonym",
            RelationType::Causes => "causes",
            RelationType::Follows => "follows",
            RelationType::Custom => "custom",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "has_column" => RelationType::HasColumn,
            "references" => RelationType::References,
            "belongs_to" => RelationType::BelongsTo,
            "related_to" => RelationType::RelatedTo,
            "part_of" => RelationType::PartOf,
            "instance_of" => RelationType::InstanceOf,
            "synonym" => RelationType::Synonym,
            "antonym" => RelationType::Antonym,
            "causes" => RelationType::Causes,
            "follows" => RelationType::Follows,
            _ => RelationType::Custom,
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 그래프 노드
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub knowledge_base_id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    /// 지역화된 별칭
    #[serde(default, alias = "nameCn", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 그래프 간선
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: String,
    pub knowledge_base_id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub properties: Metadata,
    /// 0.0 ~ 1.0
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 엔티티 생성 요청
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub properties: Metadata,
    pub source_document_id: Option<String>,
}

impl NewEntity {
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
            alias: None,
            description: None,
            properties: Metadata::new(),
            source_document_id: None,
        }
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.is_empty());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_source(mut self, document_id: impl Into<String>) -> Self {
        self.source_document_id = Some(document_id.into());
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// 관계 생성 요청
#[derive(Debug, Clone)]
pub struct NewRelation {
    pub relation_type: RelationType,
    pub source_id: String,
    pub target_id: String,
    pub properties: Metadata,
    pub weight: f32,
    pub source_document_id: Option<String>,
}

impl NewRelation {
    pub fn new(
        relation_type: RelationType,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        weight: f32,
    ) -> Self {
        Self {
            relation_type,
            source_id: source_id.into(),
            target_id: target_id.into(),
            properties: Metadata::new(),
            weight,
            source_document_id: None,
        }
    }

    pub fn with_source(mut self, document_id: impl Into<String>) -> Self {
        self.source_document_id = Some(document_id.into());
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// 서브그래프 조회 결과
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// 그래프 통계
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    pub entity_types: BTreeMap<String, usize>,
}

/// 내보내기 스냅샷
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

// ============================================================================
// KnowledgeGraph
// ============================================================================

/// 지식 그래프
#[derive(Debug)]
pub struct KnowledgeGraph {
    knowledge_base_id: String,

    entities: HashMap<String, Entity>,
    relations: HashMap<String, Relation>,
    entity_order: Vec<String>,
    relation_order: Vec<String>,

    // 보조 인덱스 (값은 삽입 순서)
    by_name: HashMap<String, Vec<String>>,
    by_type: HashMap<EntityType, Vec<String>>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
}

impl KnowledgeGraph {
    pub fn new(knowledge_base_id: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            entities: HashMap::new(),
            relations: HashMap::new(),
            entity_order: Vec::new(),
            relation_order: Vec::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    pub fn knowledge_base_id(&self) -> &str {
        &self.knowledge_base_id
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// 엔티티 추가
    pub fn add_entity(&mut self, new: NewEntity) -> Entity {
        let entity = Entity {
            id: Uuid::new_v4().to_string(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            entity_type: new.entity_type,
            name: new.name,
            alias: new.alias,
            description: new.description,
            properties: new.properties,
            source_document_id: new.source_document_id,
            created_at: Utc::now(),
        };

        self.insert_entity(entity.clone());
        entity
    }

    /// 관계 추가
    ///
    /// 양 끝 엔티티가 모두 존재해야 하며, 아니면 아무것도 만들지 않고 실패합니다.
    pub fn add_relation(&mut self, new: NewRelation) -> Result<Relation> {
        for id in [&new.source_id, &new.target_id] {
            if !self.entities.contains_key(id) {
                return Err(RagError::MissingEntity(id.clone()));
            }
        }

        let relation = Relation {
            id: Uuid::new_v4().to_string(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            relation_type: new.relation_type,
            source_id: new.source_id,
            target_id: new.target_id,
            properties: new.properties,
            weight: clamp_weight(new.weight),
            source_document_id: new.source_document_id,
            created_at: Utc::now(),
        };

        self.insert_relation(relation.clone());
        Ok(relation)
    }

    /// 엔티티 삽입 (같은 id가 있으면 대체하고 이전 인덱스 항목을 걷어냄)
    fn insert_entity(&mut self, entity: Entity) {
        let id = entity.id.clone();

        if let Some(previous) = self.entities.remove(&id) {
            for key in name_keys(&previous) {
                detach(&mut self.by_name, &key, &id);
            }
            detach(&mut self.by_type, &previous.entity_type, &id);
        } else {
            self.entity_order.push(id.clone());
        }

        for key in name_keys(&entity) {
            self.by_name.entry(key).or_default().push(id.clone());
        }
        self.by_type
            .entry(entity.entity_type)
            .or_default()
            .push(id.clone());

        self.entities.insert(id, entity);
    }

    fn insert_relation(&mut self, relation: Relation) {
        let id = relation.id.clone();

        if let Some(previous) = self.relations.remove(&id) {
            detach(&mut self.outgoing, &previous.source_id, &id);
            detach(&mut self.incoming, &previous.target_id, &id);
        } else {
            self.relation_order.push(id.clone());
        }

        self.outgoing
            .entry(relation.source_id.clone())
            .or_default()
            .push(id.clone());
        self.incoming
            .entry(relation.target_id.clone())
            .or_default()
            .push(id.clone());

        self.relations.insert(id, relation);
    }

    /// 문서에서 유래한 엔티티/관계 제거
    ///
    /// 해당 엔티티에 닿는 모든 관계와 그 문서가 출처인 관계를 함께 제거합니다.
    /// 반환값: (제거된 엔티티 수, 제거된 관계 수)
    pub fn remove_by_source_document(&mut self, document_id: &str) -> (usize, usize) {
        let doomed_entities: HashSet<String> = self
            .entities
            .values()
            .filter(|e| e.source_document_id.as_deref() == Some(document_id))
            .map(|e| e.id.clone())
            .collect();

        let doomed_relations: HashSet<String> = self
            .relations
            .values()
            .filter(|r| {
                r.source_document_id.as_deref() == Some(document_id)
                    || doomed_entities.contains(&r.source_id)
                    || doomed_entities.contains(&r.target_id)
            })
            .map(|r| r.id.clone())
            .collect();

        if doomed_entities.is_empty() && doomed_relations.is_empty() {
            return (0, 0);
        }

        let snapshot = GraphSnapshot {
            entities: self
                .ordered_entities()
                .filter(|e| !doomed_entities.contains(&e.id))
                .cloned()
                .collect(),
            relations: self
                .ordered_relations()
                .filter(|r| !doomed_relations.contains(&r.id))
                .cloned()
                .collect(),
        };
        self.import(snapshot);

        (doomed_entities.len(), doomed_relations.len())
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.relations.clear();
        self.entity_order.clear();
        self.relation_order.clear();
        self.by_name.clear();
        self.by_type.clear();
        self.outgoing.clear();
        self.incoming.clear();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// 이름 또는 별칭 정확 일치 검색 (대소문자 무시)
    pub fn find_entities_by_name(&self, name: &str) -> Vec<&Entity> {
        self.lookup(self.by_name.get(&name.trim().to_lowercase()))
    }

    pub fn find_entities_by_type(&self, entity_type: EntityType) -> Vec<&Entity> {
        self.lookup(self.by_type.get(&entity_type))
    }

    fn lookup(&self, ids: Option<&Vec<String>>) -> Vec<&Entity> {
        let mut seen = HashSet::new();
        ids.into_iter()
            .flatten()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.entities.get(id))
            .collect()
    }

    /// 엔티티에 연결된 모든 관계 (나가는 관계 → 들어오는 관계 순)
    pub fn get_entity_relations(&self, entity_id: &str) -> Vec<&Relation> {
        let mut seen = HashSet::new();
        self.outgoing
            .get(entity_id)
            .into_iter()
            .chain(self.incoming.get(entity_id))
            .flatten()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.relations.get(id))
            .collect()
    }

    /// 인접 엔티티 ID (중복 제거, 관계 순서)
    fn neighbor_ids(&self, entity_id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.get_entity_relations(entity_id)
            .into_iter()
            .map(|r| {
                if r.source_id == entity_id {
                    r.target_id.as_str()
                } else {
                    r.source_id.as_str()
                }
            })
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// `depth` 홉 이내의 이웃 엔티티 (BFS, 시작 엔티티 제외)
    pub fn get_neighbors(&self, entity_id: &str, depth: usize) -> Vec<&Entity> {
        if depth == 0 || !self.entities.contains_key(entity_id) {
            return vec![];
        }

        let mut visited: HashSet<&str> = HashSet::from([entity_id]);
        let mut found = Vec::new();
        let mut queue = VecDeque::from([(entity_id, 0usize)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            for next in self.neighbor_ids(current) {
                if visited.insert(next) {
                    found.push(next);
                    queue.push_back((next, level + 1));
                }
            }
        }

        found
            .into_iter()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }

    /// 두 엔티티 사이의 단순 경로 전부 (DFS, 최대 `max_depth` 간선)
    pub fn find_path(&self, source_id: &str, target_id: &str, max_depth: usize) -> Vec<Vec<&Entity>> {
        if !self.entities.contains_key(source_id) || !self.entities.contains_key(target_id) {
            return vec![];
        }

        let mut paths = Vec::new();
        let mut path = vec![source_id];
        let mut on_path: HashSet<&str> = HashSet::from([source_id]);
        self.dfs(target_id, max_depth, &mut path, &mut on_path, &mut paths);

        paths
            .into_iter()
            .map(|ids| ids.into_iter().filter_map(|id| self.entities.get(id)).collect())
            .collect()
    }

    fn dfs<'a>(
        &'a self,
        target_id: &str,
        max_depth: usize,
        path: &mut Vec<&'a str>,
        on_path: &mut HashSet<&'a str>,
        paths: &mut Vec<Vec<&'a str>>,
    ) {
        let Some(&current) = path.last() else {
            return;
        };

        if current == target_id {
            paths.push(path.clone());
            return;
        }
        if path.len() > max_depth {
            return;
        }

        for next in self.neighbor_ids(current) {
            if on_path.insert(next) {
                path.push(next);
                self.dfs(target_id, max_depth, path, on_path, paths);
                path.pop();
                on_path.remove(next);
            }
        }
    }

    /// 키워드 관련 서브그래프
    ///
    /// 이름/별칭에 키워드가 포함된 엔티티(대소문자 무시)를 찾고, 각각을 1홉 확장합니다.
    /// 엔티티 수는 `max_entities`를 넘지 않으며, 양 끝이 모두 포함된 관계만 반환합니다.
    pub fn query_subgraph(&self, keywords: &[String], max_entities: usize) -> Subgraph {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() || max_entities == 0 {
            return Subgraph::default();
        }

        let mut selected: Vec<&str> = Vec::new();
        let mut in_set: HashSet<&str> = HashSet::new();

        for keyword in &keywords {
            for entity in self.ordered_entities() {
                if selected.len() >= max_entities {
                    break;
                }
                if name_keys(entity).iter().any(|k| k.contains(keyword.as_str()))
                    && in_set.insert(entity.id.as_str())
                {
                    selected.push(entity.id.as_str());
                }
            }
        }

        let matched = selected.clone();
        'expand: for id in matched {
            for next in self.neighbor_ids(id) {
                if selected.len() >= max_entities {
                    break 'expand;
                }
                if in_set.insert(next) {
                    selected.push(next);
                }
            }
        }

        Subgraph {
            entities: selected
                .iter()
                .filter_map(|id| self.entities.get(*id))
                .cloned()
                .collect(),
            relations: self
                .ordered_relations()
                .filter(|r| in_set.contains(r.source_id.as_str()) && in_set.contains(r.target_id.as_str()))
                .cloned()
                .collect(),
        }
    }

    // ========================================================================
    // Schema / Snapshot
    // ========================================================================

    /// 스키마로 그래프 구성
    ///
    /// 테이블당 엔티티 1개, 컬럼당 엔티티 1개, (테이블, 컬럼)마다 `has_column` 관계 1개.
    /// 반환값: 추가된 엔티티 수
    pub fn build_from_schema(&mut self, tables: &[TableSchema], datasource_id: &str) -> usize {
        let before = self.entities.len();

        for table in tables {
            let table_entity = self.add_entity(
                NewEntity::new(EntityType::Table, &table.table_name)
                    .with_alias(table.alias.clone())
                    .with_description(table.description.clone())
                    .with_property("datasourceId", datasource_id)
                    .with_source(datasource_id),
            );

            for column in &table.columns {
                let column_entity = self.add_entity(
                    NewEntity::new(EntityType::Column, &column.name)
                        .with_alias(column.alias.clone())
                        .with_description(column.description.clone())
                        .with_property("dataType", column.data_type.as_str())
                        .with_property("isPrimaryKey", column.is_primary_key)
                        .with_property("isForeignKey", column.is_foreign_key)
                        .with_source(datasource_id),
                );

                let relation = NewRelation::new(
                    RelationType::HasColumn,
                    &table_entity.id,
                    &column_entity.id,
                    1.0,
                )
                .with_source(datasource_id);

                // 두 엔티티는 방금 추가되었으므로 실패하지 않음
                if let Err(e) = self.add_relation(relation) {
                    tracing::warn!("Failed to link column {}: {}", column.name, e);
                }
            }
        }

        let added = self.entities.len() - before;
        tracing::debug!("Built {} entities from {} tables", added, tables.len());
        added
    }

    pub fn stats(&self) -> GraphStats {
        let entity_types = self
            .by_type
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(t, ids)| (t.to_string(), ids.len()))
            .collect();

        GraphStats {
            entities: self.entities.len(),
            relations: self.relations.len(),
            entity_types,
        }
    }

    pub fn export(&self) -> GraphSnapshot {
        GraphSnapshot {
            entities: self.ordered_entities().cloned().collect(),
            relations: self.ordered_relations().cloned().collect(),
        }
    }

    /// 스냅샷 가져오기 (기존 내용 대체, 인덱스 재구축)
    ///
    /// 끝점이 없는 관계는 건너뜁니다.
    pub fn import(&mut self, snapshot: GraphSnapshot) {
        self.clear();

        for entity in snapshot.entities {
            self.insert_entity(entity);
        }

        let mut skipped = 0;
        for mut relation in snapshot.relations {
            if !self.entities.contains_key(&relation.source_id)
                || !self.entities.contains_key(&relation.target_id)
            {
                skipped += 1;
                continue;
            }
            relation.weight = clamp_weight(relation.weight);
            self.insert_relation(relation);
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} dangling relations on graph import", skipped);
        }
    }

    fn ordered_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entity_order.iter().filter_map(|id| self.entities.get(id))
    }

    fn ordered_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relation_order.iter().filter_map(|id| self.relations.get(id))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 이름 인덱스 키 (소문자 이름 + 소문자 별칭)
fn name_keys(entity: &Entity) -> Vec<String> {
    let mut keys = vec![entity.name.trim().to_lowercase()];
    if let Some(alias) = entity.alias.as_deref() {
        let alias = alias.trim().to_lowercase();
        if !alias.is_empty() && alias != keys[0] {
            keys.push(alias);
        }
    }
    keys
}

/// 보조 인덱스에서 id 하나를 떼어내고, 비면 키도 제거
fn detach<K>(index: &mut HashMap<K, Vec<String>>, key: &K, id: &str)
where
    K: std::hash::Hash + Eq,
{
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::schema::ColumnSchema;

    fn concept(graph: &mut KnowledgeGraph, name: &str) -> String {
        graph.add_entity(NewEntity::new(EntityType::Concept, name)).id
    }

    fn link(graph: &mut KnowledgeGraph, a: &str, b: &str) {
        graph
            .add_relation(NewRelation::new(RelationType::RelatedTo, a, b, 0.8))
            .unwrap();
    }

    /// a - b - c - d 체인
    fn chain() -> (KnowledgeGraph, Vec<String>) {
        let mut graph = KnowledgeGraph::new("kb");
        let ids: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| concept(&mut graph, n))
            .collect();
        for pair in ids.windows(2) {
            link(&mut graph, &pair[0], &pair[1]);
        }
        (graph, ids)
    }

    #[test]
    fn test_add_relation_requires_endpoints() {
        let mut graph = KnowledgeGraph::new("kb");
        let a = concept(&mut graph, "a");

        let err = graph
            .add_relation(NewRelation::new(RelationType::RelatedTo, &a, "missing", 0.5))
            .unwrap_err();
        assert!(matches!(err, RagError::MissingEntity(ref id) if id == "missing"));
        assert_eq!(graph.entity_count(), 1);
        assert_eq!(graph.relation_count(), 0);
    }

    #[test]
    fn test_add_relation_missing_source_leaves_graph_unchanged() {
        let (mut graph, ids) = chain();
        let before = serde_json::to_value(graph.export()).unwrap();

        let err = graph
            .add_relation(NewRelation::new(RelationType::Causes, "ghost", &ids[0], 0.5))
            .unwrap_err();
        assert!(matches!(err, RagError::MissingEntity(ref id) if id == "ghost"));

        assert_eq!(serde_json::to_value(graph.export()).unwrap(), before);
        assert_eq!(graph.relation_count(), 3);
        assert!(graph.get_entity("ghost").is_none());
        assert_eq!(graph.get_entity_relations(&ids[0]).len(), 1);
    }

    #[test]
    fn test_import_duplicate_entity_id_keeps_indices_consistent() {
        let mut graph = KnowledgeGraph::new("kb");
        concept(&mut graph, "Alpha");
        let mut snapshot = graph.export();
        let mut renamed = snapshot.entities[0].clone();
        renamed.name = "Beta".to_string();
        snapshot.entities.push(renamed);

        let mut restored = KnowledgeGraph::new("kb");
        restored.import(snapshot);

        assert_eq!(restored.entity_count(), 1);
        assert_eq!(restored.stats().entity_types.get("concept"), Some(&1));
        assert!(restored.find_entities_by_name("alpha").is_empty());
        assert_eq!(restored.find_entities_by_name("beta")[0].name, "Beta");
        assert_eq!(restored.find_entities_by_type(EntityType::Concept).len(), 1);
        assert_eq!(restored.export().entities.len(), 1);
    }

    #[test]
    fn test_weight_is_clamped() {
        let mut graph = KnowledgeGraph::new("kb");
        let a = concept(&mut graph, "a");
        let b = concept(&mut graph, "b");
        let rel = graph
            .add_relation(NewRelation::new(RelationType::Causes, &a, &b, 3.5))
            .unwrap();
        assert_eq!(rel.weight, 1.0);
    }

    #[test]
    fn test_find_by_name_and_alias() {
        let mut graph = KnowledgeGraph::new("kb");
        graph.add_entity(
            NewEntity::new(EntityType::Table, "Orders").with_alias(Some("주문".to_string())),
        );

        assert_eq!(graph.find_entities_by_name("orders").len(), 1);
        assert_eq!(graph.find_entities_by_name("주문").len(), 1);
        assert!(graph.find_entities_by_name("order").is_empty());
        assert_eq!(graph.find_entities_by_type(EntityType::Table).len(), 1);
    }

    #[test]
    fn test_neighbors_depth() {
        let (graph, ids) = chain();

        assert!(graph.get_neighbors(&ids[0], 0).is_empty());

        let one: Vec<_> = graph.get_neighbors(&ids[0], 1).iter().map(|e| e.name.clone()).collect();
        assert_eq!(one, vec!["b"]);

        let two = graph.get_neighbors(&ids[0], 2);
        assert_eq!(two.len(), 2);

        // depth가 커지면 결과는 줄지 않음
        let three = graph.get_neighbors(&ids[0], 3);
        assert!(three.len() >= two.len());
        assert!(three.iter().all(|e| e.id != ids[0]));
    }

    #[test]
    fn test_find_path_bound() {
        let (graph, ids) = chain();

        let paths = graph.find_path(&ids[0], &ids[3], 3);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 4);

        assert!(graph.find_path(&ids[0], &ids[3], 2).is_empty());

        for max_depth in 0..5 {
            for path in graph.find_path(&ids[0], &ids[2], max_depth) {
                assert!(path.len() <= max_depth + 1);
            }
        }

        assert!(graph.find_path(&ids[0], "nope", 5).is_empty());
    }

    #[test]
    fn test_find_path_multiple_routes() {
        // a - b - d, a - c - d
        let mut graph = KnowledgeGraph::new("kb");
        let a = concept(&mut graph, "a");
        let b = concept(&mut graph, "b");
        let c = concept(&mut graph, "c");
        let d = concept(&mut graph, "d");
        link(&mut graph, &a, &b);
        link(&mut graph, &b, &d);
        link(&mut graph, &a, &c);
        link(&mut graph, &c, &d);
        // 같은 쌍의 중복 간선은 경로를 늘리지 않음
        link(&mut graph, &a, &b);

        assert_eq!(graph.find_path(&a, &d, 2).len(), 2);
    }

    #[test]
    fn test_query_subgraph() {
        let (graph, _) = chain();

        let sub = graph.query_subgraph(&["B".to_string()], 10);
        let names: Vec<_> = sub.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert_eq!(sub.relations.len(), 2);

        let capped = graph.query_subgraph(&["b".to_string()], 2);
        assert_eq!(capped.entities.len(), 2);
        assert_eq!(capped.relations.len(), 1);

        assert!(graph.query_subgraph(&["zzz".to_string()], 10).is_empty());
        assert!(graph.query_subgraph(&[], 10).is_empty());
    }

    #[test]
    fn test_build_from_schema() {
        let mut graph = KnowledgeGraph::new("kb");
        let tables = vec![TableSchema::new(
            "orders",
            vec![ColumnSchema::new("id", "int"), ColumnSchema::new("total", "decimal")],
        )];

        assert_eq!(graph.build_from_schema(&tables, "ds-1"), 3);
        assert_eq!(graph.entity_count(), 3);
        assert_eq!(graph.relation_count(), 2);

        let table_id = graph.find_entities_by_type(EntityType::Table)[0].id.clone();
        let relations = graph.get_entity_relations(&table_id);
        assert_eq!(relations.len(), 2);
        assert!(relations
            .iter()
            .all(|r| r.relation_type == RelationType::HasColumn && r.weight == 1.0));

        let stats = graph.stats();
        assert_eq!(stats.entity_types.get("column"), Some(&2));
    }

    #[test]
    fn test_remove_by_source_document() {
        let mut graph = KnowledgeGraph::new("kb");
        let keep = concept(&mut graph, "keep");
        let gone = graph
            .add_entity(NewEntity::new(EntityType::Concept, "gone").with_source("doc-1"))
            .id;
        link(&mut graph, &keep, &gone);

        assert_eq!(graph.remove_by_source_document("doc-1"), (1, 1));
        assert_eq!(graph.entity_count(), 1);
        assert_eq!(graph.relation_count(), 0);
        assert!(graph.find_entities_by_name("gone").is_empty());
        assert_eq!(graph.remove_by_source_document("doc-1"), (0, 0));
    }

    #[test]
    fn test_export_import_rebuilds_indices() {
        let (graph, ids) = chain();
        let json = serde_json::to_string(&graph.export()).unwrap();
        let mut snapshot: GraphSnapshot = serde_json::from_str(&json).unwrap();
        snapshot.relations[0].target_id = "dangling".to_string();

        let mut restored = KnowledgeGraph::new("kb");
        restored.import(snapshot);
        assert_eq!(restored.entity_count(), 4);
        assert_eq!(restored.relation_count(), 2);
        assert_eq!(restored.find_entities_by_name("c").len(), 1);
        assert_eq!(restored.get_neighbors(&ids[3], 1).len(), 1);
    }

    #[test]
    fn test_type_parsing_is_permissive() {
        assert_eq!(EntityType::parse_lossy("Person"), EntityType::Person);
        assert_eq!(EntityType::parse_lossy("gadget"), EntityType::Custom);
        assert_eq!(RelationType::parse_lossy("belongs-to"), RelationType::BelongsTo);
        assert_eq!(RelationType::parse_lossy("likes"), RelationType::Custom);

        let t: EntityType = serde_json::from_str("\"widget\"").unwrap();
        assert_eq!(t, EntityType::Custom);
    }
}
