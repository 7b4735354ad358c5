//! CLI 모듈
//!
//! palank-kb CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{get_data_dir, has_api_key, EngineConfig};
use crate::embedding::create_embedder;
use crate::generation::OpenAiChat;
use crate::knowledge::{
    DocumentFilter, DocumentStatus, DocumentType, EngineRegistry, KnowledgeStore, NewCategory,
    NewDocument, RagEngine, RetrieveOptions, Strategy, TableSchema,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-kb")]
#[command(version, about = "지식베이스 검색 엔진 (벡터 + 지식 그래프 + Agentic)", long_about = None)]
pub struct Cli {
    /// 지식베이스 소유자 ID
    #[arg(long, global = true, default_value = "default")]
    pub owner: String,

    /// SQLite 파일 경로 (기본: ~/.palank-kb/knowledge.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Agentic 검색 루트 디렉토리
    #[arg(long, global = true)]
    pub knowledge_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 추가할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 문서 제목 (기본: 파일 이름 또는 첫 줄)
        #[arg(long)]
        title: Option<String>,

        /// 문서 유형 (datasource, document, webpage, note)
        #[arg(long = "type", default_value = "document")]
        doc_type: DocumentType,

        /// 카테고리 ID
        #[arg(short, long)]
        category: Option<String>,
    },

    /// 데이터 소스 스키마(JSON)로 지식 문서와 그래프 생성
    Datasource {
        /// {"id", "name", "tables", "sampleRows"} 형식의 JSON 파일
        schema: PathBuf,
    },

    /// 질문하기
    Ask {
        /// 질문
        query: String,

        /// 검색 전략 (vector, agentic, hybrid)
        #[arg(short, long, default_value = "vector")]
        strategy: Strategy,

        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<String>,

        /// 문서 필터
        #[arg(short, long)]
        document: Option<String>,

        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 청크 전문 검색 (모든 키워드 포함)
    Search {
        /// 공백으로 구분된 키워드
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 목록
    List {
        /// 유형 필터
        #[arg(long = "type")]
        doc_type: Option<DocumentType>,

        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<String>,

        /// 제목/본문 키워드
        #[arg(short, long)]
        keyword: Option<String>,

        /// 페이지 (1부터)
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// 페이지 크기
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        id: String,
    },

    /// 카테고리 관리
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// 지식베이스 통계
    Stats,

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum CategoryAction {
    /// 카테고리 추가
    Add {
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// 상위 카테고리 ID
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// 카테고리 목록
    List,

    /// 카테고리 삭제 (소속 문서는 미분류로)
    Delete { id: String },
}

/// `datasource` 명령어 입력 파일
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceFile {
    id: String,
    name: String,
    tables: Vec<TableSchema>,
    #[serde(default)]
    sample_rows: Vec<Value>,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let Cli {
        owner,
        db,
        knowledge_dir,
        command,
    } = cli;

    if let Commands::Status = command {
        return cmd_status(db.as_deref()).await;
    }

    let engine = open_engine(&owner, db.as_deref(), knowledge_dir)?;

    match command {
        Commands::Ingest {
            text,
            file,
            title,
            doc_type,
            category,
        } => cmd_ingest(&engine, text, file, title, doc_type, category).await,
        Commands::Datasource { schema } => cmd_datasource(&engine, &schema).await,
        Commands::Ask {
            query,
            strategy,
            category,
            document,
            top_k,
        } => {
            let options = RetrieveOptions {
                top_k,
                category_id: category,
                document_id: document,
            };
            cmd_ask(&engine, &query, strategy, &options).await
        }
        Commands::Search { query, limit } => cmd_search(&engine, &query, limit),
        Commands::List {
            doc_type,
            category,
            keyword,
            page,
            limit,
        } => {
            let filter = DocumentFilter {
                doc_type,
                category_id: category,
                keyword,
                page,
                page_size: limit,
                ..Default::default()
            };
            cmd_list(&engine, &filter)
        }
        Commands::Delete { id } => cmd_delete(&engine, &id),
        Commands::Category { action } => cmd_category(&engine, action),
        Commands::Stats => cmd_stats(&engine),
        Commands::Status => Ok(()),
    }
}

/// 환경변수 설정과 저장소로 엔진 생성 후 복원
fn open_engine(owner: &str, db: Option<&Path>, knowledge_dir: Option<PathBuf>) -> Result<Arc<RagEngine>> {
    let mut config = EngineConfig::from_env().context("Invalid engine configuration")?;
    if let Some(dir) = knowledge_dir {
        config.agentic.root = dir;
    }

    if !has_api_key() {
        println!("[!] API 키 미설정: 인증 없이 요청합니다 (로컬 서버용)");
        println!("    설정: export PALANK_API_KEY=your-key");
    }

    let store = open_store(db)?;
    let embedder = create_embedder().context("임베딩 프로바이더 생성 실패")?;
    let generator = OpenAiChat::from_env().context("생성 프로바이더 생성 실패")?;

    let registry = EngineRegistry::new(config, Arc::new(embedder), Arc::new(generator))
        .with_store(Arc::new(store));
    let engine = registry.get_or_create(owner).context("엔진 초기화 실패")?;
    Ok(engine)
}

fn open_store(db: Option<&Path>) -> Result<KnowledgeStore> {
    match db {
        Some(path) => KnowledgeStore::open(path),
        None => KnowledgeStore::open_default(),
    }
    .context("KnowledgeStore 열기 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 추가 명령어 (ingest)
async fn cmd_ingest(
    engine: &RagEngine,
    text: Option<String>,
    file: Option<PathBuf>,
    title: Option<String>,
    doc_type: DocumentType,
    category: Option<String>,
) -> Result<()> {
    let (content, default_title) = if let Some(ref path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();
        (content, name)
    } else if let Some(text) = text {
        let first_line = truncate_text(text.lines().next().unwrap_or("untitled"), 50);
        (text, first_line)
    } else {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    };

    if content.trim().is_empty() {
        bail!("빈 문서는 추가할 수 없습니다");
    }

    let mut doc = NewDocument::new(title.unwrap_or(default_title), content).with_type(doc_type);
    if let Some(category) = category {
        doc = doc.with_category(category);
    }

    println!("[*] 청킹 및 임베딩 생성 중...");
    let doc = engine.add_document(doc).await.context("문서 추가 실패")?;

    println!("[OK] 문서가 추가되었습니다 (ID: {})", doc.id);
    println!("     제목: {}", doc.title);
    println!("     청크: {} 개", doc.chunk_count);
    Ok(())
}

/// 데이터 소스 명령어 (datasource)
async fn cmd_datasource(engine: &RagEngine, schema: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(schema)
        .with_context(|| format!("스키마 파일 읽기 실패: {}", schema.display()))?;
    let source: DataSourceFile = serde_json::from_str(&raw).context("스키마 JSON 파싱 실패")?;

    let doc = engine
        .add_from_data_source(&source.id, &source.name, &source.tables, &source.sample_rows)
        .await
        .context("데이터 소스 추가 실패")?;

    let stats = engine.stats();
    println!("[OK] 데이터 소스 문서 추가됨 (ID: {})", doc.id);
    println!("     테이블: {} 개", source.tables.len());
    println!("     그래프: 엔티티 {}, 관계 {}", stats.entities, stats.relations);
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    engine: &RagEngine,
    query: &str,
    strategy: Strategy,
    options: &RetrieveOptions,
) -> Result<()> {
    println!("[*] 질문 중 ({}): \"{}\"", strategy, query);

    let answer = engine
        .ask(query, strategy, options)
        .await
        .context("답변 생성 실패")?;

    println!();
    println!("{}", answer.answer);
    println!();
    println!("[*] 신뢰도: {:.1}%", answer.confidence * 100.0);

    if !answer.sources.is_empty() {
        println!("[*] 출처 ({} 건):", answer.sources.len());
        for (i, source) in answer.sources.iter().enumerate() {
            println!("  {}. [{}] {}", i + 1, source.doc_type, source.title);
            println!("     {}", truncate_text(&source.content, 100));
        }
    }

    if let Some(graph) = answer.context.as_ref().and_then(|c| c.graph.as_ref()) {
        let names: Vec<&str> = graph.entities.iter().map(|e| e.name.as_str()).collect();
        println!("[*] 관련 엔티티: {}", names.join(", "));
    }

    Ok(())
}

/// 검색 명령어 (search)
fn cmd_search(engine: &RagEngine, query: &str, limit: usize) -> Result<()> {
    println!("[*] 검색 중: \"{}\"", query);

    let results = engine.search_chunks(query, limit);
    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. {} #{} (문서: {})",
            i + 1,
            result.document_title,
            result.chunk_index,
            result.document_id
        );
        if let Some(ref heading) = result.metadata.heading {
            println!("   섹션: {}", heading);
        }
        println!("   내용: {}", truncate_text(&result.content, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(engine: &RagEngine, filter: &DocumentFilter) -> Result<()> {
    let page = engine.list_documents(filter);

    if page.items.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!(
        "[OK] 문서 {} 건 중 {} 페이지 ({} 건):\n",
        page.total,
        page.page,
        page.items.len()
    );

    for doc in &page.items {
        let status = match doc.status {
            DocumentStatus::Indexed => "OK",
            DocumentStatus::Pending => "..",
            DocumentStatus::Failed => "!!",
        };

        println!("  [{}] [{}] {}", status, doc.doc_type, truncate_text(&doc.title, 40));
        println!("        ID: {}", doc.id);
        println!(
            "        {} | {} chunks | {}",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.chunk_count,
            format_bytes(doc.content.len())
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(engine: &RagEngine, id: &str) -> Result<()> {
    if engine.delete_document(id) {
        println!("[OK] 문서 {} 삭제됨", id);
    } else {
        println!("[!] ID {}인 문서를 찾을 수 없습니다", id);
    }
    Ok(())
}

/// 카테고리 명령어 (category)
fn cmd_category(engine: &RagEngine, action: CategoryAction) -> Result<()> {
    match action {
        CategoryAction::Add {
            name,
            description,
            parent,
        } => {
            if let Some(ref parent_id) = parent {
                if !engine.list_categories().iter().any(|c| &c.id == parent_id) {
                    bail!("상위 카테고리 {}를 찾을 수 없습니다", parent_id);
                }
            }

            let category = engine.create_category(NewCategory {
                name,
                description,
                parent_id: parent,
                ..Default::default()
            });
            println!("[OK] 카테고리 추가됨: {} (ID: {})", category.name, category.id);
        }
        CategoryAction::List => {
            let categories = engine.list_categories();
            if categories.is_empty() {
                println!("[!] 카테고리가 없습니다.");
                return Ok(());
            }
            for category in categories {
                let parent = category.parent_id.as_deref().unwrap_or("-");
                println!("  {} | {} (상위: {})", category.id, category.name, parent);
                if let Some(ref description) = category.description {
                    println!("        {}", truncate_text(description, 60));
                }
            }
        }
        CategoryAction::Delete { id } => {
            if engine.delete_category(&id) {
                println!("[OK] 카테고리 {} 삭제됨", id);
            } else {
                println!("[!] ID {}인 카테고리를 찾을 수 없습니다", id);
            }
        }
    }
    Ok(())
}

/// 통계 명령어 (stats)
fn cmd_stats(engine: &RagEngine) -> Result<()> {
    let stats = engine.stats();

    println!("[OK] 지식베이스: {}", stats.knowledge_base_id);
    println!("     문서: {} 건", stats.documents);
    for (doc_type, count) in &stats.by_type {
        println!("       - {}: {}", doc_type, count);
    }
    println!("     벡터: {} 청크", stats.chunks);
    if stats.dimensions.len() > 1 {
        println!("[!] 벡터 차원이 섞여 있습니다: {:?}", stats.dimensions);
    }
    println!("     그래프: 엔티티 {}, 관계 {}", stats.entities, stats.relations);
    println!("     카테고리: {}", stats.categories);
    println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));
    Ok(())
}

/// 상태 명령어 (status)
///
/// 프로바이더 없이 저장소만 확인합니다.
async fn cmd_status(db: Option<&Path>) -> Result<()> {
    println!("palank-kb v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export PALANK_API_KEY=your-key");
    }

    match EngineConfig::from_env() {
        Ok(config) => {
            let root = &config.agentic.root;
            if tokio::fs::try_exists(root).await.unwrap_or(false) {
                println!("[OK] Agentic 루트: {}", root.display());
            } else {
                println!("[!] Agentic 루트 없음: {}", root.display());
            }
        }
        Err(e) => println!("[!] 설정 오류: {:#}", e),
    }

    match open_store(db) {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 문서: {} 건 ({} 청크)", stats.document_count, stats.chunk_count);
                println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));
                println!("     DB: {}", stats.db_path.display());
            }
            Err(e) => println!("[!] 통계 조회 실패: {:#}", e),
        },
        Err(e) => println!("[!] {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
