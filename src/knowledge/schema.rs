//! 데이터 소스 스키마
//!
//! 데이터 소스 계층이 넘겨주는 테이블 스키마(camelCase JSON)와
//! 스키마를 Markdown 지식 문서로 합성하는 함수입니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{DocumentType, Metadata, NewDocument};

/// 합성 문서에 포함할 최대 샘플 행 수
pub const MAX_SAMPLE_ROWS: usize = 5;

/// 컬럼 스키마
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    /// 지역화된 컬럼 이름
    #[serde(default, alias = "nameCn", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, rename = "type", alias = "dataType")]
    pub data_type: String,
    #[serde(default, alias = "comment", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
}

/// 테이블 스키마
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table_name: String,
    #[serde(default, alias = "tableNameCn", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ..Default::default()
        }
    }
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            ..Default::default()
        }
    }
}

/// 데이터 소스 스키마 + 샘플 행으로 지식 문서 합성
pub fn data_source_document(
    datasource_id: &str,
    datasource_name: &str,
    tables: &[TableSchema],
    sample_rows: &[Value],
) -> NewDocument {
    let schema_desc = tables
        .iter()
        .map(|table| {
            let columns = table
                .columns
                .iter()
                .map(|c| {
                    let mut line = format!("  - {} ({})", c.name, c.data_type);
                    if let Some(desc) = c.description.as_deref().filter(|d| !d.is_empty()) {
                        line.push_str(": ");
                        line.push_str(desc);
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n");

            let mut header = format!("Table: {}", table.table_name);
            if let Some(alias) = table.alias.as_deref().filter(|a| !a.is_empty()) {
                header.push_str(&format!(" ({})", alias));
            }
            format!("{}\nColumns:\n{}", header, columns)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut content = format!("# {}\n\n## Data Structure\n{}", datasource_name, schema_desc);

    if !sample_rows.is_empty() {
        let rows = &sample_rows[..sample_rows.len().min(MAX_SAMPLE_ROWS)];
        // Value 직렬화는 실패하지 않음
        let json = serde_json::to_string_pretty(rows).unwrap_or_default();
        content.push_str("\n\n## Sample Data\n");
        content.push_str(&json);
    }

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), Value::from(datasource_id));
    metadata.insert("sourceType".to_string(), Value::from("datasource"));
    metadata.insert(
        "tags".to_string(),
        Value::from(vec!["datasource".to_string(), datasource_name.to_string()]),
    );

    NewDocument::new(format!("Data source: {}", datasource_name), content)
        .with_type(DocumentType::Datasource)
        .with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_accepts_camel_case() {
        let raw = r#"[{
            "tableName": "orders",
            "tableNameCn": "주문",
            "columns": [
                {"name": "id", "type": "int", "isPrimaryKey": true},
                {"name": "user_id", "type": "int", "comment": "buyer", "isForeignKey": true}
            ]
        }]"#;
        let tables: Vec<TableSchema> = serde_json::from_str(raw).unwrap();
        assert_eq!(tables[0].table_name, "orders");
        assert_eq!(tables[0].alias.as_deref(), Some("주문"));
        assert!(tables[0].columns[0].is_primary_key);
        assert_eq!(tables[0].columns[1].description.as_deref(), Some("buyer"));
    }

    #[test]
    fn test_data_source_document() {
        let tables = vec![TableSchema::new(
            "orders",
            vec![ColumnSchema::new("id", "int"), ColumnSchema::new("amount", "decimal")],
        )];
        let rows: Vec<Value> = (0..8).map(|i| json!({"id": i})).collect();

        let doc = data_source_document("ds-1", "Shop", &tables, &rows);
        assert_eq!(doc.doc_type, DocumentType::Datasource);
        assert_eq!(doc.title, "Data source: Shop");
        assert!(doc.content.starts_with("# Shop\n\n## Data Structure\nTable: orders"));
        assert!(doc.content.contains("  - amount (decimal)"));
        assert!(doc.content.contains("\"id\": 4"));
        assert!(!doc.content.contains("\"id\": 5"));
        assert_eq!(doc.metadata["source"], "ds-1");
    }

    #[test]
    fn test_data_source_document_without_samples() {
        let doc = data_source_document("ds", "Empty", &[], &[]);
        assert!(!doc.content.contains("Sample Data"));
    }
}
