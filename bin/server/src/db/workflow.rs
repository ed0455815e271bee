//! Workflow definition storage.
//!
//! The server never edits workflows; deployments seed them at boot from a
//! JSON file ([`WorkflowRepository::seed_from_file`], wired to
//! `SEED_WORKFLOWS_PATH`), and the engine reads them back through
//! [`PgWorkflowSource`]. The graph itself travels as one JSONB document and
//! is validated by the engine, not here.

use amber_loom_core::{UserId, WorkflowId};
use amber_loom_workflow::definition::{Workflow, WorkflowDefinition, WorkflowStatus};
use amber_loom_workflow::store::{StoreError, WorkflowSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

use super::to_store_error;

fn status_as_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Draft => "DRAFT",
        WorkflowStatus::Active => "ACTIVE",
        WorkflowStatus::Inactive => "INACTIVE",
        WorkflowStatus::Archived => "ARCHIVED",
    }
}

fn status_from_str(s: &str) -> Option<WorkflowStatus> {
    match s {
        "DRAFT" => Some(WorkflowStatus::Draft),
        "ACTIVE" => Some(WorkflowStatus::Active),
        "INACTIVE" => Some(WorkflowStatus::Inactive),
        "ARCHIVED" => Some(WorkflowStatus::Archived),
        _ => None,
    }
}

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    owner_id: String,
    status: String,
    definition: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid workflow id '{}': {}", self.id, e),
            )))
        })?;
        let owner_id = UserId::from_str(&self.owner_id).map_err(|e| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid owner id '{}': {}", self.owner_id, e),
            )))
        })?;
        let status = status_from_str(&self.status).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown workflow status '{}'", self.status),
            )))
        })?;
        let definition: WorkflowDefinition =
            serde_json::from_value(self.definition).map_err(|e| {
                sqlx::Error::Decode(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid workflow definition: {e}"),
                )))
            })?;

        Ok(Workflow {
            id,
            name: self.name,
            description: self.description,
            owner_id,
            status,
            definition,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Why a seed file could not be applied.
#[derive(Debug)]
pub enum SeedError {
    /// The seed file could not be read.
    Io(std::io::Error),
    /// The seed file is not a JSON array of workflow documents.
    Parse(serde_json::Error),
    /// A lookup or insert against the workflows table failed.
    Db(sqlx::Error),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "seed file could not be read: {e}"),
            Self::Parse(e) => write!(f, "seed file could not be parsed: {e}"),
            Self::Db(e) => write!(f, "seeding workflows failed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Db(e) => Some(e),
        }
    }
}

/// Repository for workflow definitions.
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a workflow by ID.
    pub async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, sqlx::Error> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, owner_id, status, definition,
                   created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_workflow()?)),
            None => Ok(None),
        }
    }

    /// Creates a new workflow.
    pub async fn create(&self, workflow: &Workflow) -> Result<(), sqlx::Error> {
        let definition = serde_json::to_value(&workflow.definition)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, name, description, owner_id, status, definition, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.owner_id.to_string())
        .bind(status_as_str(workflow.status))
        .bind(&definition)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts every workflow in the seed file that is not already present.
    ///
    /// The file holds a JSON array of complete workflow documents. Entries
    /// whose id already exists are left untouched, so applying the seed on
    /// every boot is safe. Returns the number of rows inserted.
    pub async fn seed_from_file(&self, path: &str) -> Result<usize, SeedError> {
        let contents = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        let workflows: Vec<Workflow> =
            serde_json::from_str(&contents).map_err(SeedError::Parse)?;

        let mut inserted = 0;
        for workflow in &workflows {
            if self
                .find_by_id(workflow.id)
                .await
                .map_err(SeedError::Db)?
                .is_some()
            {
                continue;
            }
            self.create(workflow).await.map_err(SeedError::Db)?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

/// [`WorkflowSource`] backed by the workflows table.
pub struct PgWorkflowSource {
    repo: WorkflowRepository,
}

impl PgWorkflowSource {
    /// Creates a source reading from the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: WorkflowRepository::new(pool),
        }
    }
}

#[async_trait]
impl WorkflowSource for PgWorkflowSource {
    async fn fetch(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        self.repo
            .find_by_id(workflow_id)
            .await
            .map_err(to_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_loom_workflow::edge::WorkflowEdge;
    use amber_loom_workflow::node::{NodeKind, WorkflowNode};
    use serde_json::json;
    use std::io::Write;

    fn sample_row() -> WorkflowRow {
        let definition = WorkflowDefinition::new(
            vec![
                WorkflowNode::new("start", NodeKind::Start),
                WorkflowNode::new("end", NodeKind::End),
            ],
            vec![WorkflowEdge::new("e1", "start", "end")],
        );
        WorkflowRow {
            id: WorkflowId::new().to_string(),
            name: "triage".to_string(),
            description: Some("inbox triage".to_string()),
            owner_id: UserId::new().to_string(),
            status: "ACTIVE".to_string(),
            definition: serde_json::to_value(&definition).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_workflow() {
        let row = sample_row();
        let workflow = row.try_into_workflow().unwrap();
        assert_eq!(workflow.name, "triage");
        assert_eq!(workflow.status, WorkflowStatus::Active);
        assert_eq!(workflow.definition.nodes.len(), 2);
    }

    #[test]
    fn bad_id_fails_decoding() {
        let mut row = sample_row();
        row.id = "not-an-id".to_string();
        let err = row.try_into_workflow().unwrap_err();
        assert!(err.to_string().contains("invalid workflow id"));
    }

    #[test]
    fn unknown_status_fails_decoding() {
        let mut row = sample_row();
        row.status = "PUBLISHED".to_string();
        let err = row.try_into_workflow().unwrap_err();
        assert!(err.to_string().contains("unknown workflow status"));
    }

    #[test]
    fn malformed_definition_fails_decoding() {
        let mut row = sample_row();
        row.definition = json!({"nodes": "not-an-array"});
        let err = row.try_into_workflow().unwrap_err();
        assert!(err.to_string().contains("invalid workflow definition"));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            WorkflowStatus::Draft,
            WorkflowStatus::Active,
            WorkflowStatus::Inactive,
            WorkflowStatus::Archived,
        ] {
            assert_eq!(status_from_str(status_as_str(status)), Some(status));
        }
        assert_eq!(status_from_str("draft"), None);
    }

    // Never connects; good enough for paths that fail before any query.
    fn offline_repo() -> WorkflowRepository {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://127.0.0.1/amber_loom_unused")
            .expect("lazy pool");
        WorkflowRepository::new(pool)
    }

    #[test]
    fn seed_file_parses_into_workflows() {
        let definition = serde_json::to_value(WorkflowDefinition::new(
            vec![
                WorkflowNode::new("start", NodeKind::Start),
                WorkflowNode::new("end", NodeKind::End),
            ],
            vec![WorkflowEdge::new("e1", "start", "end")],
        ))
        .unwrap();

        // Ids are bare ULIDs on the wire; Display adds the prefix back.
        let seed = json!([
            {
                "id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
                "name": "triage",
                "owner_id": "01BX5ZZKBKACTAV9WEVGEMMVRY",
                "status": "ACTIVE",
                "definition": definition,
                "created_at": "2025-06-01T00:00:00Z",
                "updated_at": "2025-06-01T00:00:00Z",
            }
        ]);

        let workflows: Vec<Workflow> = serde_json::from_value(seed).unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].name, "triage");
        assert_eq!(workflows[0].status, WorkflowStatus::Active);
        assert_eq!(workflows[0].description, None);
        assert_eq!(
            workflows[0].id.to_string(),
            "wf_01ARZ3NDEKTSV4RRFFQ69G5FAV"
        );
    }

    #[tokio::test]
    async fn seed_from_file_missing_file_is_an_io_error() {
        let err = offline_repo()
            .seed_from_file("/definitely/not/here/seed.json")
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::Io(_)));
        assert!(err.to_string().contains("seed file could not be read"));
    }

    #[tokio::test]
    async fn seed_from_file_rejects_malformed_json() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not a seed file").expect("write seed");

        let err = offline_repo()
            .seed_from_file(tmp.path().to_str().expect("utf-8 path"))
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::Parse(_)));
        assert!(err.to_string().contains("seed file could not be parsed"));
    }
}
