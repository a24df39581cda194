//! SQLite implementation of [`StoreBackend`]

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::backend::StoreBackend;
use crate::error::StoreError;
use crate::models::{AnalysisRecord, NewWorkItem, WorkItem};

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn item_from_row(row: &SqliteRow) -> WorkItem {
    WorkItem {
        item_id: row.get("item_id"),
        natural_key: row.get("natural_key"),
        primary_text: row.get("primary_text"),
        secondary_text: row.get("secondary_text"),
        external_ref: row.get("external_ref"),
        enrichment: row.get("enrichment"),
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn fetch_item(&self, item_id: i64) -> Result<Option<WorkItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT item_id, natural_key, primary_text, secondary_text, external_ref, enrichment
            FROM work_items
            WHERE item_id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(item_from_row))
    }

    async fn list_domain_items(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT w.item_id, w.natural_key, w.primary_text, w.secondary_text, w.external_ref, w.enrichment
            FROM work_items w
            JOIN domain_items d ON d.item_id = w.item_id
            WHERE d.domain_key = ?
            ORDER BY w.natural_key ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(domain_key)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(item_from_row).collect())
    }

    async fn list_domain_item_ids(
        &self,
        domain_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT item_id FROM domain_items
            WHERE domain_key = ?
            ORDER BY item_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(domain_key)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn list_recorded_item_ids(
        &self,
        domain_key: &str,
        idempotency_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT a.item_id
            FROM analysis_records a
            JOIN domain_items d ON d.item_id = a.item_id
            WHERE d.domain_key = ? AND a.idempotency_key = ?
            ORDER BY a.item_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(domain_key)
        .bind(idempotency_key)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn recorded_among(&self, idempotency_key: &str, item_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT item_id FROM analysis_records WHERE idempotency_key = ");
        qb.push_bind(idempotency_key.to_string());
        qb.push(" AND item_id IN (");
        let mut separated = qb.separated(", ");
        for id in item_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get::<i64, _>("item_id")).collect())
    }

    async fn insert_analysis(
        &self,
        item_id: i64,
        idempotency_key: &str,
        payload: &str,
        created_by: &str,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_records (item_id, idempotency_key, result_payload, created_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(item_id)
        .bind(idempotency_key)
        .bind(payload)
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn fetch_analysis(&self, item_id: i64, idempotency_key: &str) -> Result<Option<AnalysisRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT record_id, item_id, idempotency_key, result_payload, created_by, created_at
            FROM analysis_records
            WHERE item_id = ? AND idempotency_key = ?
            "#,
        )
        .bind(item_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: String = row.get("created_at");
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Fatal(format!("Failed to parse created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(AnalysisRecord {
            record_id: row.get("record_id"),
            item_id: row.get("item_id"),
            idempotency_key: row.get("idempotency_key"),
            result_payload: row.get("result_payload"),
            created_by: row.get("created_by"),
            created_at,
        }))
    }

    async fn set_enrichment(&self, item_id: i64, value: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE work_items SET enrichment = ? WHERE item_id = ?")
            .bind(value)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_items(&self, rows: &[NewWorkItem]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT INTO work_items (natural_key, primary_text, secondary_text, external_ref, ingested_at) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.natural_key.clone())
                .push_bind(row.primary_text.clone())
                .push_bind(row.secondary_text.clone())
                .push_bind(row.external_ref.clone())
                .push_bind(now.clone());
        });
        qb.push(
            r#"
            ON CONFLICT(natural_key) DO UPDATE SET
                primary_text = excluded.primary_text,
                secondary_text = excluded.secondary_text,
                external_ref = excluded.external_ref
            "#,
        );

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_item(&self, row: &NewWorkItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO work_items (natural_key, primary_text, secondary_text, external_ref, ingested_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.natural_key)
        .bind(&row.primary_text)
        .bind(&row.secondary_text)
        .bind(&row.external_ref)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lookup_item_ids(&self, natural_keys: &[String]) -> Result<Vec<(String, i64)>, StoreError> {
        if natural_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT natural_key, item_id FROM work_items WHERE natural_key IN (");
        let mut separated = qb.separated(", ");
        for key in natural_keys {
            separated.push_bind(key.clone());
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("natural_key"), row.get::<i64, _>("item_id")))
            .collect())
    }

    async fn upsert_memberships(&self, domain_key: &str, item_ids: &[i64]) -> Result<(), StoreError> {
        if item_ids.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO domain_items (domain_key, item_id) ");
        qb.push_values(item_ids, |mut b, id| {
            b.push_bind(domain_key.to_string()).push_bind(*id);
        });
        qb.push(" ON CONFLICT(domain_key, item_id) DO NOTHING");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_membership(&self, domain_key: &str, item_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO domain_items (domain_key, item_id) VALUES (?, ?)")
            .bind(domain_key)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prompt_content(&self, prompt_key: &str) -> Result<Option<String>, StoreError> {
        let content = sqlx::query_scalar("SELECT content FROM prompts WHERE prompt_key = ?")
            .bind(prompt_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(content)
    }

    async fn upsert_prompt(&self, prompt_key: &str, content: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO prompts (prompt_key, content, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(prompt_key) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(prompt_key)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
