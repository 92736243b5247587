//! # Run Store
//!
//! Persists finished tutorial runs and their audit events.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use super::db::PrimerDb;
use super::pipeline_state::TutorialResult;
use crate::workflow::PipelineEvent;

/// Listing row for stored runs
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub library: String,
    pub status: String,
    pub revision_count: u32,
    pub created_at: String,
}

/// Read/write access to the `runs` and `events` tables
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    pub fn new(db: &PrimerDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Insert or replace a finished run
    pub fn save(&self, result: &TutorialResult) -> Result<()> {
        let json = serde_json::to_string(result).context("Failed to serialize run")?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO runs (id, library, status, revision_count, result_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                result.run_id,
                result.library_name,
                result.status.as_str(),
                result.revision_count,
                json,
                result.started_at.to_rfc3339(),
            ],
        )
        .context("Failed to save run")?;

        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<TutorialResult>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let json: Option<String> = conn
            .query_row(
                "SELECT result_json FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("Corrupt run record"))
            .transpose()
    }

    /// Most recent runs first
    pub fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, library, status, revision_count, created_at
            FROM runs
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunSummary {
                    id: row.get(0)?,
                    library: row.get(1)?,
                    status: row.get(2)?,
                    revision_count: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")?;

        Ok(rows)
    }

    pub fn append_event(&self, event: &PipelineEvent) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        insert_event(&conn, event)
    }

    pub fn events_for(&self, run_id: &str) -> Result<Vec<PipelineEvent>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT payload_json FROM events WHERE run_id = ?1 ORDER BY recorded_at ASC, rowid ASC",
        )?;
        let payloads = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).context("Corrupt event record"))
            .collect()
    }
}

pub(crate) fn insert_event(conn: &Connection, event: &PipelineEvent) -> Result<()> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        r#"
        INSERT OR IGNORE INTO events (id, run_id, kind, stage, status, duration_ms, payload_json, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            event.id,
            event.run_id,
            event.kind.as_str(),
            event.stage.as_str(),
            event.status.as_str(),
            event.duration_ms as i64,
            payload,
            event.timestamp.to_rfc3339(),
        ],
    )
    .context("Failed to insert event")?;
    Ok(())
}
