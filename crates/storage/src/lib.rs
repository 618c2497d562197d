use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    catalog::WorkspaceMetadata,
    domain::{DashboardDocument, DashboardSummary, ObjRef},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_workspace_metadata(
        &self,
        workspace: &str,
        metadata: &WorkspaceMetadata,
    ) -> Result<()> {
        let raw = serde_json::to_string(metadata).context("failed to encode workspace metadata")?;
        sqlx::query(
            "INSERT INTO workspaces (workspace, metadata, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(workspace) DO UPDATE SET metadata=excluded.metadata, updated_at=excluded.updated_at",
        )
        .bind(workspace)
        .bind(raw)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store metadata for workspace '{workspace}'"))?;
        Ok(())
    }

    pub async fn load_workspace_metadata(
        &self,
        workspace: &str,
    ) -> Result<Option<WorkspaceMetadata>> {
        let row = sqlx::query("SELECT metadata FROM workspaces WHERE workspace = ?")
            .bind(workspace)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let raw = r.get::<String, _>(0);
            serde_json::from_str(&raw)
                .with_context(|| format!("corrupt metadata stored for workspace '{workspace}'"))
        })
        .transpose()
    }

    /// Inserts or updates a dashboard. New documents get an identifier, a ref and a
    /// filter context ref assigned; the stored copy is returned.
    pub async fn save_dashboard(
        &self,
        workspace: &str,
        document: &DashboardDocument,
    ) -> Result<DashboardDocument> {
        let identifier = match (&document.dashboard_ref, &document.identifier) {
            (Some(dashboard_ref), _) => self
                .resolve_identifier(workspace, dashboard_ref)
                .await?
                .ok_or_else(|| anyhow!("dashboard {dashboard_ref} does not exist"))?,
            (None, Some(identifier)) => identifier.clone(),
            (None, None) => uuid::Uuid::new_v4().simple().to_string(),
        };

        let updated = Utc::now();
        let mut stored = document.clone();
        stored.dashboard_ref = Some(ObjRef::Identifier(identifier.clone()));
        stored.identifier = Some(identifier.clone());
        stored.updated = Some(updated);
        if stored.filter_context_ref.is_none() {
            stored.filter_context_ref =
                Some(ObjRef::Identifier(format!("{identifier}.filter_context")));
        }

        let raw = serde_json::to_string(&stored).context("failed to encode dashboard document")?;
        sqlx::query(
            "INSERT INTO dashboards (workspace, identifier, uri, title, document, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(workspace, identifier) DO UPDATE SET
                title=excluded.title, document=excluded.document, updated_at=excluded.updated_at",
        )
        .bind(workspace)
        .bind(&identifier)
        .bind(dashboard_uri(workspace, &identifier))
        .bind(&stored.title)
        .bind(raw)
        .bind(updated)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store dashboard '{identifier}'"))?;

        Ok(stored)
    }

    pub async fn load_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<Option<DashboardDocument>> {
        let row = sqlx::query(
            "SELECT document FROM dashboards WHERE workspace = ? AND (identifier = ? OR uri = ?)",
        )
        .bind(workspace)
        .bind(ref_identifier(dashboard_ref))
        .bind(ref_uri(dashboard_ref))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            let raw = r.get::<String, _>(0);
            serde_json::from_str(&raw)
                .with_context(|| format!("corrupt document stored for dashboard {dashboard_ref}"))
        })
        .transpose()
    }

    pub async fn delete_dashboard(&self, workspace: &str, dashboard_ref: &ObjRef) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM dashboards WHERE workspace = ? AND (identifier = ? OR uri = ?)",
        )
        .bind(workspace)
        .bind(ref_identifier(dashboard_ref))
        .bind(ref_uri(dashboard_ref))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_dashboards(&self, workspace: &str) -> Result<Vec<DashboardSummary>> {
        let rows = sqlx::query(
            "SELECT identifier, title, updated_at FROM dashboards WHERE workspace = ? ORDER BY title, identifier",
        )
        .bind(workspace)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let identifier = r.get::<String, _>(0);
                DashboardSummary {
                    dashboard_ref: ObjRef::Identifier(identifier.clone()),
                    identifier,
                    title: r.get::<String, _>(1),
                    updated: r.get::<Option<DateTime<Utc>>, _>(2),
                }
            })
            .collect())
    }

    async fn resolve_identifier(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT identifier FROM dashboards WHERE workspace = ? AND (identifier = ? OR uri = ?)",
        )
        .bind(workspace)
        .bind(ref_identifier(dashboard_ref))
        .bind(ref_uri(dashboard_ref))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }
}

pub fn dashboard_uri(workspace: &str, identifier: &str) -> String {
    format!("/workspaces/{workspace}/dashboards/{identifier}")
}

fn ref_identifier(dashboard_ref: &ObjRef) -> Option<&str> {
    match dashboard_ref {
        ObjRef::Identifier(id) => Some(id),
        ObjRef::Uri(_) => None,
    }
}

fn ref_uri(dashboard_ref: &ObjRef) -> Option<&str> {
    match dashboard_ref {
        ObjRef::Uri(uri) => Some(uri),
        ObjRef::Identifier(_) => None,
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
