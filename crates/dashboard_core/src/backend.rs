use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    catalog::Catalog,
    domain::{DashboardDocument, ObjRef, WorkspaceSettings},
    error::{ErrorCode, ErrorPayload},
    execution::{ExecutionDefinition, ExecutionResult, ExecutionSubject, ExportConfig, ExportResult},
    filters::AttributeElement,
};
use thiserror::Error;
use tracing::warn;

use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCapabilities {
    /// Parent filters may declare the attributes they connect over.
    pub supports_setting_connecting_attributes: bool,
    pub supports_element_uris: bool,
    pub supports_circular_dependencies_in_filters: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("unexpected backend error: {0}")]
    Unexpected(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let code = match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Unexpected(_) => ErrorCode::Internal,
        };
        ErrorPayload::new(code, self.to_string())
    }
}

/// Analytical backend the engine consumes: metadata, persistence, and query execution.
#[async_trait]
pub trait AnalyticalBackend: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    /// Base URL used to make relative resource URIs absolute.
    fn hostname(&self) -> Option<String> {
        None
    }

    async fn get_catalog(&self, workspace: &str) -> Result<Catalog, BackendError>;
    async fn get_workspace_settings(&self, workspace: &str)
        -> Result<WorkspaceSettings, BackendError>;
    async fn get_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError>;
    async fn save_dashboard(
        &self,
        workspace: &str,
        document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError>;
    async fn delete_dashboard(&self, workspace: &str, dashboard_ref: &ObjRef)
        -> Result<(), BackendError>;
    async fn execute_query(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError>;
    async fn export_execution(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
        config: &ExportConfig,
    ) -> Result<ExportResult, BackendError>;
    /// For each `(left, right)` attribute pair, the attributes both roll up to.
    async fn get_common_attribute_ancestors(
        &self,
        workspace: &str,
        pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError>;
    async fn get_available_date_datasets(
        &self,
        workspace: &str,
        subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError>;
    async fn get_attribute_elements(
        &self,
        workspace: &str,
        display_form: &ObjRef,
        limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError>;
}

pub struct MissingBackend;

fn missing(workspace: &str) -> BackendError {
    BackendError::Unavailable(format!("no analytical backend configured for workspace {workspace}"))
}

#[async_trait]
impl AnalyticalBackend for MissingBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    async fn get_catalog(&self, workspace: &str) -> Result<Catalog, BackendError> {
        Err(missing(workspace))
    }

    async fn get_workspace_settings(
        &self,
        workspace: &str,
    ) -> Result<WorkspaceSettings, BackendError> {
        Err(missing(workspace))
    }

    async fn get_dashboard(
        &self,
        workspace: &str,
        _dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError> {
        Err(missing(workspace))
    }

    async fn save_dashboard(
        &self,
        workspace: &str,
        _document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError> {
        Err(missing(workspace))
    }

    async fn delete_dashboard(
        &self,
        workspace: &str,
        _dashboard_ref: &ObjRef,
    ) -> Result<(), BackendError> {
        Err(missing(workspace))
    }

    async fn execute_query(
        &self,
        workspace: &str,
        _definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        Err(missing(workspace))
    }

    async fn export_execution(
        &self,
        workspace: &str,
        _definition: &ExecutionDefinition,
        _config: &ExportConfig,
    ) -> Result<ExportResult, BackendError> {
        Err(missing(workspace))
    }

    async fn get_common_attribute_ancestors(
        &self,
        workspace: &str,
        _pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError> {
        Err(missing(workspace))
    }

    async fn get_available_date_datasets(
        &self,
        workspace: &str,
        _subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError> {
        Err(missing(workspace))
    }

    async fn get_attribute_elements(
        &self,
        workspace: &str,
        _display_form: &ObjRef,
        _limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError> {
        Err(missing(workspace))
    }
}

/// Retries transient failures of the wrapped backend with exponential backoff.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: AnalyticalBackend> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, BackendError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff();
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        "backend call failed; retrying operation={} attempt={} max_attempts={} error={}",
                        operation, attempt, max_attempts, err
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(self.policy.backoff_multiplier.max(1.0));
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<B: AnalyticalBackend> AnalyticalBackend for RetryingBackend<B> {
    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }

    fn hostname(&self) -> Option<String> {
        self.inner.hostname()
    }

    async fn get_catalog(&self, workspace: &str) -> Result<Catalog, BackendError> {
        self.retry("get_catalog", || self.inner.get_catalog(workspace))
            .await
    }

    async fn get_workspace_settings(
        &self,
        workspace: &str,
    ) -> Result<WorkspaceSettings, BackendError> {
        self.retry("get_workspace_settings", || {
            self.inner.get_workspace_settings(workspace)
        })
        .await
    }

    async fn get_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError> {
        self.retry("get_dashboard", || {
            self.inner.get_dashboard(workspace, dashboard_ref)
        })
        .await
    }

    async fn save_dashboard(
        &self,
        workspace: &str,
        document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError> {
        self.retry("save_dashboard", || {
            self.inner.save_dashboard(workspace, document.clone())
        })
        .await
    }

    async fn delete_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<(), BackendError> {
        self.retry("delete_dashboard", || {
            self.inner.delete_dashboard(workspace, dashboard_ref)
        })
        .await
    }

    async fn execute_query(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        self.retry("execute_query", || {
            self.inner.execute_query(workspace, definition)
        })
        .await
    }

    async fn export_execution(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
        config: &ExportConfig,
    ) -> Result<ExportResult, BackendError> {
        self.retry("export_execution", || {
            self.inner.export_execution(workspace, definition, config)
        })
        .await
    }

    async fn get_common_attribute_ancestors(
        &self,
        workspace: &str,
        pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError> {
        self.retry("get_common_attribute_ancestors", || {
            self.inner.get_common_attribute_ancestors(workspace, pairs)
        })
        .await
    }

    async fn get_available_date_datasets(
        &self,
        workspace: &str,
        subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError> {
        self.retry("get_available_date_datasets", || {
            self.inner.get_available_date_datasets(workspace, subject)
        })
        .await
    }

    async fn get_attribute_elements(
        &self,
        workspace: &str,
        display_form: &ObjRef,
        limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError> {
        self.retry("get_attribute_elements", || {
            self.inner.get_attribute_elements(workspace, display_form, limit)
        })
        .await
    }
}

#[async_trait]
impl<T: AnalyticalBackend + ?Sized> AnalyticalBackend for std::sync::Arc<T> {
    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }

    fn hostname(&self) -> Option<String> {
        (**self).hostname()
    }

    async fn get_catalog(&self, workspace: &str) -> Result<Catalog, BackendError> {
        (**self).get_catalog(workspace).await
    }

    async fn get_workspace_settings(
        &self,
        workspace: &str,
    ) -> Result<WorkspaceSettings, BackendError> {
        (**self).get_workspace_settings(workspace).await
    }

    async fn get_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError> {
        (**self).get_dashboard(workspace, dashboard_ref).await
    }

    async fn save_dashboard(
        &self,
        workspace: &str,
        document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError> {
        (**self).save_dashboard(workspace, document).await
    }

    async fn delete_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<(), BackendError> {
        (**self).delete_dashboard(workspace, dashboard_ref).await
    }

    async fn execute_query(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        (**self).execute_query(workspace, definition).await
    }

    async fn export_execution(
        &self,
        workspace: &str,
        definition: &ExecutionDefinition,
        config: &ExportConfig,
    ) -> Result<ExportResult, BackendError> {
        (**self).export_execution(workspace, definition, config).await
    }

    async fn get_common_attribute_ancestors(
        &self,
        workspace: &str,
        pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError> {
        (**self).get_common_attribute_ancestors(workspace, pairs).await
    }

    async fn get_available_date_datasets(
        &self,
        workspace: &str,
        subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError> {
        (**self).get_available_date_datasets(workspace, subject).await
    }

    async fn get_attribute_elements(
        &self,
        workspace: &str,
        display_form: &ObjRef,
        limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError> {
        (**self)
            .get_attribute_elements(workspace, display_form, limit)
            .await
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
