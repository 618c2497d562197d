use async_trait::async_trait;
use shared::{
    catalog::{Catalog, WorkspaceMetadata},
    domain::{DashboardDocument, ObjRef, WorkspaceSettings},
    execution::{ExecutionDefinition, ExecutionResult, ExecutionSubject, ExportConfig, ExportResult},
    filters::AttributeElement,
};
use storage::Storage;
use tracing::debug;

use crate::backend::{AnalyticalBackend, BackendCapabilities, BackendError};

fn storage_error(err: anyhow::Error) -> BackendError {
    BackendError::Unexpected(format!("{err:#}"))
}

/// Backend over the local dashboard store. Metadata and persistence only; query execution
/// needs a real analytical backend.
#[derive(Clone)]
pub struct DurableBackend {
    storage: Storage,
}

impl DurableBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn metadata(&self, workspace: &str) -> Result<WorkspaceMetadata, BackendError> {
        let metadata = self
            .storage
            .load_workspace_metadata(workspace)
            .await
            .map_err(storage_error)?;
        if metadata.is_none() {
            debug!("no stored metadata for workspace={}; using defaults", workspace);
        }
        Ok(metadata.unwrap_or_default())
    }
}

#[async_trait]
impl AnalyticalBackend for DurableBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_setting_connecting_attributes: true,
            supports_element_uris: false,
            supports_circular_dependencies_in_filters: false,
        }
    }

    async fn get_catalog(&self, workspace: &str) -> Result<Catalog, BackendError> {
        Ok(self.metadata(workspace).await?.catalog)
    }

    async fn get_workspace_settings(&self, workspace: &str) -> Result<WorkspaceSettings, BackendError> {
        Ok(self.metadata(workspace).await?.settings)
    }

    async fn get_dashboard(
        &self,
        workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError> {
        self.storage
            .load_dashboard(workspace, dashboard_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| BackendError::NotFound(format!("dashboard {dashboard_ref}")))
    }

    async fn save_dashboard(
        &self,
        workspace: &str,
        document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError> {
        self.storage
            .save_dashboard(workspace, &document)
            .await
            .map_err(storage_error)
    }

    async fn delete_dashboard(&self, workspace: &str, dashboard_ref: &ObjRef) -> Result<(), BackendError> {
        let deleted = self
            .storage
            .delete_dashboard(workspace, dashboard_ref)
            .await
            .map_err(storage_error)?;
        if deleted {
            Ok(())
        } else {
            Err(BackendError::NotFound(format!("dashboard {dashboard_ref}")))
        }
    }

    async fn execute_query(
        &self,
        _workspace: &str,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        Err(BackendError::Unsupported(format!(
            "executing widget {} against the local store",
            definition.widget_ref
        )))
    }

    async fn export_execution(
        &self,
        _workspace: &str,
        definition: &ExecutionDefinition,
        _config: &ExportConfig,
    ) -> Result<ExportResult, BackendError> {
        Err(BackendError::Unsupported(format!(
            "exporting widget {} from the local store",
            definition.widget_ref
        )))
    }

    async fn get_common_attribute_ancestors(
        &self,
        workspace: &str,
        pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError> {
        let catalog = self.get_catalog(workspace).await?;
        Ok(pairs
            .iter()
            .map(|(left, right)| catalog.common_ancestors(left, right))
            .collect())
    }

    async fn get_available_date_datasets(
        &self,
        workspace: &str,
        subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError> {
        let catalog = self.get_catalog(workspace).await?;
        let data_sets = match subject {
            ExecutionSubject::Measure(measure) => catalog
                .measure(measure)
                .map(|measure| measure.date_data_sets.clone())
                .unwrap_or_default(),
            ExecutionSubject::Insight(_) => catalog
                .date_data_sets
                .iter()
                .map(|data_set| data_set.meta.obj_ref())
                .collect(),
        };
        Ok(data_sets)
    }

    async fn get_attribute_elements(
        &self,
        _workspace: &str,
        display_form: &ObjRef,
        _limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError> {
        Err(BackendError::Unsupported(format!(
            "listing elements of {display_form} from the local store"
        )))
    }
}

#[cfg(test)]
#[path = "tests/durable_backend_tests.rs"]
mod tests;
