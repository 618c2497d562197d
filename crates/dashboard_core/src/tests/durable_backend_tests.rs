use super::*;

use std::sync::Arc;

use shared::{
    domain::{DashboardSettings, FilterApplyMode},
    execution::ExportFormat,
    protocol::CommandBody,
};
use tempfile::TempDir;

use crate::{
    dispatcher::DashboardEngine,
    test_support::{df, sample_catalog, sample_dashboard, test_config},
};

const WORKSPACE: &str = "test-ws";

async fn backend() -> (TempDir, DurableBackend) {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("dashboards.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let storage = Storage::new(&database_url).await.expect("db");
    (temp_root, DurableBackend::new(storage))
}

async fn with_metadata(backend: &DurableBackend) {
    backend
        .storage()
        .save_workspace_metadata(
            WORKSPACE,
            &WorkspaceMetadata {
                catalog: sample_catalog(),
                settings: WorkspaceSettings {
                    settings: DashboardSettings {
                        filter_apply_mode: FilterApplyMode::AllAtOnce,
                        ..DashboardSettings::default()
                    },
                    ..WorkspaceSettings::default()
                },
            },
        )
        .await
        .expect("metadata stored");
}

fn new_document() -> DashboardDocument {
    DashboardDocument {
        dashboard_ref: None,
        identifier: None,
        filter_context_ref: None,
        ..sample_dashboard()
    }
}

#[tokio::test]
async fn unknown_workspaces_fall_back_to_defaults() {
    let (_root, backend) = backend().await;
    assert_eq!(backend.get_catalog("nowhere").await.expect("catalog"), Catalog::default());
    assert_eq!(
        backend.get_workspace_settings("nowhere").await.expect("settings"),
        WorkspaceSettings::default()
    );
}

#[tokio::test]
async fn stored_metadata_is_served() {
    let (_root, backend) = backend().await;
    with_metadata(&backend).await;

    assert_eq!(backend.get_catalog(WORKSPACE).await.expect("catalog"), sample_catalog());
    let settings = backend.get_workspace_settings(WORKSPACE).await.expect("settings");
    assert_eq!(settings.settings.filter_apply_mode, FilterApplyMode::AllAtOnce);
}

#[tokio::test]
async fn dashboards_round_trip_by_identifier_and_uri() {
    let (_root, backend) = backend().await;
    let saved = backend
        .save_dashboard(WORKSPACE, new_document())
        .await
        .expect("saved");
    let dashboard_ref = saved.dashboard_ref.clone().expect("ref assigned");
    let identifier = saved.identifier.clone().expect("identifier assigned");
    assert!(saved.filter_context_ref.is_some());
    assert!(saved.updated.is_some());

    let by_ref = backend.get_dashboard(WORKSPACE, &dashboard_ref).await.expect("by ref");
    assert_eq!(by_ref.layout, sample_dashboard().layout);
    let uri = ObjRef::uri(storage::dashboard_uri(WORKSPACE, &identifier));
    let by_uri = backend.get_dashboard(WORKSPACE, &uri).await.expect("by uri");
    assert_eq!(by_uri.title, "Sales");

    backend.delete_dashboard(WORKSPACE, &uri).await.expect("deleted");
    assert!(matches!(
        backend.get_dashboard(WORKSPACE, &dashboard_ref).await,
        Err(BackendError::NotFound(_))
    ));
    assert!(matches!(
        backend.delete_dashboard(WORKSPACE, &dashboard_ref).await,
        Err(BackendError::NotFound(_))
    ));
}

#[tokio::test]
async fn saving_an_unknown_ref_is_an_error() {
    let (_root, backend) = backend().await;
    let err = backend
        .save_dashboard(WORKSPACE, sample_dashboard())
        .await
        .expect_err("dash-1 was never stored");
    assert!(matches!(err, BackendError::Unexpected(message) if message.contains("does not exist")));
}

#[tokio::test]
async fn queries_are_not_supported_locally() {
    let (_root, backend) = backend().await;
    let definition = ExecutionDefinition {
        widget_ref: ObjRef::identifier("w-kpi"),
        subject: ExecutionSubject::Measure(ObjRef::identifier("revenue")),
        filters: Vec::new(),
        date_data_set: None,
    };
    assert!(matches!(
        backend.execute_query(WORKSPACE, &definition).await,
        Err(BackendError::Unsupported(_))
    ));
    let config = ExportConfig {
        format: ExportFormat::Csv,
        title: None,
        merge_headers: false,
        include_filter_context: false,
    };
    assert!(matches!(
        backend.export_execution(WORKSPACE, &definition, &config).await,
        Err(BackendError::Unsupported(_))
    ));
    assert!(matches!(
        backend.get_attribute_elements(WORKSPACE, &df("region"), None).await,
        Err(BackendError::Unsupported(_))
    ));
    assert!(!backend.capabilities().supports_element_uris);
}

#[tokio::test]
async fn lineage_questions_are_answered_from_the_catalog() {
    let (_root, backend) = backend().await;
    with_metadata(&backend).await;

    let common = backend
        .get_common_attribute_ancestors(
            WORKSPACE,
            &[(ObjRef::identifier("region"), ObjRef::identifier("city"))],
        )
        .await
        .expect("ancestors");
    assert_eq!(common.len(), 1);
    assert!(common[0].contains(&ObjRef::identifier("region")));
    assert!(common[0].contains(&ObjRef::identifier("country")));
    assert!(!common[0].contains(&ObjRef::identifier("city")));

    let data_sets = backend
        .get_available_date_datasets(
            WORKSPACE,
            &ExecutionSubject::Measure(ObjRef::identifier("orders")),
        )
        .await
        .expect("data sets");
    assert_eq!(data_sets, vec![ObjRef::identifier("created")]);
}

#[tokio::test]
async fn engine_sessions_persist_through_the_store() {
    let (_root, backend) = backend().await;
    with_metadata(&backend).await;
    let engine = DashboardEngine::spawn(Arc::new(backend.clone()), test_config());

    engine
        .dispatch(CommandBody::Initialize {
            dashboard_ref: None,
        })
        .await
        .expect("dispatched");
    engine
        .dispatch(CommandBody::RenameDashboard {
            title: "Local".into(),
        })
        .await
        .expect("dispatched");
    let saved = engine
        .dispatch_and_wait_for(CommandBody::SaveDashboard, "dashboard_saved")
        .await
        .expect("saved");
    let shared::protocol::EventBody::DashboardSaved { dashboard_ref, is_new } = saved.body else {
        panic!("unexpected event {saved:?}");
    };
    assert!(is_new);

    let summaries = backend
        .storage()
        .list_dashboards(WORKSPACE)
        .await
        .expect("listed");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title, "Local");

    let reopened = DashboardEngine::spawn(Arc::new(backend), test_config());
    let outcome = reopened
        .dispatch(CommandBody::Initialize {
            dashboard_ref: Some(dashboard_ref),
        })
        .await
        .expect("dispatched");
    assert!(outcome.is_success(), "{:?}", outcome.failure());
    assert_eq!(reopened.state().meta.title, "Local");
}
