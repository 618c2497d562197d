use super::*;

use shared::{
    catalog::{Catalog, CatalogDateDataset, ObjectMeta},
    domain::{DashboardLayout, LayoutSection, SectionHeader},
};

fn document(title: &str) -> DashboardDocument {
    DashboardDocument {
        title: title.to_string(),
        layout: DashboardLayout {
            sections: vec![LayoutSection {
                header: Some(SectionHeader {
                    title: Some("Overview".into()),
                    description: None,
                }),
                items: Vec::new(),
            }],
        },
        ..DashboardDocument::default()
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn saving_new_dashboard_assigns_identity() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let stored = storage
        .save_dashboard("ws", &document("Sales"))
        .await
        .expect("save");

    let identifier = stored.identifier.clone().expect("identifier");
    assert_eq!(stored.dashboard_ref, Some(ObjRef::Identifier(identifier.clone())));
    assert_eq!(
        stored.filter_context_ref,
        Some(ObjRef::Identifier(format!("{identifier}.filter_context")))
    );
    assert!(stored.updated.is_some());

    let loaded = storage
        .load_dashboard("ws", &ObjRef::Identifier(identifier.clone()))
        .await
        .expect("load")
        .expect("dashboard present");
    assert_eq!(loaded, stored);

    let by_uri = storage
        .load_dashboard("ws", &ObjRef::Uri(dashboard_uri("ws", &identifier)))
        .await
        .expect("load by uri");
    assert_eq!(by_uri, Some(stored));
}

#[tokio::test]
async fn saving_existing_dashboard_updates_in_place() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut stored = storage
        .save_dashboard("ws", &document("Sales"))
        .await
        .expect("save");
    stored.title = "Sales (EMEA)".into();

    let updated = storage.save_dashboard("ws", &stored).await.expect("update");
    assert_eq!(updated.identifier, stored.identifier);

    let listed = storage.list_dashboards("ws").await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "Sales (EMEA)");
}

#[tokio::test]
async fn saving_unknown_ref_fails() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut doc = document("Ghost");
    doc.dashboard_ref = Some(ObjRef::identifier("missing"));

    let err = storage
        .save_dashboard("ws", &doc)
        .await
        .expect_err("unknown ref must fail");
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn dashboards_are_scoped_by_workspace() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_dashboard("ws-a", &document("A"))
        .await
        .expect("save a");
    storage
        .save_dashboard("ws-b", &document("B"))
        .await
        .expect("save b");

    let listed = storage.list_dashboards("ws-a").await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "A");
}

#[tokio::test]
async fn deletes_dashboard_once() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let stored = storage
        .save_dashboard("ws", &document("Sales"))
        .await
        .expect("save");
    let dashboard_ref = stored.dashboard_ref.expect("ref");

    assert!(storage
        .delete_dashboard("ws", &dashboard_ref)
        .await
        .expect("delete"));
    assert!(!storage
        .delete_dashboard("ws", &dashboard_ref)
        .await
        .expect("second delete"));
    assert!(storage
        .load_dashboard("ws", &dashboard_ref)
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn workspace_metadata_round_trips_and_overwrites() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage
        .load_workspace_metadata("ws")
        .await
        .expect("load")
        .is_none());

    let mut metadata = WorkspaceMetadata {
        catalog: Catalog {
            date_data_sets: vec![CatalogDateDataset {
                meta: ObjectMeta::new("created", "Created"),
            }],
            ..Catalog::default()
        },
        ..WorkspaceMetadata::default()
    };
    storage
        .save_workspace_metadata("ws", &metadata)
        .await
        .expect("save");

    metadata.settings.settings.enable_xlsx_export = false;
    storage
        .save_workspace_metadata("ws", &metadata)
        .await
        .expect("overwrite");

    let loaded = storage
        .load_workspace_metadata("ws")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded, metadata);
}
