use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    catalog::{
        Catalog, CatalogAttribute, CatalogDateDataset, CatalogDisplayForm, CatalogMeasure,
        ObjectMeta,
    },
    domain::{
        CorrelationId, DashboardDocument, DashboardLayout, FilterLocalId, FilterSettings, InsightWidget,
        ItemSize, KpiWidget, LayoutItem, LayoutSection, ObjRef, RenderMode, RichTextWidget,
        SectionHeader, Widget, WidgetKind, WorkspaceSettings,
    },
    execution::{ExecutionDefinition, ExecutionResult, ExecutionSubject, ExportConfig, ExportResult},
    filters::{
        AttributeElement, AttributeElements, AttributeFilterParent, AttributeFilterSelectionMode,
        DashboardAttributeFilter, DashboardDateFilter, DateBound, DateFilterType, DateGranularity,
        FilterContextDefinition, FilterContextItem,
    },
    protocol::CommandBody,
};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    backend::{AnalyticalBackend, BackendCapabilities, BackendError},
    config::EngineConfig,
    dispatcher::DashboardEngine,
    error::CommandError,
    handlers::{self, HandlerContext, Outcome, SupersededTask, TaskCompletion, TaskRegistry},
    render::RenderCoordinator,
    store::{DashboardState, InitialState, StateMutation, Store},
};

pub(crate) const DASHBOARD_ID: &str = "dash-1";

fn attribute(id: &str, ancestors: &[&str]) -> CatalogAttribute {
    CatalogAttribute {
        meta: ObjectMeta::new(id, id).with_uri(format!("/obj/attr/{id}")),
        display_forms: vec![CatalogDisplayForm {
            meta: ObjectMeta::new(format!("{id}.name"), id)
                .with_uri(format!("/obj/df/{id}.name")),
        }],
        ancestors: ancestors.iter().map(|a| ObjRef::identifier(*a)).collect(),
    }
}

pub(crate) fn sample_catalog() -> Catalog {
    Catalog {
        attributes: vec![
            attribute("country", &[]),
            attribute("region", &["country"]),
            attribute("city", &["region"]),
            attribute("product", &[]),
        ],
        measures: vec![
            CatalogMeasure {
                meta: ObjectMeta::new("revenue", "Revenue"),
                date_data_sets: vec![ObjRef::identifier("created"), ObjRef::identifier("closed")],
            },
            CatalogMeasure {
                meta: ObjectMeta::new("orders", "Orders"),
                date_data_sets: vec![ObjRef::identifier("created")],
            },
        ],
        date_data_sets: vec![
            CatalogDateDataset {
                meta: ObjectMeta::new("created", "Created").with_uri("/obj/ds/created"),
            },
            CatalogDateDataset {
                meta: ObjectMeta::new("closed", "Closed"),
            },
        ],
    }
}

pub(crate) fn df(attribute: &str) -> ObjRef {
    ObjRef::identifier(format!("{attribute}.name"))
}

pub(crate) fn attribute_filter(local_id: &str, attribute: &str) -> DashboardAttributeFilter {
    DashboardAttributeFilter {
        local_identifier: FilterLocalId::new(local_id),
        display_form: df(attribute),
        title: None,
        attribute_elements: AttributeElements::Uris(Vec::new()),
        negative_selection: true,
        selection_mode: AttributeFilterSelectionMode::Multi,
        filter_elements_by: Vec::new(),
    }
}

pub(crate) fn parent(local_id: &str, over: &[&str]) -> AttributeFilterParent {
    AttributeFilterParent {
        filter_local_identifier: FilterLocalId::new(local_id),
        over: over.iter().map(|a| ObjRef::identifier(*a)).collect(),
    }
}

pub(crate) fn widget_item(widget: Widget) -> LayoutItem {
    LayoutItem {
        size: ItemSize {
            grid_width: 6,
            grid_height: None,
        },
        widget,
    }
}

pub(crate) fn insight_widget(id: &str, insight: &str) -> Widget {
    Widget {
        widget_ref: ObjRef::identifier(id),
        title: format!("Insight {id}"),
        description: None,
        kind: WidgetKind::Insight(InsightWidget {
            insight: ObjRef::identifier(insight),
            filter_settings: FilterSettings {
                ignore_dashboard_filters: Vec::new(),
                date_data_set: Some(ObjRef::identifier("created")),
            },
            properties: json!({ "controls": { "legend": true } }),
        }),
    }
}

pub(crate) fn kpi_widget(id: &str, measure: &str) -> Widget {
    Widget {
        widget_ref: ObjRef::identifier(id),
        title: format!("KPI {id}"),
        description: None,
        kind: WidgetKind::Kpi(KpiWidget {
            measure: ObjRef::identifier(measure),
            comparison_type: Default::default(),
            comparison_direction: Default::default(),
            filter_settings: FilterSettings {
                ignore_dashboard_filters: Vec::new(),
                date_data_set: Some(ObjRef::identifier("closed")),
            },
        }),
    }
}

pub(crate) fn rich_text_widget(id: &str) -> Widget {
    Widget {
        widget_ref: ObjRef::identifier(id),
        title: String::new(),
        description: None,
        kind: WidgetKind::RichText(RichTextWidget {
            content: "# Notes".into(),
            filter_settings: FilterSettings::default(),
        }),
    }
}

/// Two sections: insight + KPI, then a rich text. Filters: common date (last 12 months),
/// region, and city narrowed by region.
pub(crate) fn sample_dashboard() -> DashboardDocument {
    let mut city = attribute_filter("f-city", "city");
    city.filter_elements_by = vec![parent("f-region", &["region"])];

    DashboardDocument {
        dashboard_ref: Some(ObjRef::identifier(DASHBOARD_ID)),
        identifier: Some(DASHBOARD_ID.into()),
        title: "Sales".into(),
        description: None,
        layout: DashboardLayout {
            sections: vec![
                LayoutSection {
                    header: Some(SectionHeader {
                        title: Some("Overview".into()),
                        description: None,
                    }),
                    items: vec![
                        widget_item(insight_widget("w-insight", "ins-1")),
                        widget_item(kpi_widget("w-kpi", "revenue")),
                    ],
                },
                LayoutSection {
                    header: None,
                    items: vec![widget_item(rich_text_widget("w-text"))],
                },
            ],
        },
        filter_context: FilterContextDefinition {
            filters: vec![
                FilterContextItem::Date(DashboardDateFilter {
                    local_identifier: None,
                    data_set: None,
                    filter_type: DateFilterType::Relative,
                    granularity: DateGranularity::Month,
                    from: Some(DateBound::Offset(-11)),
                    to: Some(DateBound::Offset(0)),
                    option_local_id: None,
                }),
                FilterContextItem::Attribute(attribute_filter("f-region", "region")),
                FilterContextItem::Attribute(city),
            ],
        },
        filter_context_ref: Some(ObjRef::identifier("dash-1.filter_context")),
        updated: None,
    }
}

#[derive(Default)]
struct Inner {
    dashboards: HashMap<ObjRef, DashboardDocument>,
    failures: HashMap<&'static str, BackendError>,
    calls: Vec<String>,
    delays: HashMap<&'static str, Duration>,
    saved: u32,
}

/// In-memory backend with failure injection, artificial latency, and a call log.
#[derive(Clone)]
pub(crate) struct TestBackend {
    capabilities: BackendCapabilities,
    hostname: Option<String>,
    catalog: Catalog,
    settings: WorkspaceSettings,
    date_data_sets: Option<Vec<ObjRef>>,
    transient_failures: Arc<AtomicU32>,
    inner: Arc<Mutex<Inner>>,
}

impl TestBackend {
    pub(crate) fn new() -> Self {
        let backend = Self {
            capabilities: BackendCapabilities {
                supports_setting_connecting_attributes: true,
                supports_element_uris: true,
                supports_circular_dependencies_in_filters: false,
            },
            hostname: None,
            catalog: sample_catalog(),
            settings: WorkspaceSettings::default(),
            date_data_sets: None,
            transient_failures: Arc::new(AtomicU32::new(0)),
            inner: Arc::new(Mutex::new(Inner::default())),
        };
        backend.insert_dashboard(sample_dashboard());
        backend
    }

    pub(crate) fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub(crate) fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub(crate) fn with_settings(mut self, settings: WorkspaceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Restricts the date datasets offered for every widget.
    pub(crate) fn with_date_data_sets(mut self, data_sets: Vec<ObjRef>) -> Self {
        self.date_data_sets = Some(data_sets);
        self
    }

    pub(crate) fn insert_dashboard(&self, document: DashboardDocument) {
        if let Some(dashboard_ref) = document.dashboard_ref.clone() {
            self.lock().dashboards.insert(dashboard_ref, document);
        }
    }

    pub(crate) fn fail(&self, operation: &'static str, error: BackendError) {
        self.lock().failures.insert(operation, error);
    }

    pub(crate) fn recover(&self, operation: &'static str) {
        self.lock().failures.remove(operation);
    }

    /// The next `count` calls of any operation fail with a transient error.
    pub(crate) fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn delay(&self, operation: &'static str, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub(crate) fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub(crate) fn stored_dashboard(&self, dashboard_ref: &ObjRef) -> Option<DashboardDocument> {
        self.lock().dashboards.get(dashboard_ref).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("test backend lock")
    }

    async fn enter(&self, operation: &'static str) -> Result<(), BackendError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(operation.to_string());
            inner.delays.get(operation).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Unavailable(format!("{operation} flaked")));
        }
        match self.lock().failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AnalyticalBackend for TestBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    async fn get_catalog(&self, _workspace: &str) -> Result<Catalog, BackendError> {
        self.enter("get_catalog").await?;
        Ok(self.catalog.clone())
    }

    async fn get_workspace_settings(
        &self,
        _workspace: &str,
    ) -> Result<WorkspaceSettings, BackendError> {
        self.enter("get_workspace_settings").await?;
        Ok(self.settings.clone())
    }

    async fn get_dashboard(
        &self,
        _workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<DashboardDocument, BackendError> {
        self.enter("get_dashboard").await?;
        self.lock()
            .dashboards
            .get(dashboard_ref)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("dashboard {dashboard_ref}")))
    }

    async fn save_dashboard(
        &self,
        _workspace: &str,
        mut document: DashboardDocument,
    ) -> Result<DashboardDocument, BackendError> {
        self.enter("save_dashboard").await?;
        let mut inner = self.lock();
        if document.dashboard_ref.is_none() {
            inner.saved += 1;
            let identifier = format!("saved-{}", inner.saved);
            document.filter_context_ref =
                Some(ObjRef::identifier(format!("{identifier}.filter_context")));
            document.dashboard_ref = Some(ObjRef::identifier(identifier.clone()));
            document.identifier = Some(identifier);
        }
        document.updated = Some(chrono::Utc::now());
        if let Some(dashboard_ref) = document.dashboard_ref.clone() {
            inner.dashboards.insert(dashboard_ref, document.clone());
        }
        Ok(document)
    }

    async fn delete_dashboard(
        &self,
        _workspace: &str,
        dashboard_ref: &ObjRef,
    ) -> Result<(), BackendError> {
        self.enter("delete_dashboard").await?;
        self.lock()
            .dashboards
            .remove(dashboard_ref)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("dashboard {dashboard_ref}")))
    }

    async fn execute_query(
        &self,
        _workspace: &str,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, BackendError> {
        self.enter("execute_query").await?;
        Ok(ExecutionResult {
            fingerprint: format!("{}:{}", definition.widget_ref, definition.filters.len()),
            total_count: definition.filters.len() as u64,
            data: serde_json::to_value(definition).unwrap_or_default(),
        })
    }

    async fn export_execution(
        &self,
        _workspace: &str,
        definition: &ExecutionDefinition,
        config: &ExportConfig,
    ) -> Result<ExportResult, BackendError> {
        self.enter("export_execution").await?;
        let extension = match config.format {
            shared::execution::ExportFormat::Csv => "csv",
            shared::execution::ExportFormat::Xlsx => "xlsx",
        };
        let name = match &definition.widget_ref {
            ObjRef::Identifier(id) | ObjRef::Uri(id) => id.clone(),
        };
        Ok(ExportResult {
            uri: format!("/exports/{name}.{extension}"),
        })
    }

    async fn get_common_attribute_ancestors(
        &self,
        _workspace: &str,
        pairs: &[(ObjRef, ObjRef)],
    ) -> Result<Vec<Vec<ObjRef>>, BackendError> {
        self.enter("get_common_attribute_ancestors").await?;
        Ok(pairs
            .iter()
            .map(|(left, right)| self.catalog.common_ancestors(left, right))
            .collect())
    }

    async fn get_available_date_datasets(
        &self,
        _workspace: &str,
        subject: &ExecutionSubject,
    ) -> Result<Vec<ObjRef>, BackendError> {
        self.enter("get_available_date_datasets").await?;
        if let Some(data_sets) = &self.date_data_sets {
            return Ok(data_sets.clone());
        }
        Ok(match subject {
            ExecutionSubject::Measure(measure) => self
                .catalog
                .measure(measure)
                .map(|m| m.date_data_sets.clone())
                .unwrap_or_default(),
            ExecutionSubject::Insight(_) => self
                .catalog
                .date_data_sets
                .iter()
                .map(|d| d.meta.obj_ref())
                .collect(),
        })
    }

    async fn get_attribute_elements(
        &self,
        _workspace: &str,
        display_form: &ObjRef,
        limit: Option<u32>,
    ) -> Result<Vec<AttributeElement>, BackendError> {
        self.enter("get_attribute_elements").await?;
        let elements = (1..=5)
            .map(|i| AttributeElement {
                title: format!("{display_form} #{i}"),
                uri: Some(format!("/elements/{i}")),
            })
            .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();
        Ok(elements)
    }
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        workspace: "test-ws".into(),
        wait_timeout_secs: 5,
        undo_limit: 10,
        ..EngineConfig::default()
    }
}

/// Engine over `backend` with the sample dashboard already initialized.
pub(crate) async fn initialized_engine(backend: &TestBackend) -> DashboardEngine {
    let engine = DashboardEngine::spawn(Arc::new(backend.clone()), test_config());
    let outcome = engine
        .dispatch(CommandBody::Initialize {
            dashboard_ref: Some(ObjRef::identifier(DASHBOARD_ID)),
        })
        .await
        .expect("dispatch initialize");
    assert!(outcome.is_success(), "initialize failed: {:?}", outcome.failure());
    engine
}

/// Store initialized with the sample dashboard and the backend's catalog and settings.
pub(crate) fn seeded_store(backend: &TestBackend) -> Store {
    let (mut store, _) = Store::new();
    store
        .apply(vec![StateMutation::Initialized(Box::new(InitialState {
            document: Some(sample_dashboard()),
            catalog: backend.catalog.clone(),
            workspace: backend.settings.clone(),
            capabilities: backend.capabilities,
            render_mode: RenderMode::View,
        }))])
        .expect("seed store");
    store
}

pub(crate) fn sample_state() -> Arc<DashboardState> {
    seeded_store(&TestBackend::new()).snapshot()
}

/// Runs handlers directly against a store seeded with the sample dashboard.
pub(crate) struct Harness {
    pub(crate) backend: TestBackend,
    backend_handle: Arc<dyn AnalyticalBackend>,
    pub(crate) config: EngineConfig,
    pub(crate) store: Store,
    pub(crate) tasks: TaskRegistry,
    pub(crate) completions: mpsc::UnboundedReceiver<TaskCompletion>,
    pub(crate) render: RenderCoordinator,
    pub(crate) superseded: Vec<SupersededTask>,
    /// Correlation id stamped on every command run through the harness.
    pub(crate) correlation_id: CorrelationId,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_backend(TestBackend::new())
    }

    pub(crate) fn with_backend(backend: TestBackend) -> Self {
        let config = test_config();
        let store = seeded_store(&backend);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            backend_handle: Arc::new(backend.clone()),
            render: RenderCoordinator::new(config.render.clone()),
            config,
            store,
            tasks: TaskRegistry::new(completions_tx),
            completions,
            backend,
            superseded: Vec::new(),
            correlation_id: "test-correlation".into(),
        }
    }

    pub(crate) fn state(&self) -> Arc<DashboardState> {
        self.store.snapshot()
    }

    /// Runs the handler without applying its mutations.
    pub(crate) async fn run(&mut self, body: CommandBody) -> Result<Outcome, CommandError> {
        let mut ctx = HandlerContext {
            backend: &self.backend_handle,
            config: &self.config,
            state: self.store.snapshot(),
            correlation_id: Some(self.correlation_id.clone()),
            command_type: body.command_type(),
            now: Instant::now(),
            tasks: &mut self.tasks,
            render: &mut self.render,
            superseded: Vec::new(),
        };
        let result = handlers::handle(&mut ctx, body).await;
        self.superseded = ctx.superseded;
        result
    }

    /// Runs the handler, applies its mutations and returns the events it produced.
    pub(crate) async fn apply(&mut self, body: CommandBody) -> Vec<shared::protocol::EventBody> {
        let outcome = self.run(body).await.expect("command handled");
        self.store.apply(outcome.mutations).expect("mutations applied");
        outcome.events
    }

    pub(crate) async fn reject(&mut self, body: CommandBody) -> CommandError {
        match self.run(body).await {
            Ok(outcome) => panic!("expected rejection, got {:?}", outcome.events),
            Err(err) => err,
        }
    }

    /// Waits for the next background load and folds its result into the store.
    pub(crate) async fn complete_next_task(&mut self) -> Vec<shared::protocol::EventBody> {
        let completion = self.completions.recv().await.expect("task completion");
        if self
            .tasks
            .finish(&completion.key, completion.request_id)
            .is_none()
        {
            return Vec::new();
        }
        let outcome = handlers::complete_task(&self.store.snapshot(), completion)
            .expect("completion accepted");
        self.store.apply(outcome.mutations).expect("completion applied");
        outcome.events
    }
}
