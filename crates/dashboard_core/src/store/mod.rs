use std::{collections::HashMap, sync::Arc};

use shared::{
    catalog::Catalog,
    domain::{
        CorrelationId, DashboardDocument, DashboardLayout, DashboardSettings, FilterLocalId,
        ObjRef, RenderMode, UserPermissions, Widget, WorkspaceSettings,
    },
    error::ErrorPayload,
    filters::{AttributeElement, FilterContextDefinition},
};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::{backend::BackendCapabilities, error::StateError};

pub mod catalog;
pub mod executions;
pub mod filter_context;
pub mod layout;

pub use catalog::CatalogState;
pub use executions::{ExecutionEntry, ExecutionsState};
pub use filter_context::FilterContextState;
pub use layout::{LayoutState, WidgetPosition};

#[derive(Debug, Clone, Default)]
pub struct MetaState {
    /// Dashboard the session is bound to; `None` for a dashboard that was never saved.
    pub dashboard_ref: Option<ObjRef>,
    /// Last document read from or written to the backend.
    pub persisted: Option<DashboardDocument>,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigState {
    pub settings: DashboardSettings,
    pub permissions: UserPermissions,
    pub capabilities: BackendCapabilities,
}

#[derive(Debug, Clone, Default)]
pub struct UiState {
    pub render_mode: RenderMode,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementsEntry {
    pub request_id: Option<Uuid>,
    pub is_loading: bool,
    pub elements: Vec<AttributeElement>,
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSnapshot {
    pub pending: Vec<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub correlation_id: Option<CorrelationId>,
    pub command_type: String,
    pub layout: DashboardLayout,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoState {
    pub undo: Vec<UndoEntry>,
    pub redo: Vec<UndoEntry>,
}

/// Everything needed to build a fresh session, from a persisted document or from scratch.
#[derive(Debug, Clone, Default)]
pub struct InitialState {
    pub document: Option<DashboardDocument>,
    pub catalog: Catalog,
    pub workspace: WorkspaceSettings,
    pub capabilities: BackendCapabilities,
    pub render_mode: RenderMode,
}

#[derive(Debug, Clone)]
pub enum StateMutation {
    Initialized(Box<InitialState>),
    DashboardPersisted(Box<DashboardDocument>),
    SetTitle(String),
    SetRenderMode(RenderMode),
    SetFilterContext(FilterContextDefinition),
    SetWorkingFilterContext(Option<FilterContextDefinition>),
    SetLayout(DashboardLayout),
    ReplaceWidget(Widget),
    RecordUndo { entry: UndoEntry, limit: usize },
    SetUndoHistory(UndoState),
    InvalidateExecutions(Option<Vec<ObjRef>>),
    ExecutionStarted { widget_ref: ObjRef, request_id: Uuid },
    UpsertExecution { widget_ref: ObjRef, entry: ExecutionEntry },
    ElementsLoading { filter_local_id: FilterLocalId, request_id: Uuid },
    ElementsLoaded { filter_local_id: FilterLocalId, elements: Vec<AttributeElement> },
    ElementsFailed { filter_local_id: FilterLocalId, error: ErrorPayload },
    ClearElements(Vec<FilterLocalId>),
    SetRenderProgress(RenderSnapshot),
}

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub version: u64,
    pub initialized: bool,
    pub meta: MetaState,
    pub config: ConfigState,
    pub ui: UiState,
    pub layout: LayoutState,
    pub filter_context: FilterContextState,
    pub catalog: CatalogState,
    pub executions: ExecutionsState,
    pub attribute_elements: HashMap<FilterLocalId, ElementsEntry>,
    pub render: RenderSnapshot,
    pub undo: UndoState,
}

impl DashboardState {
    fn apply(&mut self, mutation: StateMutation) -> Result<(), StateError> {
        match mutation {
            StateMutation::Initialized(initial) => self.initialize(*initial)?,
            StateMutation::DashboardPersisted(document) => {
                self.meta.dashboard_ref = document.dashboard_ref.clone();
                self.meta.title = document.title.clone();
                self.filter_context.filter_context_ref = document.filter_context_ref.clone();
                self.meta.persisted = Some(*document);
            }
            StateMutation::SetTitle(title) => self.meta.title = title,
            StateMutation::SetRenderMode(mode) => self.ui.render_mode = mode,
            StateMutation::SetFilterContext(filters) => {
                filter_context::ensure_unique_local_ids(&filters)?;
                self.filter_context.filters = filters;
            }
            StateMutation::SetWorkingFilterContext(working) => {
                if let Some(working) = &working {
                    filter_context::ensure_unique_local_ids(working)?;
                }
                self.filter_context.working = working;
            }
            StateMutation::SetLayout(layout) => self.layout = LayoutState::new(layout)?,
            StateMutation::ReplaceWidget(widget) => self.layout.replace_widget(widget)?,
            StateMutation::RecordUndo { entry, limit } => {
                self.undo.undo.push(entry);
                self.undo.redo.clear();
                if self.undo.undo.len() > limit {
                    let overflow = self.undo.undo.len() - limit;
                    self.undo.undo.drain(..overflow);
                }
            }
            StateMutation::SetUndoHistory(history) => self.undo = history,
            StateMutation::InvalidateExecutions(widget_refs) => {
                self.executions.invalidate(widget_refs.as_deref())
            }
            StateMutation::ExecutionStarted {
                widget_ref,
                request_id,
            } => self.executions.start(widget_ref, request_id),
            StateMutation::UpsertExecution { widget_ref, entry } => {
                if !self.layout.contains(&widget_ref) {
                    return Err(StateError::UnknownWidget(widget_ref));
                }
                self.executions.upsert(widget_ref, entry)
            }
            StateMutation::ElementsLoading {
                filter_local_id,
                request_id,
            } => {
                self.attribute_elements.insert(
                    filter_local_id,
                    ElementsEntry {
                        request_id: Some(request_id),
                        is_loading: true,
                        ..ElementsEntry::default()
                    },
                );
            }
            StateMutation::ElementsLoaded {
                filter_local_id,
                elements,
            } => {
                self.attribute_elements.insert(
                    filter_local_id,
                    ElementsEntry {
                        elements,
                        ..ElementsEntry::default()
                    },
                );
            }
            StateMutation::ElementsFailed {
                filter_local_id,
                error,
            } => {
                self.attribute_elements.insert(
                    filter_local_id,
                    ElementsEntry {
                        error: Some(error),
                        ..ElementsEntry::default()
                    },
                );
            }
            StateMutation::ClearElements(filter_local_ids) => {
                for filter_local_id in filter_local_ids {
                    self.attribute_elements.remove(&filter_local_id);
                }
            }
            StateMutation::SetRenderProgress(snapshot) => self.render = snapshot,
        }
        Ok(())
    }

    fn initialize(&mut self, initial: InitialState) -> Result<(), StateError> {
        let InitialState {
            document,
            catalog,
            workspace,
            capabilities,
            render_mode,
        } = initial;
        let working_copy = document.clone().unwrap_or_default();

        self.layout = LayoutState::new(working_copy.layout)?;
        self.filter_context = FilterContextState {
            filters: working_copy.filter_context,
            working: None,
            filter_context_ref: working_copy.filter_context_ref,
        };
        self.meta = MetaState {
            dashboard_ref: working_copy.dashboard_ref,
            persisted: document,
            title: working_copy.title,
            description: working_copy.description,
        };
        self.config = ConfigState {
            settings: workspace.settings,
            permissions: workspace.permissions,
            capabilities,
        };
        self.catalog = CatalogState::new(catalog);
        self.ui.render_mode = render_mode;
        self.executions = ExecutionsState::default();
        self.attribute_elements.clear();
        self.undo = UndoState::default();
        self.initialized = true;
        Ok(())
    }
}

/// Single writer over the dashboard state. Readers get immutable snapshots.
pub struct Store {
    current: Arc<DashboardState>,
    publisher: watch::Sender<Arc<DashboardState>>,
}

impl Store {
    pub fn new() -> (Self, watch::Receiver<Arc<DashboardState>>) {
        let current = Arc::new(DashboardState::default());
        let (publisher, receiver) = watch::channel(current.clone());
        (Self { current, publisher }, receiver)
    }

    pub fn snapshot(&self) -> Arc<DashboardState> {
        self.current.clone()
    }

    /// Applies the whole batch or nothing; subscribers only ever see complete batches.
    pub fn apply(&mut self, batch: Vec<StateMutation>) -> Result<u64, StateError> {
        if batch.is_empty() {
            return Ok(self.current.version);
        }

        let mut next = DashboardState::clone(&self.current);
        let size = batch.len();
        for mutation in batch {
            next.apply(mutation)?;
        }
        next.version += 1;

        let version = next.version;
        self.current = Arc::new(next);
        self.publisher.send_replace(self.current.clone());
        debug!("state batch applied version={} mutations={}", version, size);
        Ok(version)
    }
}

/// Insert position for `index`, where `-1` means append.
pub(crate) fn insert_position(index: i32, len: usize) -> Option<usize> {
    match index {
        -1 => Some(len),
        i if i >= 0 && (i as usize) <= len => Some(i as usize),
        _ => None,
    }
}

/// Existing element at `index`, where `-1` means the last one.
pub(crate) fn existing_position(index: i32, len: usize) -> Option<usize> {
    match index {
        -1 if len > 0 => Some(len - 1),
        i if i >= 0 && (i as usize) < len => Some(i as usize),
        _ => None,
    }
}

#[cfg(test)]
#[path = "../tests/store_tests.rs"]
mod tests;
