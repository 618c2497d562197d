use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        CorrelationId, DashboardLayout, FilterLocalId, KpiComparisonDirection, KpiComparisonType,
        LayoutItem, LayoutSection, ObjRef, RenderMode, SectionHeader,
    },
    error::{CommandFailure, ErrorPayload},
    execution::{ExecutionResult, ExportConfig, ExportFormat},
    filters::{
        AttributeElement, AttributeElements, AttributeFilterParent, AttributeFilterSelectionMode,
        DashboardAttributeFilter, DashboardDateFilter, DateBound, DateFilterType,
        DateGranularity, FilterContextDefinition, FilterContextItem, IgnoredFilter,
        SelectionType,
    },
};

/// Index value meaning "append at the end" / "the last one".
pub const LAST_INDEX: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilterSelection {
    #[serde(rename = "type", default)]
    pub filter_type: DateFilterType,
    #[serde(default)]
    pub granularity: DateGranularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateBound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_local_id: Option<String>,
}

impl DateFilterSelection {
    pub fn all_time() -> Self {
        Self {
            filter_type: DateFilterType::Relative,
            granularity: DateGranularity::Date,
            from: None,
            to: None,
            option_local_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateDatasetSelection {
    /// Let the engine pick the first date dataset available for the widget.
    Default,
    DataSet(ObjRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterSettingsOperation {
    Replace {
        #[serde(default)]
        ignore_filters: Vec<IgnoredFilter>,
        #[serde(default)]
        date_data_set: Option<ObjRef>,
    },
    IgnoreFilters {
        filters: Vec<IgnoredFilter>,
    },
    UnignoreFilters {
        filters: Vec<IgnoredFilter>,
    },
    ReplaceIgnoredFilters {
        filters: Vec<IgnoredFilter>,
    },
    EnableDateFilter {
        date_data_set: DateDatasetSelection,
    },
    DisableDateFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoPoint {
    #[default]
    Last,
    Steps(usize),
    /// Undo everything up to and including the change made by this correlation id.
    Correlation(CorrelationId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CommandBody {
    Initialize {
        #[serde(default)]
        dashboard_ref: Option<ObjRef>,
    },
    SaveDashboard,
    SaveDashboardAs {
        title: String,
        #[serde(default)]
        switch_to_copy: bool,
    },
    RenameDashboard {
        title: String,
    },
    ResetDashboard,
    DeleteDashboard,
    ChangeRenderMode {
        mode: RenderMode,
        #[serde(default)]
        reset_dashboard: bool,
    },

    ChangeDateFilterSelection {
        #[serde(default)]
        data_set: Option<ObjRef>,
        selection: DateFilterSelection,
    },
    AddAttributeFilter {
        display_form: ObjRef,
        #[serde(default = "last_index")]
        index: i32,
        #[serde(default)]
        parent_filters: Vec<AttributeFilterParent>,
        #[serde(default)]
        initial_selection: Option<AttributeElements>,
        #[serde(default)]
        initial_is_negative_selection: bool,
        #[serde(default)]
        selection_mode: AttributeFilterSelectionMode,
        #[serde(default)]
        title: Option<String>,
    },
    RemoveAttributeFilters {
        filter_local_ids: Vec<FilterLocalId>,
    },
    MoveAttributeFilter {
        filter_local_id: FilterLocalId,
        index: i32,
    },
    ChangeAttributeFilterSelection {
        filter_local_id: FilterLocalId,
        elements: AttributeElements,
        selection_type: SelectionType,
    },
    SetAttributeFilterParents {
        filter_local_id: FilterLocalId,
        parent_filters: Vec<AttributeFilterParent>,
    },
    ChangeFilterContextSelection {
        filters: Vec<FilterContextItem>,
        #[serde(default)]
        reset_others: bool,
    },
    ApplyWorkingFilterContext,
    ResetWorkingFilterContext,
    ValidateAttributeFilterParents {
        filter_local_id: FilterLocalId,
        #[serde(default)]
        parent_filters: Option<Vec<AttributeFilterParent>>,
    },
    LoadAttributeFilterElements {
        filter_local_id: FilterLocalId,
        #[serde(default)]
        limit: Option<u32>,
    },

    AddLayoutSection {
        #[serde(default = "last_index")]
        index: i32,
        #[serde(default)]
        header: Option<SectionHeader>,
        #[serde(default)]
        items: Vec<LayoutItem>,
    },
    MoveLayoutSection {
        section_index: usize,
        to_index: i32,
    },
    RemoveLayoutSection {
        index: i32,
    },
    ChangeLayoutSectionHeader {
        index: usize,
        header: SectionHeader,
        #[serde(default)]
        merge: bool,
    },
    AddSectionItems {
        section_index: usize,
        #[serde(default = "last_index")]
        item_index: i32,
        items: Vec<LayoutItem>,
    },
    MoveSectionItem {
        section_index: usize,
        item_index: usize,
        to_section_index: usize,
        to_item_index: i32,
    },
    RemoveSectionItem {
        section_index: usize,
        item_index: i32,
    },
    ReplaceSectionItem {
        section_index: usize,
        item_index: usize,
        item: LayoutItem,
    },
    UndoLayoutChanges {
        #[serde(default)]
        undo_point: UndoPoint,
    },
    RedoLayoutChanges,

    ChangeWidgetHeader {
        widget_ref: ObjRef,
        title: String,
    },
    ChangeWidgetFilterSettings {
        widget_ref: ObjRef,
        operation: FilterSettingsOperation,
    },
    ChangeKpiWidgetMeasure {
        widget_ref: ObjRef,
        measure: ObjRef,
        #[serde(default)]
        title: Option<String>,
    },
    ChangeKpiWidgetComparison {
        widget_ref: ObjRef,
        comparison_type: KpiComparisonType,
        #[serde(default)]
        comparison_direction: KpiComparisonDirection,
    },
    ChangeInsightWidgetProperties {
        widget_ref: ObjRef,
        properties: serde_json::Value,
    },
    ChangeRichTextWidgetContent {
        widget_ref: ObjRef,
        content: String,
    },
    ExportInsightWidget {
        widget_ref: ObjRef,
        config: ExportConfig,
    },

    RefreshWidgetExecution {
        widget_ref: ObjRef,
    },
    UpsertExecutionResult {
        widget_ref: ObjRef,
        #[serde(default)]
        result: Option<ExecutionResult>,
        #[serde(default)]
        error: Option<ErrorPayload>,
        #[serde(default)]
        is_loading: bool,
        #[serde(default)]
        export_ready: bool,
    },
    ClearExecutionResults {
        #[serde(default)]
        widget_refs: Option<Vec<ObjRef>>,
    },

    RequestAsyncRender {
        id: String,
    },
    ResolveAsyncRender {
        id: String,
    },
}

fn last_index() -> i32 {
    LAST_INDEX
}

impl CommandBody {
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::SaveDashboard => "save_dashboard",
            Self::SaveDashboardAs { .. } => "save_dashboard_as",
            Self::RenameDashboard { .. } => "rename_dashboard",
            Self::ResetDashboard => "reset_dashboard",
            Self::DeleteDashboard => "delete_dashboard",
            Self::ChangeRenderMode { .. } => "change_render_mode",
            Self::ChangeDateFilterSelection { .. } => "change_date_filter_selection",
            Self::AddAttributeFilter { .. } => "add_attribute_filter",
            Self::RemoveAttributeFilters { .. } => "remove_attribute_filters",
            Self::MoveAttributeFilter { .. } => "move_attribute_filter",
            Self::ChangeAttributeFilterSelection { .. } => "change_attribute_filter_selection",
            Self::SetAttributeFilterParents { .. } => "set_attribute_filter_parents",
            Self::ChangeFilterContextSelection { .. } => "change_filter_context_selection",
            Self::ApplyWorkingFilterContext => "apply_working_filter_context",
            Self::ResetWorkingFilterContext => "reset_working_filter_context",
            Self::ValidateAttributeFilterParents { .. } => "validate_attribute_filter_parents",
            Self::LoadAttributeFilterElements { .. } => "load_attribute_filter_elements",
            Self::AddLayoutSection { .. } => "add_layout_section",
            Self::MoveLayoutSection { .. } => "move_layout_section",
            Self::RemoveLayoutSection { .. } => "remove_layout_section",
            Self::ChangeLayoutSectionHeader { .. } => "change_layout_section_header",
            Self::AddSectionItems { .. } => "add_section_items",
            Self::MoveSectionItem { .. } => "move_section_item",
            Self::RemoveSectionItem { .. } => "remove_section_item",
            Self::ReplaceSectionItem { .. } => "replace_section_item",
            Self::UndoLayoutChanges { .. } => "undo_layout_changes",
            Self::RedoLayoutChanges => "redo_layout_changes",
            Self::ChangeWidgetHeader { .. } => "change_widget_header",
            Self::ChangeWidgetFilterSettings { .. } => "change_widget_filter_settings",
            Self::ChangeKpiWidgetMeasure { .. } => "change_kpi_widget_measure",
            Self::ChangeKpiWidgetComparison { .. } => "change_kpi_widget_comparison",
            Self::ChangeInsightWidgetProperties { .. } => "change_insight_widget_properties",
            Self::ChangeRichTextWidgetContent { .. } => "change_rich_text_widget_content",
            Self::ExportInsightWidget { .. } => "export_insight_widget",
            Self::RefreshWidgetExecution { .. } => "refresh_widget_execution",
            Self::UpsertExecutionResult { .. } => "upsert_execution_result",
            Self::ClearExecutionResults { .. } => "clear_execution_results",
            Self::RequestAsyncRender { .. } => "request_async_render",
            Self::ResolveAsyncRender { .. } => "resolve_async_render",
        }
    }

    /// Commands that may run before the dashboard has been initialized.
    pub fn allowed_before_initialization(&self) -> bool {
        matches!(
            self,
            Self::Initialize { .. } | Self::RequestAsyncRender { .. } | Self::ResolveAsyncRender { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(flatten)]
    pub body: CommandBody,
}

impl DashboardCommand {
    pub fn new(body: CommandBody) -> Self {
        Self {
            correlation_id: None,
            body,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn command_type(&self) -> &'static str {
        self.body.command_type()
    }
}

impl From<CommandBody> for DashboardCommand {
    fn from(body: CommandBody) -> Self {
        Self::new(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentFiltersValidation {
    Valid,
    ExtraneousParent,
    InvalidConnection,
    InvalidMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncRenderIgnoreReason {
    OutsideRequestWindow,
    OutsideCycleWindow,
    CycleLimitReached,
    AlreadyRequested,
    NotRequested,
    RenderAlreadyResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderCompletionReason {
    NoRequests,
    AllResolved,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    CommandStarted {
        command_type: String,
    },
    CommandFailed {
        command_type: String,
        failure: CommandFailure,
    },

    DashboardInitialized {
        #[serde(default)]
        dashboard_ref: Option<ObjRef>,
        title: String,
        widget_count: usize,
        filter_count: usize,
    },
    DashboardSaved {
        dashboard_ref: ObjRef,
        is_new: bool,
    },
    DashboardCopySaved {
        dashboard_ref: ObjRef,
        switched_to_copy: bool,
    },
    DashboardRenamed {
        title: String,
    },
    DashboardReset {
        #[serde(default)]
        dashboard_ref: Option<ObjRef>,
    },
    DashboardDeleted {
        dashboard_ref: ObjRef,
    },
    RenderModeChanged {
        mode: RenderMode,
    },

    DateFilterChanged {
        #[serde(default)]
        data_set: Option<ObjRef>,
        #[serde(default)]
        filter: Option<DashboardDateFilter>,
        staged: bool,
    },
    AttributeFilterAdded {
        filter: DashboardAttributeFilter,
        index: usize,
    },
    AttributeFiltersRemoved {
        removed: Vec<DashboardAttributeFilter>,
        affected_children: Vec<FilterLocalId>,
    },
    AttributeFilterMoved {
        filter_local_id: FilterLocalId,
        from_index: usize,
        to_index: usize,
    },
    AttributeFilterSelectionChanged {
        filter: DashboardAttributeFilter,
        staged: bool,
    },
    AttributeFilterParentsChanged {
        filter: DashboardAttributeFilter,
    },
    AttributeFilterParentsValidated {
        filter_local_id: FilterLocalId,
        result: ParentFiltersValidation,
    },
    AttributeFilterElementsRequested {
        filter_local_id: FilterLocalId,
    },
    AttributeFilterElementsLoaded {
        filter_local_id: FilterLocalId,
        elements: Vec<AttributeElement>,
    },
    AttributeFilterElementsFailed {
        filter_local_id: FilterLocalId,
        error: ErrorPayload,
    },
    FilterContextChanged {
        filter_context: FilterContextDefinition,
    },
    WorkingFilterContextReset,

    LayoutSectionAdded {
        index: usize,
        section: LayoutSection,
    },
    LayoutSectionMoved {
        from_index: usize,
        to_index: usize,
    },
    LayoutSectionRemoved {
        index: usize,
        section: LayoutSection,
    },
    LayoutSectionHeaderChanged {
        index: usize,
        header: SectionHeader,
    },
    LayoutSectionItemsAdded {
        section_index: usize,
        start_index: usize,
        items: Vec<LayoutItem>,
    },
    LayoutSectionItemMoved {
        from_section_index: usize,
        from_item_index: usize,
        to_section_index: usize,
        to_item_index: usize,
        widget_ref: ObjRef,
    },
    LayoutSectionItemRemoved {
        section_index: usize,
        item_index: usize,
        item: LayoutItem,
    },
    LayoutSectionItemReplaced {
        section_index: usize,
        item_index: usize,
        item: LayoutItem,
        previous: LayoutItem,
    },
    LayoutChanged {
        layout: DashboardLayout,
    },
    LayoutChangesUndone {
        steps: usize,
    },
    LayoutChangesRedone,

    WidgetHeaderChanged {
        widget_ref: ObjRef,
        title: String,
    },
    WidgetFilterSettingsChanged {
        widget_ref: ObjRef,
        ignored_filters: Vec<IgnoredFilter>,
        #[serde(default)]
        date_data_set: Option<ObjRef>,
    },
    KpiWidgetMeasureChanged {
        widget_ref: ObjRef,
        measure: ObjRef,
    },
    KpiWidgetComparisonChanged {
        widget_ref: ObjRef,
        comparison_type: KpiComparisonType,
        comparison_direction: KpiComparisonDirection,
    },
    InsightWidgetPropertiesChanged {
        widget_ref: ObjRef,
        properties: serde_json::Value,
    },
    RichTextWidgetContentChanged {
        widget_ref: ObjRef,
        content: String,
    },
    InsightWidgetExportRequested {
        widget_ref: ObjRef,
        format: ExportFormat,
    },
    InsightWidgetExportResolved {
        widget_ref: ObjRef,
        uri: String,
    },

    WidgetExecutionStarted {
        widget_ref: ObjRef,
    },
    WidgetExecutionSucceeded {
        widget_ref: ObjRef,
        fingerprint: String,
        total_count: u64,
    },
    WidgetExecutionFailed {
        widget_ref: ObjRef,
        error: ErrorPayload,
    },
    ExecutionResultUpserted {
        widget_ref: ObjRef,
    },
    ExecutionResultsCleared {
        #[serde(default)]
        widget_refs: Option<Vec<ObjRef>>,
    },

    AsyncRenderRequested {
        id: String,
    },
    AsyncRenderResolved {
        id: String,
    },
    AsyncRenderIgnored {
        id: String,
        reason: AsyncRenderIgnoreReason,
    },
    RenderResolved {
        reason: RenderCompletionReason,
        outstanding: Vec<String>,
    },
}

impl EventBody {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CommandStarted { .. } => "command_started",
            Self::CommandFailed { .. } => "command_failed",
            Self::DashboardInitialized { .. } => "dashboard_initialized",
            Self::DashboardSaved { .. } => "dashboard_saved",
            Self::DashboardCopySaved { .. } => "dashboard_copy_saved",
            Self::DashboardRenamed { .. } => "dashboard_renamed",
            Self::DashboardReset { .. } => "dashboard_reset",
            Self::DashboardDeleted { .. } => "dashboard_deleted",
            Self::RenderModeChanged { .. } => "render_mode_changed",
            Self::DateFilterChanged { .. } => "date_filter_changed",
            Self::AttributeFilterAdded { .. } => "attribute_filter_added",
            Self::AttributeFiltersRemoved { .. } => "attribute_filters_removed",
            Self::AttributeFilterMoved { .. } => "attribute_filter_moved",
            Self::AttributeFilterSelectionChanged { .. } => "attribute_filter_selection_changed",
            Self::AttributeFilterParentsChanged { .. } => "attribute_filter_parents_changed",
            Self::AttributeFilterParentsValidated { .. } => "attribute_filter_parents_validated",
            Self::AttributeFilterElementsRequested { .. } => {
                "attribute_filter_elements_requested"
            }
            Self::AttributeFilterElementsLoaded { .. } => "attribute_filter_elements_loaded",
            Self::AttributeFilterElementsFailed { .. } => "attribute_filter_elements_failed",
            Self::FilterContextChanged { .. } => "filter_context_changed",
            Self::WorkingFilterContextReset => "working_filter_context_reset",
            Self::LayoutSectionAdded { .. } => "layout_section_added",
            Self::LayoutSectionMoved { .. } => "layout_section_moved",
            Self::LayoutSectionRemoved { .. } => "layout_section_removed",
            Self::LayoutSectionHeaderChanged { .. } => "layout_section_header_changed",
            Self::LayoutSectionItemsAdded { .. } => "layout_section_items_added",
            Self::LayoutSectionItemMoved { .. } => "layout_section_item_moved",
            Self::LayoutSectionItemRemoved { .. } => "layout_section_item_removed",
            Self::LayoutSectionItemReplaced { .. } => "layout_section_item_replaced",
            Self::LayoutChanged { .. } => "layout_changed",
            Self::LayoutChangesUndone { .. } => "layout_changes_undone",
            Self::LayoutChangesRedone => "layout_changes_redone",
            Self::WidgetHeaderChanged { .. } => "widget_header_changed",
            Self::WidgetFilterSettingsChanged { .. } => "widget_filter_settings_changed",
            Self::KpiWidgetMeasureChanged { .. } => "kpi_widget_measure_changed",
            Self::KpiWidgetComparisonChanged { .. } => "kpi_widget_comparison_changed",
            Self::InsightWidgetPropertiesChanged { .. } => "insight_widget_properties_changed",
            Self::RichTextWidgetContentChanged { .. } => "rich_text_widget_content_changed",
            Self::InsightWidgetExportRequested { .. } => "insight_widget_export_requested",
            Self::InsightWidgetExportResolved { .. } => "insight_widget_export_resolved",
            Self::WidgetExecutionStarted { .. } => "widget_execution_started",
            Self::WidgetExecutionSucceeded { .. } => "widget_execution_succeeded",
            Self::WidgetExecutionFailed { .. } => "widget_execution_failed",
            Self::ExecutionResultUpserted { .. } => "execution_result_upserted",
            Self::ExecutionResultsCleared { .. } => "execution_results_cleared",
            Self::AsyncRenderRequested { .. } => "async_render_requested",
            Self::AsyncRenderResolved { .. } => "async_render_resolved",
            Self::AsyncRenderIgnored { .. } => "async_render_ignored",
            Self::RenderResolved { .. } => "render_resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl DashboardEvent {
    pub fn event_type(&self) -> &'static str {
        self.body.event_type()
    }

    pub fn failure(&self) -> Option<&CommandFailure> {
        match &self.body {
            EventBody::CommandFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
