//! Pure read-only views over [`DashboardState`].

use shared::{
    catalog::{CatalogAttribute, CatalogMeasure},
    domain::{
        DashboardDocument, DashboardLayout, DashboardSettings, FilterLocalId, FilterSettings,
        ObjRef, RenderMode, UserPermissions, Widget, WidgetKind,
    },
    execution::{ExecutionDefinition, ExecutionResult, ExecutionSubject, ExportFormat},
    filters::{
        AttributeElement, DashboardAttributeFilter, DashboardDateFilter, FilterContextDefinition,
        FilterContextItem, IgnoredFilter,
    },
};

use crate::store::{filter_context, DashboardState, ExecutionEntry};

pub fn select_is_initialized(state: &DashboardState) -> bool {
    state.initialized
}

pub fn select_render_mode(state: &DashboardState) -> RenderMode {
    state.ui.render_mode
}

pub fn select_is_in_edit_mode(state: &DashboardState) -> bool {
    state.ui.render_mode == RenderMode::Edit
}

pub fn select_dashboard_ref(state: &DashboardState) -> Option<&ObjRef> {
    state.meta.dashboard_ref.as_ref()
}

pub fn select_dashboard_title(state: &DashboardState) -> &str {
    &state.meta.title
}

pub fn select_is_new_dashboard(state: &DashboardState) -> bool {
    state.meta.persisted.is_none()
}

pub fn select_persisted_dashboard(state: &DashboardState) -> Option<&DashboardDocument> {
    state.meta.persisted.as_ref()
}

/// The document a save would write: the persisted document updated with the working copy.
pub fn select_dashboard_document(state: &DashboardState) -> DashboardDocument {
    let mut document = state.meta.persisted.clone().unwrap_or_default();
    document.dashboard_ref = state.meta.dashboard_ref.clone();
    document.title = state.meta.title.clone();
    document.description = state.meta.description.clone();
    document.layout = state.layout.layout().clone();
    document.filter_context = state.filter_context.filters.clone();
    document.filter_context_ref = state.filter_context.filter_context_ref.clone();
    document
}

pub fn select_is_dirty(state: &DashboardState) -> bool {
    match &state.meta.persisted {
        None => {
            !state.meta.title.is_empty()
                || !state.layout.layout().is_empty()
                || !state.filter_context.filters.is_empty()
        }
        Some(persisted) => {
            persisted.title != state.meta.title
                || &persisted.layout != state.layout.layout()
                || persisted.filter_context != state.filter_context.filters
        }
    }
}

pub fn select_layout(state: &DashboardState) -> &DashboardLayout {
    state.layout.layout()
}

pub fn select_widgets(state: &DashboardState) -> Vec<&Widget> {
    state.layout.layout().widgets().collect()
}

pub fn select_widget_by_ref<'a>(state: &'a DashboardState, widget_ref: &ObjRef) -> Option<&'a Widget> {
    state.layout.widget(widget_ref)
}

pub fn select_widget_filter_settings<'a>(
    state: &'a DashboardState,
    widget_ref: &ObjRef,
) -> Option<&'a FilterSettings> {
    select_widget_by_ref(state, widget_ref)?.filter_settings()
}

pub fn select_widget_ignored_filters<'a>(
    state: &'a DashboardState,
    widget_ref: &ObjRef,
) -> &'a [IgnoredFilter] {
    select_widget_filter_settings(state, widget_ref)
        .map(|settings| settings.ignore_dashboard_filters.as_slice())
        .unwrap_or_default()
}

pub fn select_widget_date_data_set<'a>(
    state: &'a DashboardState,
    widget_ref: &ObjRef,
) -> Option<&'a ObjRef> {
    select_widget_filter_settings(state, widget_ref)?
        .date_data_set
        .as_ref()
}

pub fn select_filter_context(state: &DashboardState) -> &FilterContextDefinition {
    &state.filter_context.filters
}

pub fn select_filter_context_filters(state: &DashboardState) -> &[FilterContextItem] {
    &state.filter_context.filters.filters
}

/// Filters including staged changes; equal to the applied filters when nothing is staged.
pub fn select_working_filters(state: &DashboardState) -> &[FilterContextItem] {
    state
        .filter_context
        .working
        .as_ref()
        .map(|working| working.filters.as_slice())
        .unwrap_or(state.filter_context.filters.filters.as_slice())
}

pub fn select_is_working_filter_context_changed(state: &DashboardState) -> bool {
    state
        .filter_context
        .working
        .as_ref()
        .is_some_and(|working| working != &state.filter_context.filters)
}

pub fn select_common_date_filter(state: &DashboardState) -> Option<&DashboardDateFilter> {
    state.filter_context.filters.common_date_filter()
}

pub fn select_attribute_filters(state: &DashboardState) -> Vec<&DashboardAttributeFilter> {
    state.filter_context.filters.attribute_filters().collect()
}

pub fn select_attribute_filter_by_local_id<'a>(
    state: &'a DashboardState,
    local_id: &FilterLocalId,
) -> Option<&'a DashboardAttributeFilter> {
    state.filter_context.filters.attribute_filter(local_id)
}

pub fn select_attribute_filter_by_display_form<'a>(
    state: &'a DashboardState,
    display_form: &ObjRef,
) -> Option<&'a DashboardAttributeFilter> {
    state
        .filter_context
        .filters
        .attribute_filters()
        .find(|filter| state.catalog.same_display_form(&filter.display_form, display_form))
}

pub fn select_attribute_filter_descendants(
    state: &DashboardState,
    local_id: &FilterLocalId,
) -> Vec<FilterLocalId> {
    filter_context::descendants(&state.filter_context.filters, local_id)
}

pub fn select_is_circular_dependency(state: &DashboardState, local_id: &FilterLocalId) -> bool {
    filter_context::has_circular_dependency(&state.filter_context.filters, local_id)
}

pub fn select_can_add_more_attribute_filters(state: &DashboardState) -> bool {
    state.filter_context.filters.attribute_filters().count()
        < state.config.settings.max_attribute_filters
}

fn is_ignored(state: &DashboardState, ignored: &[IgnoredFilter], item: &FilterContextItem) -> bool {
    ignored.iter().any(|entry| match (entry, item) {
        (IgnoredFilter::AttributeFilter { display_form }, FilterContextItem::Attribute(filter)) => {
            state
                .catalog
                .same_display_form(display_form, &filter.display_form)
        }
        (IgnoredFilter::DateFilter { data_set }, FilterContextItem::Date(filter)) => filter
            .data_set
            .as_ref()
            .is_some_and(|current| state.catalog.same_date_data_set(data_set, current)),
        _ => false,
    })
}

/// Dashboard filters that apply to the widget's execution.
pub fn select_effective_filters_for_widget(
    state: &DashboardState,
    widget_ref: &ObjRef,
) -> Vec<FilterContextItem> {
    let Some(widget) = select_widget_by_ref(state, widget_ref) else {
        return Vec::new();
    };
    let settings = widget.filter_settings();
    let ignored = settings
        .map(|s| s.ignore_dashboard_filters.as_slice())
        .unwrap_or_default();
    let date_data_set = settings.and_then(|s| s.date_data_set.as_ref());

    let mut effective = Vec::new();
    for item in &state.filter_context.filters.filters {
        match item {
            FilterContextItem::Attribute(filter) => {
                if !filter.is_all_selected() && !is_ignored(state, ignored, item) {
                    effective.push(item.clone());
                }
            }
            FilterContextItem::Date(filter) if filter.data_set.is_none() => {
                if let Some(data_set) = date_data_set {
                    if !filter.is_all_time() {
                        let mut bound = filter.clone();
                        bound.data_set = Some(data_set.clone());
                        effective.push(FilterContextItem::Date(bound));
                    }
                }
            }
            FilterContextItem::Date(filter) => {
                if settings.is_some() && !filter.is_all_time() && !is_ignored(state, ignored, item) {
                    effective.push(item.clone());
                }
            }
        }
    }
    effective
}

pub fn select_execution_subject(widget: &Widget) -> Option<ExecutionSubject> {
    match &widget.kind {
        WidgetKind::Insight(insight) => Some(ExecutionSubject::Insight(insight.insight.clone())),
        WidgetKind::Kpi(kpi) => Some(ExecutionSubject::Measure(kpi.measure.clone())),
        WidgetKind::RichText(_)
        | WidgetKind::VisualizationSwitcher(_)
        | WidgetKind::Custom(_) => None,
    }
}

pub fn select_execution_definition(
    state: &DashboardState,
    widget_ref: &ObjRef,
) -> Option<ExecutionDefinition> {
    let widget = select_widget_by_ref(state, widget_ref)?;
    let subject = select_execution_subject(widget)?;
    Some(ExecutionDefinition {
        widget_ref: widget_ref.clone(),
        subject,
        filters: select_effective_filters_for_widget(state, widget_ref),
        date_data_set: widget
            .filter_settings()
            .and_then(|settings| settings.date_data_set.clone()),
    })
}

pub fn select_catalog_attribute<'a>(
    state: &'a DashboardState,
    attribute_ref: &ObjRef,
) -> Option<&'a CatalogAttribute> {
    state.catalog.attribute(attribute_ref)
}

pub fn select_catalog_attribute_for_display_form<'a>(
    state: &'a DashboardState,
    display_form: &ObjRef,
) -> Option<&'a CatalogAttribute> {
    state.catalog.attribute_for_display_form(display_form)
}

pub fn select_catalog_measure<'a>(
    state: &'a DashboardState,
    measure_ref: &ObjRef,
) -> Option<&'a CatalogMeasure> {
    state.catalog.measure(measure_ref)
}

pub fn select_catalog_date_data_sets(state: &DashboardState) -> Vec<ObjRef> {
    state
        .catalog
        .catalog()
        .date_data_sets
        .iter()
        .map(|data_set| data_set.meta.obj_ref())
        .collect()
}

pub fn select_execution_entry<'a>(
    state: &'a DashboardState,
    widget_ref: &ObjRef,
) -> Option<&'a ExecutionEntry> {
    state.executions.get(widget_ref)
}

pub fn select_execution_result<'a>(
    state: &'a DashboardState,
    widget_ref: &ObjRef,
) -> Option<&'a ExecutionResult> {
    state.executions.get(widget_ref)?.result.as_ref()
}

pub fn select_is_execution_loading(state: &DashboardState, widget_ref: &ObjRef) -> bool {
    state
        .executions
        .get(widget_ref)
        .is_some_and(|entry| entry.is_loading)
}

pub fn select_is_export_ready(state: &DashboardState, widget_ref: &ObjRef) -> bool {
    state
        .executions
        .get(widget_ref)
        .is_some_and(|entry| entry.export_ready && entry.result.is_some() && !entry.is_loading)
}

pub fn select_is_export_format_allowed(state: &DashboardState, format: ExportFormat) -> bool {
    let settings = &state.config.settings;
    let enabled = match format {
        ExportFormat::Csv => settings.enable_csv_export,
        ExportFormat::Xlsx => settings.enable_xlsx_export,
    };
    enabled && state.config.permissions.can_export_tabular
}

pub fn select_can_undo(state: &DashboardState) -> bool {
    !state.undo.undo.is_empty()
}

pub fn select_can_redo(state: &DashboardState) -> bool {
    !state.undo.redo.is_empty()
}

pub fn select_pending_async_renders(state: &DashboardState) -> &[String] {
    &state.render.pending
}

pub fn select_is_render_resolved(state: &DashboardState) -> bool {
    state.render.resolved
}

pub fn select_settings(state: &DashboardState) -> &DashboardSettings {
    &state.config.settings
}

pub fn select_permissions(state: &DashboardState) -> &UserPermissions {
    &state.config.permissions
}

pub fn select_attribute_elements<'a>(
    state: &'a DashboardState,
    local_id: &FilterLocalId,
) -> Option<&'a [AttributeElement]> {
    state
        .attribute_elements
        .get(local_id)
        .filter(|entry| !entry.is_loading)
        .map(|entry| entry.elements.as_slice())
}

pub fn select_is_attribute_elements_loading(state: &DashboardState, local_id: &FilterLocalId) -> bool {
    state
        .attribute_elements
        .get(local_id)
        .is_some_and(|entry| entry.is_loading)
}

#[cfg(test)]
#[path = "tests/selectors_tests.rs"]
mod tests;
