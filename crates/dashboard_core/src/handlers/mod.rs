use std::sync::Arc;

use shared::{
    domain::{CorrelationId, ObjRef},
    protocol::{CommandBody, EventBody},
};
use tokio::time::Instant;

use crate::{
    backend::AnalyticalBackend,
    config::EngineConfig,
    error::CommandError,
    render::RenderCoordinator,
    store::{DashboardState, StateMutation, UndoEntry},
};

pub mod dashboard;
pub mod executions;
pub mod filters;
pub mod layout;
pub mod render;
pub mod tasks;
pub mod widgets;

pub use tasks::{SupersededTask, TaskCompletion, TaskKey, TaskOutput, TaskRegistry};

/// What a handler works with: a snapshot taken when the command started plus the
/// engine-owned resources it may drive.
pub struct HandlerContext<'a> {
    pub backend: &'a Arc<dyn AnalyticalBackend>,
    pub config: &'a EngineConfig,
    pub state: Arc<DashboardState>,
    pub correlation_id: Option<CorrelationId>,
    pub command_type: &'static str,
    pub now: Instant,
    pub tasks: &'a mut TaskRegistry,
    pub render: &'a mut RenderCoordinator,
    /// Loads cancelled while handling; reported even if the command itself fails.
    pub superseded: Vec<SupersededTask>,
}

impl HandlerContext<'_> {
    pub fn workspace(&self) -> &str {
        &self.config.workspace
    }

    pub(crate) fn record_undo(&self) -> StateMutation {
        StateMutation::RecordUndo {
            entry: UndoEntry {
                correlation_id: self.correlation_id.clone(),
                command_type: self.command_type.to_string(),
                layout: self.state.layout.layout().clone(),
            },
            limit: self.config.undo_limit,
        }
    }

    /// Drops cached results for `widget_refs` (all widgets for `None`) and cancels their loads.
    pub(crate) fn invalidate_executions(&mut self, widget_refs: Option<Vec<ObjRef>>) -> StateMutation {
        let cancelled = match &widget_refs {
            None => self
                .tasks
                .cancel_where(|key| matches!(key, TaskKey::Execution(_))),
            Some(refs) => self.tasks.cancel_where(|key| {
                matches!(key, TaskKey::Execution(widget_ref) if refs.contains(widget_ref))
            }),
        };
        self.superseded.extend(cancelled);
        StateMutation::InvalidateExecutions(widget_refs)
    }
}

/// Mutations to apply as one batch and the events to publish once they are applied.
#[derive(Debug, Default)]
pub struct Outcome {
    pub mutations: Vec<StateMutation>,
    pub events: Vec<EventBody>,
    pub start_render_session: bool,
}

impl Outcome {
    pub fn event(event: EventBody) -> Self {
        Self {
            events: vec![event],
            ..Self::default()
        }
    }

    pub fn with_mutation(mut self, mutation: StateMutation) -> Self {
        self.mutations.push(mutation);
        self
    }
}

/// Routes a command to its handler.
pub async fn handle(ctx: &mut HandlerContext<'_>, body: CommandBody) -> Result<Outcome, CommandError> {
    match body {
        CommandBody::Initialize { dashboard_ref } => dashboard::initialize(ctx, dashboard_ref).await,
        CommandBody::SaveDashboard => dashboard::save(ctx).await,
        CommandBody::SaveDashboardAs {
            title,
            switch_to_copy,
        } => dashboard::save_as(ctx, title, switch_to_copy).await,
        CommandBody::RenameDashboard { title } => dashboard::rename(ctx, title),
        CommandBody::ResetDashboard => dashboard::reset(ctx),
        CommandBody::DeleteDashboard => dashboard::delete(ctx).await,
        CommandBody::ChangeRenderMode {
            mode,
            reset_dashboard,
        } => dashboard::change_render_mode(ctx, mode, reset_dashboard),

        CommandBody::ChangeDateFilterSelection {
            data_set,
            selection,
        } => filters::change_date_filter_selection(ctx, data_set, selection),
        CommandBody::AddAttributeFilter {
            display_form,
            index,
            parent_filters,
            initial_selection,
            initial_is_negative_selection,
            selection_mode,
            title,
        } => {
            filters::add_attribute_filter(
                ctx,
                filters::NewAttributeFilter {
                    display_form,
                    index,
                    parent_filters,
                    initial_selection,
                    initial_is_negative_selection,
                    selection_mode,
                    title,
                },
            )
            .await
        }
        CommandBody::RemoveAttributeFilters { filter_local_ids } => {
            filters::remove_attribute_filters(ctx, filter_local_ids)
        }
        CommandBody::MoveAttributeFilter {
            filter_local_id,
            index,
        } => filters::move_attribute_filter(ctx, filter_local_id, index),
        CommandBody::ChangeAttributeFilterSelection {
            filter_local_id,
            elements,
            selection_type,
        } => filters::change_attribute_filter_selection(ctx, filter_local_id, elements, selection_type),
        CommandBody::SetAttributeFilterParents {
            filter_local_id,
            parent_filters,
        } => filters::set_attribute_filter_parents(ctx, filter_local_id, parent_filters).await,
        CommandBody::ChangeFilterContextSelection {
            filters,
            reset_others,
        } => filters::change_filter_context_selection(ctx, filters, reset_others),
        CommandBody::ApplyWorkingFilterContext => filters::apply_working_filter_context(ctx),
        CommandBody::ResetWorkingFilterContext => filters::reset_working_filter_context(ctx),
        CommandBody::ValidateAttributeFilterParents {
            filter_local_id,
            parent_filters,
        } => filters::validate_attribute_filter_parents(ctx, filter_local_id, parent_filters).await,
        CommandBody::LoadAttributeFilterElements {
            filter_local_id,
            limit,
        } => filters::load_attribute_filter_elements(ctx, filter_local_id, limit),

        CommandBody::AddLayoutSection {
            index,
            header,
            items,
        } => layout::add_section(ctx, index, header, items),
        CommandBody::MoveLayoutSection {
            section_index,
            to_index,
        } => layout::move_section(ctx, section_index, to_index),
        CommandBody::RemoveLayoutSection { index } => layout::remove_section(ctx, index),
        CommandBody::ChangeLayoutSectionHeader {
            index,
            header,
            merge,
        } => layout::change_section_header(ctx, index, header, merge),
        CommandBody::AddSectionItems {
            section_index,
            item_index,
            items,
        } => layout::add_items(ctx, section_index, item_index, items),
        CommandBody::MoveSectionItem {
            section_index,
            item_index,
            to_section_index,
            to_item_index,
        } => layout::move_item(ctx, section_index, item_index, to_section_index, to_item_index),
        CommandBody::RemoveSectionItem {
            section_index,
            item_index,
        } => layout::remove_item(ctx, section_index, item_index),
        CommandBody::ReplaceSectionItem {
            section_index,
            item_index,
            item,
        } => layout::replace_item(ctx, section_index, item_index, item),
        CommandBody::UndoLayoutChanges { undo_point } => layout::undo(ctx, undo_point),
        CommandBody::RedoLayoutChanges => layout::redo(ctx),

        CommandBody::ChangeWidgetHeader { widget_ref, title } => {
            widgets::change_header(ctx, widget_ref, title)
        }
        CommandBody::ChangeWidgetFilterSettings {
            widget_ref,
            operation,
        } => widgets::change_filter_settings(ctx, widget_ref, operation).await,
        CommandBody::ChangeKpiWidgetMeasure {
            widget_ref,
            measure,
            title,
        } => widgets::change_kpi_measure(ctx, widget_ref, measure, title),
        CommandBody::ChangeKpiWidgetComparison {
            widget_ref,
            comparison_type,
            comparison_direction,
        } => widgets::change_kpi_comparison(ctx, widget_ref, comparison_type, comparison_direction),
        CommandBody::ChangeInsightWidgetProperties {
            widget_ref,
            properties,
        } => widgets::change_insight_properties(ctx, widget_ref, properties),
        CommandBody::ChangeRichTextWidgetContent {
            widget_ref,
            content,
        } => widgets::change_rich_text_content(ctx, widget_ref, content),
        CommandBody::ExportInsightWidget { widget_ref, config } => {
            widgets::export_insight(ctx, widget_ref, config).await
        }

        CommandBody::RefreshWidgetExecution { widget_ref } => executions::refresh(ctx, widget_ref),
        CommandBody::UpsertExecutionResult {
            widget_ref,
            result,
            error,
            is_loading,
            export_ready,
        } => executions::upsert(
            ctx,
            widget_ref,
            executions::ExecutionUpdate {
                result,
                error,
                is_loading,
                export_ready,
            },
        ),
        CommandBody::ClearExecutionResults { widget_refs } => executions::clear(ctx, widget_refs),

        CommandBody::RequestAsyncRender { id } => Ok(render::request(ctx, id)),
        CommandBody::ResolveAsyncRender { id } => Ok(render::resolve(ctx, id)),
    }
}

/// Turns the result of a background load into state and events. A result whose
/// state entry was invalidated meanwhile fails as superseded.
pub fn complete_task(state: &DashboardState, completion: TaskCompletion) -> Result<Outcome, CommandError> {
    let TaskCompletion {
        key,
        request_id,
        output,
    } = completion;
    match (key, output) {
        (TaskKey::Execution(widget_ref), TaskOutput::Execution(result)) => {
            executions::on_completed(state, widget_ref, request_id, result)
        }
        (TaskKey::Elements(filter_local_id), TaskOutput::Elements(result)) => {
            filters::on_elements_loaded(state, filter_local_id, request_id, result)
        }
        (key, _) => Err(CommandError::InconsistentState(format!(
            "background load for {key} produced a mismatched result"
        ))),
    }
}
