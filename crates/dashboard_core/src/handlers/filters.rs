use shared::{
    domain::{FilterApplyMode, FilterLocalId, ObjRef},
    filters::{
        AttributeElement, AttributeElements, AttributeFilterParent, AttributeFilterSelectionMode,
        DashboardAttributeFilter, FilterContextDefinition, FilterContextItem, IgnoredFilter,
        SelectionType,
    },
    protocol::{DateFilterSelection, EventBody, ParentFiltersValidation},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{HandlerContext, Outcome, TaskKey, TaskOutput};
use crate::{
    backend::BackendError,
    error::CommandError,
    store::{filter_context, DashboardState, StateMutation},
    validation::{self, ParentFilterCheck},
};

fn is_staging(state: &DashboardState) -> bool {
    state.config.settings.filter_apply_mode == FilterApplyMode::AllAtOnce
}

/// Applies a structural change to the applied filters and, when present, to the staged copy.
fn structural_change<T>(
    state: &DashboardState,
    mut change: impl FnMut(&mut FilterContextDefinition) -> Result<T, CommandError>,
) -> Result<(T, Vec<StateMutation>), CommandError> {
    let mut applied = state.filter_context.filters.clone();
    let result = change(&mut applied)?;
    let mut mutations = vec![StateMutation::SetFilterContext(applied)];
    if let Some(working) = &state.filter_context.working {
        let mut working = working.clone();
        change(&mut working)?;
        mutations.push(StateMutation::SetWorkingFilterContext(Some(working)));
    }
    Ok((result, mutations))
}

/// Children of every filter whose selection differs between `before` and `after`.
fn narrowed_children(
    before: &FilterContextDefinition,
    after: &FilterContextDefinition,
) -> Vec<FilterLocalId> {
    let mut children: Vec<FilterLocalId> = Vec::new();
    for filter in after.attribute_filters() {
        let unchanged = before
            .attribute_filter(&filter.local_identifier)
            .is_some_and(|previous| {
                previous.attribute_elements == filter.attribute_elements
                    && previous.negative_selection == filter.negative_selection
            });
        if unchanged {
            continue;
        }
        for child in filter_context::descendants(after, &filter.local_identifier) {
            if !children.contains(&child) {
                children.push(child);
            }
        }
    }
    children
}

/// Cancels element loads of the given filters and drops their cached elements.
fn drop_elements(ctx: &mut HandlerContext<'_>, local_ids: Vec<FilterLocalId>) -> Option<StateMutation> {
    if local_ids.is_empty() {
        return None;
    }
    for local_id in &local_ids {
        if let Some(cancelled) = ctx.tasks.cancel(&TaskKey::Elements(local_id.clone())) {
            ctx.superseded.push(cancelled);
        }
    }
    Some(StateMutation::ClearElements(local_ids))
}

/// Stores a selection change either as staged or as applied. Applying invalidates
/// executions and the elements of children whose parent selection moved.
fn commit_selection(
    ctx: &mut HandlerContext<'_>,
    outcome: &mut Outcome,
    filters: FilterContextDefinition,
    staged: bool,
) {
    if staged {
        outcome
            .mutations
            .push(StateMutation::SetWorkingFilterContext(Some(filters)));
        return;
    }
    let children = narrowed_children(&ctx.state.filter_context.filters, &filters);
    outcome.mutations.push(StateMutation::SetFilterContext(filters));
    outcome.mutations.extend(drop_elements(ctx, children));
    let invalidate = ctx.invalidate_executions(None);
    outcome.mutations.push(invalidate);
}

fn missing_filter(local_id: &FilterLocalId) -> CommandError {
    CommandError::invalid(format!("attribute filter {local_id} not found"))
}

pub fn change_date_filter_selection(
    ctx: &mut HandlerContext<'_>,
    data_set: Option<ObjRef>,
    selection: DateFilterSelection,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    if let Some(data_set) = &data_set {
        if state.catalog.date_data_set(data_set).is_none() {
            return Err(CommandError::invalid(format!(
                "date data set {data_set} is not in the catalog"
            )));
        }
    }
    let staged = is_staging(&state);
    let mut filters = state.filter_context.staged_or_applied(staged);
    let filter = filter_context::set_date_filter(&mut filters, data_set.as_ref(), selection, |a, b| {
        state.catalog.same_date_data_set(a, b)
    })?;

    let mut outcome = Outcome::event(EventBody::DateFilterChanged {
        data_set,
        filter,
        staged,
    });
    commit_selection(ctx, &mut outcome, filters, staged);
    Ok(outcome)
}

pub struct NewAttributeFilter {
    pub display_form: ObjRef,
    pub index: i32,
    pub parent_filters: Vec<AttributeFilterParent>,
    pub initial_selection: Option<AttributeElements>,
    pub initial_is_negative_selection: bool,
    pub selection_mode: AttributeFilterSelectionMode,
    pub title: Option<String>,
}

pub async fn add_attribute_filter(
    ctx: &mut HandlerContext<'_>,
    request: NewAttributeFilter,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    validation::validate_can_add_attribute_filter(&state, &request.display_form)?;

    let local_id = FilterLocalId::new(Uuid::new_v4().simple().to_string());
    let (elements, negative_selection) = match request.initial_selection {
        Some(elements) => (elements, request.initial_is_negative_selection),
        None => (AttributeElements::default(), true),
    };
    let selection_type = if negative_selection {
        SelectionType::NotIn
    } else {
        SelectionType::In
    };
    validation::validate_selection(
        &state.config.capabilities,
        &local_id,
        request.selection_mode,
        &elements,
        selection_type,
    )?;

    let filter = DashboardAttributeFilter {
        local_identifier: local_id.clone(),
        display_form: request.display_form,
        title: request.title,
        attribute_elements: elements,
        negative_selection,
        selection_mode: request.selection_mode,
        filter_elements_by: request.parent_filters,
    };

    if !filter.filter_elements_by.is_empty() {
        let mut candidate = state.filter_context.filters.clone();
        candidate
            .filters
            .push(FilterContextItem::Attribute(filter.clone()));
        let check = ParentFilterCheck {
            filters: &candidate,
            catalog: &state.catalog,
            capabilities: state.config.capabilities,
            child_local_id: &local_id,
            child_display_form: &filter.display_form,
            parents: &filter.filter_elements_by,
        };
        let result = check.run(ctx.backend.as_ref(), ctx.workspace()).await?;
        if result != ParentFiltersValidation::Valid {
            return Err(CommandError::Rejected(result));
        }
    }

    let (index, mutations) = structural_change(&state, |filters| {
        filter_context::insert_attribute_filter(filters, filter.clone(), request.index)
    })?;
    let mut outcome = Outcome {
        mutations,
        events: vec![EventBody::AttributeFilterAdded {
            filter: filter.clone(),
            index,
        }],
        start_render_session: false,
    };
    if !filter.is_all_selected() {
        let invalidate = ctx.invalidate_executions(None);
        outcome.mutations.push(invalidate);
    }
    Ok(outcome)
}

pub fn remove_attribute_filters(
    ctx: &mut HandlerContext<'_>,
    filter_local_ids: Vec<FilterLocalId>,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    if filter_local_ids.is_empty() {
        return Err(CommandError::invalid("no attribute filters to remove"));
    }
    if let Some(unknown) = filter_local_ids
        .iter()
        .find(|id| state.filter_context.filters.attribute_filter(id).is_none())
    {
        return Err(missing_filter(unknown));
    }

    let ((removed, affected_children), mut mutations) = structural_change(&state, |filters| {
        Ok(filter_context::remove_attribute_filters(filters, &filter_local_ids))
    })?;

    // widgets stop ignoring filters that no longer exist
    let removed_forms: Vec<&ObjRef> = removed.iter().map(|f| &f.display_form).collect();
    for widget in state.layout.layout().widgets() {
        let Some(settings) = widget.filter_settings() else {
            continue;
        };
        let refers_to_removed = |entry: &IgnoredFilter| match entry {
            IgnoredFilter::AttributeFilter { display_form } => removed_forms
                .iter()
                .any(|removed| state.catalog.same_display_form(removed, display_form)),
            IgnoredFilter::DateFilter { .. } => false,
        };
        if settings.ignore_dashboard_filters.iter().any(refers_to_removed) {
            let mut updated = widget.clone();
            if let Some(settings) = updated.filter_settings_mut() {
                settings
                    .ignore_dashboard_filters
                    .retain(|entry| !refers_to_removed(entry));
            }
            mutations.push(StateMutation::ReplaceWidget(updated));
        }
    }

    let dropped = filter_local_ids
        .iter()
        .chain(affected_children.iter())
        .cloned()
        .collect();
    mutations.extend(drop_elements(ctx, dropped));
    mutations.push(ctx.invalidate_executions(None));

    Ok(Outcome {
        mutations,
        events: vec![EventBody::AttributeFiltersRemoved {
            removed,
            affected_children,
        }],
        start_render_session: false,
    })
}

pub fn move_attribute_filter(
    ctx: &mut HandlerContext<'_>,
    filter_local_id: FilterLocalId,
    index: i32,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    if state.filter_context.filters.attribute_filter(&filter_local_id).is_none() {
        return Err(missing_filter(&filter_local_id));
    }
    let ((from_index, to_index), mutations) = structural_change(&state, |filters| {
        filter_context::move_attribute_filter(filters, &filter_local_id, index)
    })?;
    Ok(Outcome {
        mutations,
        events: vec![EventBody::AttributeFilterMoved {
            filter_local_id,
            from_index,
            to_index,
        }],
        start_render_session: false,
    })
}

pub fn change_attribute_filter_selection(
    ctx: &mut HandlerContext<'_>,
    filter_local_id: FilterLocalId,
    elements: AttributeElements,
    selection_type: SelectionType,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    let staged = is_staging(&state);
    let mut filters = state.filter_context.staged_or_applied(staged);
    let filter = filters
        .attribute_filter_mut(&filter_local_id)
        .ok_or_else(|| missing_filter(&filter_local_id))?;
    validation::validate_selection(
        &state.config.capabilities,
        &filter_local_id,
        filter.selection_mode,
        &elements,
        selection_type,
    )?;
    filter_context::set_attribute_selection(filter, elements, selection_type);
    let changed = filter.clone();

    let mut outcome = Outcome::event(EventBody::AttributeFilterSelectionChanged {
        filter: changed,
        staged,
    });
    commit_selection(ctx, &mut outcome, filters, staged);
    Ok(outcome)
}

pub async fn set_attribute_filter_parents(
    ctx: &mut HandlerContext<'_>,
    filter_local_id: FilterLocalId,
    parent_filters: Vec<AttributeFilterParent>,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    let check = ParentFilterCheck::for_existing(&state, &filter_local_id, Some(parent_filters.as_slice()))
        .ok_or_else(|| missing_filter(&filter_local_id))?;
    let result = check.run(ctx.backend.as_ref(), ctx.workspace()).await?;
    if result != ParentFiltersValidation::Valid {
        return Err(CommandError::Rejected(result));
    }

    let mut candidate = state.filter_context.filters.clone();
    if let Some(filter) = candidate.attribute_filter_mut(&filter_local_id) {
        filter.filter_elements_by = parent_filters.clone();
    }
    if !state.config.capabilities.supports_circular_dependencies_in_filters
        && filter_context::has_circular_dependency(&candidate, &filter_local_id)
    {
        return Err(CommandError::invalid(format!(
            "parents of {filter_local_id} would create a circular dependency"
        )));
    }

    let (filter, mut mutations) = structural_change(&state, |filters| {
        let filter = filters
            .attribute_filter_mut(&filter_local_id)
            .ok_or_else(|| missing_filter(&filter_local_id))?;
        filter.filter_elements_by = parent_filters.clone();
        Ok(filter.clone())
    })?;
    mutations.extend(drop_elements(ctx, vec![filter_local_id]));

    Ok(Outcome {
        mutations,
        events: vec![EventBody::AttributeFilterParentsChanged { filter }],
        start_render_session: false,
    })
}

pub fn change_filter_context_selection(
    ctx: &mut HandlerContext<'_>,
    incoming: Vec<FilterContextItem>,
    reset_others: bool,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    let staged = is_staging(&state);
    let mut filters = state.filter_context.staged_or_applied(staged);
    let unmatched = filter_context::merge_selection(
        &mut filters,
        incoming,
        reset_others,
        |a, b| state.catalog.same_display_form(a, b),
        |a, b| state.catalog.same_date_data_set(a, b),
    );
    if !unmatched.is_empty() {
        warn!(
            "filters without a counterpart in the filter context were skipped count={}",
            unmatched.len()
        );
    }

    let mut outcome = Outcome::event(EventBody::FilterContextChanged {
        filter_context: filters.clone(),
    });
    commit_selection(ctx, &mut outcome, filters, staged);
    Ok(outcome)
}

pub fn apply_working_filter_context(ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    let Some(working) = state.filter_context.working.clone() else {
        debug!("nothing staged to apply");
        return Ok(Outcome::event(EventBody::FilterContextChanged {
            filter_context: state.filter_context.filters.clone(),
        }));
    };
    let mut outcome = Outcome::event(EventBody::FilterContextChanged {
        filter_context: working.clone(),
    });
    outcome
        .mutations
        .push(StateMutation::SetWorkingFilterContext(None));
    if working != state.filter_context.filters {
        commit_selection(ctx, &mut outcome, working, false);
    }
    Ok(outcome)
}

pub fn reset_working_filter_context(_ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    Ok(Outcome::event(EventBody::WorkingFilterContextReset)
        .with_mutation(StateMutation::SetWorkingFilterContext(None)))
}

pub async fn validate_attribute_filter_parents(
    ctx: &mut HandlerContext<'_>,
    filter_local_id: FilterLocalId,
    parent_filters: Option<Vec<AttributeFilterParent>>,
) -> Result<Outcome, CommandError> {
    let state = ctx.state.clone();
    let check = ParentFilterCheck::for_existing(&state, &filter_local_id, parent_filters.as_deref())
        .ok_or_else(|| missing_filter(&filter_local_id))?;
    let result = check.run(ctx.backend.as_ref(), ctx.workspace()).await?;
    Ok(Outcome::event(EventBody::AttributeFilterParentsValidated {
        filter_local_id,
        result,
    }))
}

pub fn load_attribute_filter_elements(
    ctx: &mut HandlerContext<'_>,
    filter_local_id: FilterLocalId,
    limit: Option<u32>,
) -> Result<Outcome, CommandError> {
    let display_form = ctx
        .state
        .filter_context
        .filters
        .attribute_filter(&filter_local_id)
        .ok_or_else(|| missing_filter(&filter_local_id))?
        .display_form
        .clone();

    let backend = ctx.backend.clone();
    let workspace = ctx.workspace().to_string();
    let (request_id, superseded) = ctx.tasks.spawn(
        TaskKey::Elements(filter_local_id.clone()),
        ctx.correlation_id.clone(),
        ctx.command_type,
        async move {
            TaskOutput::Elements(
                backend
                    .get_attribute_elements(&workspace, &display_form, limit)
                    .await,
            )
        },
    );
    ctx.superseded.extend(superseded);

    Ok(Outcome::event(EventBody::AttributeFilterElementsRequested {
        filter_local_id: filter_local_id.clone(),
    })
    .with_mutation(StateMutation::ElementsLoading {
        filter_local_id,
        request_id,
    }))
}

pub fn on_elements_loaded(
    state: &DashboardState,
    filter_local_id: FilterLocalId,
    request_id: Uuid,
    result: Result<Vec<AttributeElement>, BackendError>,
) -> Result<Outcome, CommandError> {
    let current = state
        .attribute_elements
        .get(&filter_local_id)
        .and_then(|entry| entry.request_id);
    if current != Some(request_id) {
        debug!("stale elements result dropped filter={}", filter_local_id);
        return Err(CommandError::Superseded(format!(
            "elements of filter {filter_local_id} were invalidated while loading"
        )));
    }
    Ok(match result {
        Ok(elements) => Outcome::event(EventBody::AttributeFilterElementsLoaded {
            filter_local_id: filter_local_id.clone(),
            elements: elements.clone(),
        })
        .with_mutation(StateMutation::ElementsLoaded {
            filter_local_id,
            elements,
        }),
        Err(err) => {
            warn!("loading elements failed filter={} error={}", filter_local_id, err);
            let error = err.to_payload();
            Outcome::event(EventBody::AttributeFilterElementsFailed {
                filter_local_id: filter_local_id.clone(),
                error: error.clone(),
            })
            .with_mutation(StateMutation::ElementsFailed {
                filter_local_id,
                error,
            })
        }
    })
}

#[cfg(test)]
#[path = "../tests/filter_handlers_tests.rs"]
mod tests;
