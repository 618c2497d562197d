use std::collections::HashSet;

use shared::{
    domain::{FilterLocalId, ObjRef},
    filters::{
        AttributeElements, DashboardAttributeFilter, DashboardDateFilter, FilterContextDefinition,
        FilterContextItem, SelectionType,
    },
    protocol::DateFilterSelection,
};

use super::{existing_position, insert_position};
use crate::error::{CommandError, StateError};

#[derive(Debug, Clone, Default)]
pub struct FilterContextState {
    pub filters: FilterContextDefinition,
    /// Staged selection changes awaiting an explicit apply.
    pub working: Option<FilterContextDefinition>,
    pub filter_context_ref: Option<ObjRef>,
}

impl FilterContextState {
    /// The context selection changes are made against: the working copy when staging.
    pub fn staged_or_applied(&self, staging: bool) -> FilterContextDefinition {
        match (&self.working, staging) {
            (Some(working), true) => working.clone(),
            _ => self.filters.clone(),
        }
    }
}

pub(crate) fn ensure_unique_local_ids(filters: &FilterContextDefinition) -> Result<(), StateError> {
    let mut seen = HashSet::new();
    for filter in filters.attribute_filters() {
        if !seen.insert(&filter.local_identifier) {
            return Err(StateError::DuplicateFilter(
                filter.local_identifier.to_string(),
            ));
        }
    }
    Ok(())
}

fn attribute_slots(filters: &FilterContextDefinition) -> Vec<usize> {
    filters
        .filters
        .iter()
        .enumerate()
        .filter(|(_, item)| item.as_attribute().is_some())
        .map(|(i, _)| i)
        .collect()
}

fn attribute_index(filters: &FilterContextDefinition, local_id: &FilterLocalId) -> Option<usize> {
    filters
        .attribute_filters()
        .position(|filter| &filter.local_identifier == local_id)
}

/// Inserts among the attribute filters; `index` counts attribute filters only.
pub(crate) fn insert_attribute_filter(
    filters: &mut FilterContextDefinition,
    filter: DashboardAttributeFilter,
    index: i32,
) -> Result<usize, CommandError> {
    let slots = attribute_slots(filters);
    let position = insert_position(index, slots.len()).ok_or_else(|| {
        CommandError::invalid(format!("cannot insert attribute filter at index {index}"))
    })?;
    let absolute = match slots.get(position) {
        Some(slot) => *slot,
        None => filters.filters.len(),
    };
    filters
        .filters
        .insert(absolute, FilterContextItem::Attribute(filter));
    Ok(position)
}

pub(crate) fn move_attribute_filter(
    filters: &mut FilterContextDefinition,
    local_id: &FilterLocalId,
    index: i32,
) -> Result<(usize, usize), CommandError> {
    let from = attribute_index(filters, local_id)
        .ok_or_else(|| CommandError::invalid(format!("attribute filter {local_id} not found")))?;
    let slots = attribute_slots(filters);
    let to = existing_position(index, slots.len()).ok_or_else(|| {
        CommandError::invalid(format!("cannot move attribute filter to index {index}"))
    })?;
    if from == to {
        return Ok((from, to));
    }

    let item = filters.filters.remove(slots[from]);
    let remaining = attribute_slots(filters);
    let absolute = match remaining.get(to) {
        Some(slot) => *slot,
        None => remaining
            .last()
            .map(|slot| slot + 1)
            .unwrap_or(filters.filters.len()),
    };
    filters.filters.insert(absolute, item);
    Ok((from, to))
}

/// Removes the filters and strips parent references to them. Returns the removed
/// filters and the local ids of the children that lost a parent.
pub(crate) fn remove_attribute_filters(
    filters: &mut FilterContextDefinition,
    local_ids: &[FilterLocalId],
) -> (Vec<DashboardAttributeFilter>, Vec<FilterLocalId>) {
    let mut removed = Vec::new();
    filters.filters.retain(|item| match item {
        FilterContextItem::Attribute(filter) if local_ids.contains(&filter.local_identifier) => {
            removed.push(filter.clone());
            false
        }
        _ => true,
    });

    let mut affected = Vec::new();
    for item in &mut filters.filters {
        if let FilterContextItem::Attribute(filter) = item {
            let before = filter.filter_elements_by.len();
            filter
                .filter_elements_by
                .retain(|parent| !local_ids.contains(&parent.filter_local_identifier));
            if filter.filter_elements_by.len() != before {
                affected.push(filter.local_identifier.clone());
            }
        }
    }
    (removed, affected)
}

pub(crate) fn date_filter_from_selection(
    data_set: Option<ObjRef>,
    local_identifier: Option<FilterLocalId>,
    selection: DateFilterSelection,
) -> DashboardDateFilter {
    DashboardDateFilter {
        local_identifier,
        data_set,
        filter_type: selection.filter_type,
        granularity: selection.granularity,
        from: selection.from,
        to: selection.to,
        option_local_id: selection.option_local_id,
    }
}

/// Applies a date selection. An all-time common selection removes the common filter;
/// dimension filters stay in place and are updated.
pub(crate) fn set_date_filter(
    filters: &mut FilterContextDefinition,
    data_set: Option<&ObjRef>,
    selection: DateFilterSelection,
    same_data_set: impl Fn(&ObjRef, &ObjRef) -> bool,
) -> Result<Option<DashboardDateFilter>, CommandError> {
    let position = filters.filters.iter().position(|item| match (item, data_set) {
        (FilterContextItem::Date(filter), None) => filter.data_set.is_none(),
        (FilterContextItem::Date(filter), Some(target)) => filter
            .data_set
            .as_ref()
            .is_some_and(|current| same_data_set(current, target)),
        _ => false,
    });

    match (position, data_set) {
        (Some(position), None) => {
            let next = date_filter_from_selection(None, None, selection);
            if next.is_all_time() {
                filters.filters.remove(position);
                Ok(None)
            } else {
                filters.filters[position] = FilterContextItem::Date(next.clone());
                Ok(Some(next))
            }
        }
        (None, None) => {
            let next = date_filter_from_selection(None, None, selection);
            if next.is_all_time() {
                return Ok(None);
            }
            filters
                .filters
                .insert(0, FilterContextItem::Date(next.clone()));
            Ok(Some(next))
        }
        (Some(position), Some(_)) => {
            let FilterContextItem::Date(current) = &filters.filters[position] else {
                return Err(CommandError::InconsistentState(
                    "date filter slot holds an attribute filter".into(),
                ));
            };
            let next = date_filter_from_selection(
                current.data_set.clone(),
                current.local_identifier.clone(),
                selection,
            );
            filters.filters[position] = FilterContextItem::Date(next.clone());
            Ok(Some(next))
        }
        (None, Some(target)) => Err(CommandError::invalid(format!(
            "no date filter for data set {target} in the filter context"
        ))),
    }
}

pub(crate) fn set_attribute_selection(
    filter: &mut DashboardAttributeFilter,
    elements: AttributeElements,
    selection_type: SelectionType,
) {
    filter.attribute_elements = elements;
    filter.negative_selection = selection_type == SelectionType::NotIn;
}

pub(crate) fn select_all(filter: &mut DashboardAttributeFilter) {
    filter.attribute_elements = match &filter.attribute_elements {
        AttributeElements::Values(_) => AttributeElements::Values(Vec::new()),
        AttributeElements::Uris(_) => AttributeElements::Uris(Vec::new()),
    };
    filter.negative_selection = true;
}

/// Merges the given filters into the context by local id (or display form for
/// attribute filters, data set for date filters). Unmatched inputs are reported back.
pub(crate) fn merge_selection(
    filters: &mut FilterContextDefinition,
    incoming: Vec<FilterContextItem>,
    reset_others: bool,
    same_display_form: impl Fn(&ObjRef, &ObjRef) -> bool,
    same_data_set: impl Fn(&ObjRef, &ObjRef) -> bool,
) -> Vec<FilterContextItem> {
    let mut touched_attributes = HashSet::new();
    let mut touched_common_date = false;
    let mut touched_date_sets: Vec<ObjRef> = Vec::new();
    let mut unmatched = Vec::new();

    for item in incoming {
        match item {
            FilterContextItem::Attribute(source) => {
                let target = filters.filters.iter_mut().find_map(|existing| match existing {
                    FilterContextItem::Attribute(filter)
                        if filter.local_identifier == source.local_identifier
                            || same_display_form(&filter.display_form, &source.display_form) =>
                    {
                        Some(filter)
                    }
                    _ => None,
                });
                match target {
                    Some(filter) => {
                        filter.attribute_elements = source.attribute_elements;
                        filter.negative_selection = source.negative_selection;
                        touched_attributes.insert(filter.local_identifier.clone());
                    }
                    None => unmatched.push(FilterContextItem::Attribute(source)),
                }
            }
            FilterContextItem::Date(source) => {
                let selection = DateFilterSelection {
                    filter_type: source.filter_type,
                    granularity: source.granularity,
                    from: source.from.clone(),
                    to: source.to.clone(),
                    option_local_id: source.option_local_id.clone(),
                };
                let data_set = source.data_set.clone();
                match set_date_filter(filters, data_set.as_ref(), selection, &same_data_set) {
                    Ok(_) => match data_set {
                        Some(data_set) => touched_date_sets.push(data_set),
                        None => touched_common_date = true,
                    },
                    Err(_) => unmatched.push(FilterContextItem::Date(source)),
                }
            }
        }
    }

    if reset_others {
        if !touched_common_date {
            filters
                .filters
                .retain(|item| !matches!(item, FilterContextItem::Date(f) if f.data_set.is_none()));
        }
        for item in &mut filters.filters {
            match item {
                FilterContextItem::Attribute(filter)
                    if !touched_attributes.contains(&filter.local_identifier) =>
                {
                    select_all(filter)
                }
                FilterContextItem::Date(filter) => {
                    let touched = filter.data_set.as_ref().map_or(true, |current| {
                        touched_date_sets
                            .iter()
                            .any(|data_set| same_data_set(current, data_set))
                    });
                    if !touched {
                        filter.filter_type = Default::default();
                        filter.from = None;
                        filter.to = None;
                        filter.option_local_id = None;
                    }
                }
                _ => {}
            }
        }
    }

    unmatched
}

/// Whether `child` (transitively) filters its elements by itself through the parent graph.
pub(crate) fn has_circular_dependency(
    filters: &FilterContextDefinition,
    start: &FilterLocalId,
) -> bool {
    let mut visited = HashSet::new();
    let mut pending: Vec<&FilterLocalId> = filters
        .attribute_filter(start)
        .map(|filter| {
            filter
                .filter_elements_by
                .iter()
                .map(|parent| &parent.filter_local_identifier)
                .collect()
        })
        .unwrap_or_default();

    while let Some(next) = pending.pop() {
        if next == start {
            return true;
        }
        if !visited.insert(next) {
            continue;
        }
        if let Some(filter) = filters.attribute_filter(next) {
            pending.extend(
                filter
                    .filter_elements_by
                    .iter()
                    .map(|parent| &parent.filter_local_identifier),
            );
        }
    }
    false
}

/// Filters that (transitively) use `parent` to narrow their elements.
pub(crate) fn descendants(
    filters: &FilterContextDefinition,
    parent: &FilterLocalId,
) -> Vec<FilterLocalId> {
    let mut found: Vec<FilterLocalId> = Vec::new();
    let mut frontier = vec![parent.clone()];
    while let Some(current) = frontier.pop() {
        for filter in filters.attribute_filters() {
            let is_child = filter
                .filter_elements_by
                .iter()
                .any(|p| p.filter_local_identifier == current);
            if is_child && &filter.local_identifier != parent && !found.contains(&filter.local_identifier) {
                found.push(filter.local_identifier.clone());
                frontier.push(filter.local_identifier.clone());
            }
        }
    }
    found
}
