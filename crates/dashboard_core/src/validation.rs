use std::collections::BTreeSet;

use shared::{
    domain::{FilterLocalId, LayoutItem, ObjRef},
    execution::ExportFormat,
    filters::{
        AttributeElements, AttributeFilterParent, AttributeFilterSelectionMode,
        FilterContextDefinition, IgnoredFilter, SelectionType,
    },
    protocol::ParentFiltersValidation,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    backend::{AnalyticalBackend, BackendCapabilities, BackendError},
    error::CommandError,
    selectors,
    store::{CatalogState, DashboardState, LayoutState},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("display form {0} is not in the catalog")]
    UnknownDisplayForm(ObjRef),
    #[error("display form {0} is not used by any dashboard filter")]
    FilterNotInContext(ObjRef),
    #[error("no date filter for data set {0} in the filter context")]
    DateFilterNotInContext(ObjRef),
    #[error("date data set {data_set} cannot filter widget {widget_ref}")]
    InvalidDateDataSet { widget_ref: ObjRef, data_set: ObjRef },
    #[error("single selection filter {0} accepts at most one selected element")]
    SingleSelectionViolated(FilterLocalId),
    #[error("the backend does not support element uris")]
    ElementUrisUnsupported,
    #[error("widget {0} has no result ready for export")]
    ExportNotReady(ObjRef),
    #[error("{format:?} export is not permitted for widget {widget_ref}")]
    ExportNotAllowed {
        widget_ref: ObjRef,
        format: ExportFormat,
    },
    #[error("widget {0} already exists in the layout")]
    DuplicateWidget(ObjRef),
    #[error("the dashboard already has the maximum of {0} attribute filters")]
    TooManyAttributeFilters(usize),
    #[error("an attribute filter for {0} already exists")]
    DuplicateAttributeFilter(ObjRef),
}

impl From<Rejection> for CommandError {
    fn from(rejection: Rejection) -> Self {
        CommandError::InvalidArguments(rejection.to_string())
    }
}

pub fn validate_can_add_attribute_filter(
    state: &DashboardState,
    display_form: &ObjRef,
) -> Result<(), Rejection> {
    if state.catalog.display_form(display_form).is_none() {
        return Err(Rejection::UnknownDisplayForm(display_form.clone()));
    }
    if selectors::select_attribute_filter_by_display_form(state, display_form).is_some() {
        return Err(Rejection::DuplicateAttributeFilter(display_form.clone()));
    }
    if !selectors::select_can_add_more_attribute_filters(state) {
        return Err(Rejection::TooManyAttributeFilters(
            state.config.settings.max_attribute_filters,
        ));
    }
    Ok(())
}

pub fn validate_selection(
    capabilities: &BackendCapabilities,
    local_id: &FilterLocalId,
    mode: AttributeFilterSelectionMode,
    elements: &AttributeElements,
    selection_type: SelectionType,
) -> Result<(), Rejection> {
    if matches!(elements, AttributeElements::Uris(uris) if !uris.is_empty())
        && !capabilities.supports_element_uris
    {
        return Err(Rejection::ElementUrisUnsupported);
    }
    let single_violated = match selection_type {
        SelectionType::In => elements.len() > 1,
        // an exclusion list may only be used to select everything
        SelectionType::NotIn => !elements.is_empty(),
    };
    if mode == AttributeFilterSelectionMode::Single && single_violated {
        return Err(Rejection::SingleSelectionViolated(local_id.clone()));
    }
    Ok(())
}

/// Ignored filters must name catalog objects that active dashboard filters use.
pub fn validate_ignored_filters(
    state: &DashboardState,
    ignored: &[IgnoredFilter],
) -> Result<(), Rejection> {
    for entry in ignored {
        match entry {
            IgnoredFilter::AttributeFilter { display_form } => {
                if state.catalog.display_form(display_form).is_none() {
                    return Err(Rejection::UnknownDisplayForm(display_form.clone()));
                }
                if selectors::select_attribute_filter_by_display_form(state, display_form).is_none()
                {
                    return Err(Rejection::FilterNotInContext(display_form.clone()));
                }
            }
            IgnoredFilter::DateFilter { data_set } => {
                let present = state.filter_context.filters.date_filters().any(|filter| {
                    filter
                        .data_set
                        .as_ref()
                        .is_some_and(|current| state.catalog.same_date_data_set(current, data_set))
                });
                if !present {
                    return Err(Rejection::DateFilterNotInContext(data_set.clone()));
                }
            }
        }
    }
    Ok(())
}

pub fn validate_date_data_set(
    catalog: &CatalogState,
    widget_ref: &ObjRef,
    available: &[ObjRef],
    candidate: &ObjRef,
) -> Result<(), Rejection> {
    if available
        .iter()
        .any(|data_set| catalog.same_date_data_set(data_set, candidate))
    {
        Ok(())
    } else {
        Err(Rejection::InvalidDateDataSet {
            widget_ref: widget_ref.clone(),
            data_set: candidate.clone(),
        })
    }
}

pub fn validate_export(
    state: &DashboardState,
    widget_ref: &ObjRef,
    format: ExportFormat,
) -> Result<(), Rejection> {
    if !selectors::select_is_export_ready(state, widget_ref) {
        return Err(Rejection::ExportNotReady(widget_ref.clone()));
    }
    if !selectors::select_is_export_format_allowed(state, format) {
        return Err(Rejection::ExportNotAllowed {
            widget_ref: widget_ref.clone(),
            format,
        });
    }
    Ok(())
}

/// New items may not reuse a widget ref already in the layout (other than `replacing`)
/// or repeat one among themselves.
pub fn validate_new_items(
    layout: &LayoutState,
    items: &[LayoutItem],
    replacing: Option<&ObjRef>,
) -> Result<(), Rejection> {
    let mut seen = BTreeSet::new();
    for item in items {
        let widget_ref = &item.widget.widget_ref;
        let taken = layout.contains(widget_ref) && Some(widget_ref) != replacing;
        if taken || !seen.insert(widget_ref) {
            return Err(Rejection::DuplicateWidget(widget_ref.clone()));
        }
    }
    Ok(())
}

/// Parent/child consistency check for one attribute filter.
pub struct ParentFilterCheck<'a> {
    pub filters: &'a FilterContextDefinition,
    pub catalog: &'a CatalogState,
    pub capabilities: BackendCapabilities,
    pub child_local_id: &'a FilterLocalId,
    pub child_display_form: &'a ObjRef,
    pub parents: &'a [AttributeFilterParent],
}

struct Connection {
    parent_attribute: ObjRef,
    over: Vec<ObjRef>,
}

impl<'a> ParentFilterCheck<'a> {
    /// Check for a filter already in the context, against `parents` or its own parents.
    pub fn for_existing(
        state: &'a DashboardState,
        child_local_id: &'a FilterLocalId,
        parents: Option<&'a [AttributeFilterParent]>,
    ) -> Option<Self> {
        let child = state.filter_context.filters.attribute_filter(child_local_id)?;
        Some(Self {
            filters: &state.filter_context.filters,
            catalog: &state.catalog,
            capabilities: state.config.capabilities,
            child_local_id,
            child_display_form: &child.display_form,
            parents: parents.unwrap_or(child.filter_elements_by.as_slice()),
        })
    }

    fn check_references(&self) -> Result<(), ParentFiltersValidation> {
        let all_known = self.parents.iter().all(|parent| {
            &parent.filter_local_identifier != self.child_local_id
                && self
                    .filters
                    .attribute_filter(&parent.filter_local_identifier)
                    .is_some()
        });
        if all_known {
            Ok(())
        } else {
            Err(ParentFiltersValidation::ExtraneousParent)
        }
    }

    fn resolve_metadata(&self) -> Result<(ObjRef, Vec<Connection>), ParentFiltersValidation> {
        let child_attribute = self
            .catalog
            .attribute_for_display_form(self.child_display_form)
            .ok_or(ParentFiltersValidation::InvalidMetadata)?
            .meta
            .obj_ref();

        let mut connections = Vec::with_capacity(self.parents.len());
        for parent in self.parents {
            let parent_filter = self
                .filters
                .attribute_filter(&parent.filter_local_identifier)
                .ok_or(ParentFiltersValidation::ExtraneousParent)?;
            let parent_attribute = self
                .catalog
                .attribute_for_display_form(&parent_filter.display_form)
                .ok_or(ParentFiltersValidation::InvalidMetadata)?
                .meta
                .obj_ref();
            let over = parent
                .over
                .iter()
                .map(|attribute| {
                    self.catalog
                        .attribute(attribute)
                        .map(|a| a.meta.obj_ref())
                        .ok_or(ParentFiltersValidation::InvalidMetadata)
                })
                .collect::<Result<Vec<_>, _>>()?;
            connections.push(Connection {
                parent_attribute,
                over,
            });
        }
        Ok((child_attribute, connections))
    }

    /// Checks run in order: references, catalog metadata, then connecting attributes.
    pub async fn run(
        &self,
        backend: &dyn AnalyticalBackend,
        workspace: &str,
    ) -> Result<ParentFiltersValidation, BackendError> {
        if let Err(result) = self.check_references() {
            return Ok(result);
        }
        let (child_attribute, connections) = match self.resolve_metadata() {
            Ok(resolved) => resolved,
            Err(result) => return Ok(result),
        };
        if !self.capabilities.supports_setting_connecting_attributes
            || connections.iter().all(|c| c.over.is_empty())
        {
            return Ok(ParentFiltersValidation::Valid);
        }

        let pairs: Vec<(ObjRef, ObjRef)> = connections
            .iter()
            .map(|c| (c.parent_attribute.clone(), child_attribute.clone()))
            .collect();
        let common = backend
            .get_common_attribute_ancestors(workspace, &pairs)
            .await?;

        for (connection, ancestors) in connections.iter().zip(common.iter()) {
            let ancestors: BTreeSet<ObjRef> = ancestors
                .iter()
                .map(|a| {
                    self.catalog
                        .attribute(a)
                        .map(|attribute| attribute.meta.obj_ref())
                        .unwrap_or_else(|| a.clone())
                })
                .collect();
            if !connection.over.iter().all(|over| ancestors.contains(over)) {
                debug!(
                    "parent connection rejected child={} parent_attribute={}",
                    self.child_local_id, connection.parent_attribute
                );
                return Ok(ParentFiltersValidation::InvalidConnection);
            }
        }
        if common.len() < connections.len() {
            return Ok(ParentFiltersValidation::InvalidConnection);
        }
        Ok(ParentFiltersValidation::Valid)
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
