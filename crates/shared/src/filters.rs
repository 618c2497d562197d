use serde::{Deserialize, Serialize};

use crate::domain::{FilterLocalId, ObjRef};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterContextDefinition {
    #[serde(default)]
    pub filters: Vec<FilterContextItem>,
}

impl FilterContextDefinition {
    pub fn attribute_filters(&self) -> impl Iterator<Item = &DashboardAttributeFilter> {
        self.filters.iter().filter_map(FilterContextItem::as_attribute)
    }

    pub fn date_filters(&self) -> impl Iterator<Item = &DashboardDateFilter> {
        self.filters.iter().filter_map(FilterContextItem::as_date)
    }

    pub fn common_date_filter(&self) -> Option<&DashboardDateFilter> {
        self.date_filters().find(|filter| filter.data_set.is_none())
    }

    pub fn attribute_filter(&self, local_id: &FilterLocalId) -> Option<&DashboardAttributeFilter> {
        self.attribute_filters()
            .find(|filter| &filter.local_identifier == local_id)
    }

    pub fn attribute_filter_mut(
        &mut self,
        local_id: &FilterLocalId,
    ) -> Option<&mut DashboardAttributeFilter> {
        self.filters.iter_mut().find_map(|item| match item {
            FilterContextItem::Attribute(filter) if &filter.local_identifier == local_id => {
                Some(filter)
            }
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterContextItem {
    #[serde(rename = "date_filter")]
    Date(DashboardDateFilter),
    #[serde(rename = "attribute_filter")]
    Attribute(DashboardAttributeFilter),
}

impl FilterContextItem {
    pub fn as_attribute(&self) -> Option<&DashboardAttributeFilter> {
        match self {
            Self::Attribute(filter) => Some(filter),
            Self::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<&DashboardDateFilter> {
        match self {
            Self::Date(filter) => Some(filter),
            Self::Attribute(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFilterType {
    Absolute,
    #[default]
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGranularity {
    #[default]
    Date,
    Week,
    Month,
    Quarter,
    Year,
}

/// Either an offset (relative filters) or a formatted date (absolute filters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateBound {
    Offset(i64),
    Date(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardDateFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_identifier: Option<FilterLocalId>,
    /// `None` for the common date filter, `Some` for a filter bound to a date dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set: Option<ObjRef>,
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

impl DashboardDateFilter {
    pub fn is_all_time(&self) -> bool {
        self.filter_type == DateFilterType::Relative && self.from.is_none() && self.to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeElements {
    Uris(Vec<String>),
    Values(Vec<String>),
}

impl Default for AttributeElements {
    fn default() -> Self {
        Self::Uris(Vec::new())
    }
}

impl AttributeElements {
    pub fn len(&self) -> usize {
        match self {
            Self::Uris(items) | Self::Values(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeFilterSelectionMode {
    Single,
    #[default]
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionType {
    In,
    NotIn,
}

/// Parent filter whose selection narrows the elements offered by a child filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilterParent {
    pub filter_local_identifier: FilterLocalId,
    /// Connecting attributes the child is filtered over.
    #[serde(default)]
    pub over: Vec<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardAttributeFilter {
    pub local_identifier: FilterLocalId,
    pub display_form: ObjRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub attribute_elements: AttributeElements,
    #[serde(default = "default_negative_selection")]
    pub negative_selection: bool,
    #[serde(default)]
    pub selection_mode: AttributeFilterSelectionMode,
    #[serde(default)]
    pub filter_elements_by: Vec<AttributeFilterParent>,
}

fn default_negative_selection() -> bool {
    true
}

impl DashboardAttributeFilter {
    pub fn is_all_selected(&self) -> bool {
        self.negative_selection && self.attribute_elements.is_empty()
    }

    pub fn selection_type(&self) -> SelectionType {
        if self.negative_selection {
            SelectionType::NotIn
        } else {
            SelectionType::In
        }
    }
}

/// Reference to a dashboard filter a widget chooses not to react to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredFilter {
    AttributeFilter { display_form: ObjRef },
    DateFilter { data_set: ObjRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeElement {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}
