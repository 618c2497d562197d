use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filters::{FilterContextDefinition, IgnoredFilter};

/// Reference to a metadata object, either by identifier or by URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjRef {
    Identifier(String),
    Uri(String),
}

impl ObjRef {
    pub fn identifier(value: impl Into<String>) -> Self {
        Self::Identifier(value.into())
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self::Uri(value.into())
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(id) => write!(f, "id:{id}"),
            Self::Uri(uri) => write!(f, "uri:{uri}"),
        }
    }
}

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(CorrelationId);
string_newtype!(FilterLocalId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    View,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSize {
    pub grid_width: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_height: Option<u32>,
}

impl Default for ItemSize {
    fn default() -> Self {
        Self {
            grid_width: 12,
            grid_height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DashboardLayout {
    #[serde(default)]
    pub sections: Vec<LayoutSection>,
}

impl DashboardLayout {
    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.sections
            .iter()
            .flat_map(|section| section.items.iter().map(|item| &item.widget))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.items.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<SectionHeader>,
    #[serde(default)]
    pub items: Vec<LayoutItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    #[serde(default)]
    pub size: ItemSize,
    pub widget: Widget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    #[serde(rename = "ref")]
    pub widget_ref: ObjRef,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: WidgetKind,
}

/// Dashboard-filter related configuration shared by analytical widgets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub ignore_dashboard_filters: Vec<IgnoredFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_data_set: Option<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetKind {
    Insight(InsightWidget),
    Kpi(KpiWidget),
    RichText(RichTextWidget),
    VisualizationSwitcher(VisualizationSwitcherWidget),
    Custom(CustomWidget),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightWidget {
    pub insight: ObjRef,
    #[serde(default)]
    pub filter_settings: FilterSettings,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiComparisonType {
    #[default]
    None,
    PreviousPeriod,
    LastYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiComparisonDirection {
    #[default]
    GrowIsGood,
    GrowIsBad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiWidget {
    pub measure: ObjRef,
    #[serde(default)]
    pub comparison_type: KpiComparisonType,
    #[serde(default)]
    pub comparison_direction: KpiComparisonDirection,
    #[serde(default)]
    pub filter_settings: FilterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichTextWidget {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub filter_settings: FilterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSwitcherWidget {
    #[serde(default)]
    pub visualizations: Vec<InsightWidget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomWidget {
    pub custom_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extras: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Insight,
    Kpi,
    RichText,
    VisualizationSwitcher,
    Custom,
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insight => "insight",
            Self::Kpi => "kpi",
            Self::RichText => "rich_text",
            Self::VisualizationSwitcher => "visualization_switcher",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl Widget {
    pub fn widget_type(&self) -> WidgetType {
        match &self.kind {
            WidgetKind::Insight(_) => WidgetType::Insight,
            WidgetKind::Kpi(_) => WidgetType::Kpi,
            WidgetKind::RichText(_) => WidgetType::RichText,
            WidgetKind::VisualizationSwitcher(_) => WidgetType::VisualizationSwitcher,
            WidgetKind::Custom(_) => WidgetType::Custom,
        }
    }

    /// Filter settings for widget kinds that react to dashboard filters.
    pub fn filter_settings(&self) -> Option<&FilterSettings> {
        match &self.kind {
            WidgetKind::Insight(widget) => Some(&widget.filter_settings),
            WidgetKind::Kpi(widget) => Some(&widget.filter_settings),
            WidgetKind::RichText(widget) => Some(&widget.filter_settings),
            WidgetKind::VisualizationSwitcher(_) | WidgetKind::Custom(_) => None,
        }
    }

    pub fn filter_settings_mut(&mut self) -> Option<&mut FilterSettings> {
        match &mut self.kind {
            WidgetKind::Insight(widget) => Some(&mut widget.filter_settings),
            WidgetKind::Kpi(widget) => Some(&mut widget.filter_settings),
            WidgetKind::RichText(widget) => Some(&mut widget.filter_settings),
            WidgetKind::VisualizationSwitcher(_) | WidgetKind::Custom(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterApplyMode {
    #[default]
    Individual,
    AllAtOnce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub enable_csv_export: bool,
    pub enable_xlsx_export: bool,
    pub filter_apply_mode: FilterApplyMode,
    pub max_attribute_filters: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            enable_csv_export: true,
            enable_xlsx_export: true,
            filter_apply_mode: FilterApplyMode::Individual,
            max_attribute_filters: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPermissions {
    pub can_manage_dashboard: bool,
    pub can_export_tabular: bool,
    pub can_export_report: bool,
}

impl Default for UserPermissions {
    fn default() -> Self {
        Self {
            can_manage_dashboard: true,
            can_export_tabular: true,
            can_export_report: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub settings: DashboardSettings,
    #[serde(default)]
    pub permissions: UserPermissions,
}

/// Persisted dashboard document as exchanged with the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DashboardDocument {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub dashboard_ref: Option<ObjRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub layout: DashboardLayout,
    #[serde(default)]
    pub filter_context: FilterContextDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_context_ref: Option<ObjRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    #[serde(rename = "ref")]
    pub dashboard_ref: ObjRef,
    pub identifier: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}
