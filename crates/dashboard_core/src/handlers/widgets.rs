use shared::{
    domain::{
        FilterSettings, KpiComparisonDirection, KpiComparisonType, ObjRef, Widget, WidgetKind,
    },
    execution::ExportConfig,
    filters::IgnoredFilter,
    protocol::{DateDatasetSelection, EventBody, FilterSettingsOperation},
};
use tracing::{info, warn};
use url::Url;

use super::{HandlerContext, Outcome};
use crate::{error::CommandError, selectors, store::StateMutation, validation};

fn find_widget(ctx: &HandlerContext<'_>, widget_ref: &ObjRef) -> Result<Widget, CommandError> {
    selectors::select_widget_by_ref(&ctx.state, widget_ref)
        .cloned()
        .ok_or_else(|| CommandError::invalid(format!("widget {widget_ref} not found")))
}

fn wrong_kind(widget: &Widget, expected: &str) -> CommandError {
    CommandError::invalid(format!(
        "widget {} is a {} widget, not {expected}",
        widget.widget_ref,
        widget.widget_type()
    ))
}

/// Replaces the widget definition as an undoable change.
fn widget_change(
    ctx: &mut HandlerContext<'_>,
    widget: Widget,
    invalidate: bool,
    event: EventBody,
) -> Outcome {
    let widget_ref = widget.widget_ref.clone();
    let mut outcome = Outcome::event(event)
        .with_mutation(ctx.record_undo())
        .with_mutation(StateMutation::ReplaceWidget(widget));
    if invalidate {
        let invalidate = ctx.invalidate_executions(Some(vec![widget_ref]));
        outcome.mutations.push(invalidate);
    }
    outcome
}

pub fn change_header(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    title: String,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    widget.title = title.clone();
    Ok(widget_change(
        ctx,
        widget,
        false,
        EventBody::WidgetHeaderChanged { widget_ref, title },
    ))
}

fn dedup(filters: Vec<IgnoredFilter>) -> Vec<IgnoredFilter> {
    let mut unique: Vec<IgnoredFilter> = Vec::with_capacity(filters.len());
    for filter in filters {
        if !unique.contains(&filter) {
            unique.push(filter);
        }
    }
    unique
}

/// Date datasets the widget may be filtered by: backend answer for executable widgets,
/// the whole catalog otherwise.
async fn available_date_data_sets(
    ctx: &HandlerContext<'_>,
    widget: &Widget,
) -> Result<Vec<ObjRef>, CommandError> {
    match selectors::select_execution_subject(widget) {
        Some(subject) => Ok(ctx
            .backend
            .get_available_date_datasets(ctx.workspace(), &subject)
            .await?),
        None => Ok(selectors::select_catalog_date_data_sets(&ctx.state)),
    }
}

pub async fn change_filter_settings(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    operation: FilterSettingsOperation,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    let current = widget.filter_settings().cloned().ok_or_else(|| {
        CommandError::invalid(format!(
            "widget {widget_ref} of type {} has no filter settings",
            widget.widget_type()
        ))
    })?;

    let mut next = current.clone();
    let mut requested_data_set = None;
    match operation {
        FilterSettingsOperation::Replace {
            ignore_filters,
            date_data_set,
        } => {
            validation::validate_ignored_filters(&ctx.state, &ignore_filters)?;
            next = FilterSettings {
                ignore_dashboard_filters: dedup(ignore_filters),
                date_data_set: date_data_set.clone(),
            };
            requested_data_set = date_data_set;
        }
        FilterSettingsOperation::IgnoreFilters { filters } => {
            validation::validate_ignored_filters(&ctx.state, &filters)?;
            next.ignore_dashboard_filters.extend(filters);
            next.ignore_dashboard_filters = dedup(next.ignore_dashboard_filters);
        }
        FilterSettingsOperation::UnignoreFilters { filters } => {
            next.ignore_dashboard_filters
                .retain(|entry| !filters.contains(entry));
        }
        FilterSettingsOperation::ReplaceIgnoredFilters { filters } => {
            validation::validate_ignored_filters(&ctx.state, &filters)?;
            next.ignore_dashboard_filters = dedup(filters);
        }
        FilterSettingsOperation::EnableDateFilter { date_data_set } => {
            let data_set = match date_data_set {
                DateDatasetSelection::DataSet(data_set) => data_set,
                DateDatasetSelection::Default => available_date_data_sets(ctx, &widget)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        CommandError::invalid(format!(
                            "widget {widget_ref} has no date data set to filter by"
                        ))
                    })?,
            };
            next.date_data_set = Some(data_set.clone());
            requested_data_set = Some(data_set);
        }
        FilterSettingsOperation::DisableDateFilter => next.date_data_set = None,
    }

    if let Some(data_set) = &requested_data_set {
        let available = available_date_data_sets(ctx, &widget).await?;
        validation::validate_date_data_set(&ctx.state.catalog, &widget_ref, &available, data_set)?;
    }

    let event = EventBody::WidgetFilterSettingsChanged {
        widget_ref: widget_ref.clone(),
        ignored_filters: next.ignore_dashboard_filters.clone(),
        date_data_set: next.date_data_set.clone(),
    };
    if let Some(settings) = widget.filter_settings_mut() {
        *settings = next;
    }
    Ok(widget_change(ctx, widget, true, event))
}

pub fn change_kpi_measure(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    measure: ObjRef,
    title: Option<String>,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    if selectors::select_catalog_measure(&ctx.state, &measure).is_none() {
        return Err(CommandError::invalid(format!(
            "measure {measure} is not in the catalog"
        )));
    }
    let WidgetKind::Kpi(kpi) = &mut widget.kind else {
        return Err(wrong_kind(&widget, "kpi"));
    };
    kpi.measure = measure.clone();
    if let Some(title) = title {
        widget.title = title;
    }
    Ok(widget_change(
        ctx,
        widget,
        true,
        EventBody::KpiWidgetMeasureChanged {
            widget_ref,
            measure,
        },
    ))
}

pub fn change_kpi_comparison(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    comparison_type: KpiComparisonType,
    comparison_direction: KpiComparisonDirection,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    let WidgetKind::Kpi(kpi) = &mut widget.kind else {
        return Err(wrong_kind(&widget, "kpi"));
    };
    kpi.comparison_type = comparison_type;
    kpi.comparison_direction = comparison_direction;
    Ok(widget_change(
        ctx,
        widget,
        true,
        EventBody::KpiWidgetComparisonChanged {
            widget_ref,
            comparison_type,
            comparison_direction,
        },
    ))
}

pub fn change_insight_properties(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    properties: serde_json::Value,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    let WidgetKind::Insight(insight) = &mut widget.kind else {
        return Err(wrong_kind(&widget, "insight"));
    };
    insight.properties = properties.clone();
    Ok(widget_change(
        ctx,
        widget,
        false,
        EventBody::InsightWidgetPropertiesChanged {
            widget_ref,
            properties,
        },
    ))
}

pub fn change_rich_text_content(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    content: String,
) -> Result<Outcome, CommandError> {
    let mut widget = find_widget(ctx, &widget_ref)?;
    let WidgetKind::RichText(rich_text) = &mut widget.kind else {
        return Err(wrong_kind(&widget, "rich_text"));
    };
    rich_text.content = content.clone();
    Ok(widget_change(
        ctx,
        widget,
        false,
        EventBody::RichTextWidgetContentChanged {
            widget_ref,
            content,
        },
    ))
}

/// Origin of the backend hostname. A bare host gets `https`; any path is dropped, since
/// export uris are rooted at the server.
fn host_origin(hostname: &str) -> Result<Url, url::ParseError> {
    let hostname = hostname.trim();
    let parsed = if hostname.contains("://") {
        Url::parse(hostname)?
    } else {
        Url::parse(&format!("https://{hostname}"))?
    };
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Url::parse(&origin.ascii_serialization()),
        url::Origin::Opaque(_) => Err(url::ParseError::RelativeUrlWithoutBase),
    }
}

/// Resolves `uri` against the backend hostname; relative uris stay as they are without one.
pub(crate) fn absolute_uri(hostname: Option<&str>, uri: &str) -> String {
    let Some(hostname) = hostname else {
        return uri.to_string();
    };
    match host_origin(hostname).and_then(|base| base.join(uri)) {
        Ok(absolute) => absolute.to_string(),
        Err(err) => {
            warn!("cannot resolve export uri hostname={} uri={} error={}", hostname, uri, err);
            uri.to_string()
        }
    }
}

pub async fn export_insight(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    config: ExportConfig,
) -> Result<Outcome, CommandError> {
    let widget = find_widget(ctx, &widget_ref)?;
    if !matches!(widget.kind, WidgetKind::Insight(_)) {
        return Err(wrong_kind(&widget, "insight"));
    }
    validation::validate_export(&ctx.state, &widget_ref, config.format)?;
    let definition = selectors::select_execution_definition(&ctx.state, &widget_ref)
        .ok_or_else(|| CommandError::invalid(format!("widget {widget_ref} cannot be executed")))?;

    let exported = ctx
        .backend
        .export_execution(ctx.workspace(), &definition, &config)
        .await?;
    let uri = absolute_uri(ctx.backend.hostname().as_deref(), &exported.uri);
    info!("widget exported widget={} format={:?}", widget_ref, config.format);

    Ok(Outcome {
        mutations: Vec::new(),
        events: vec![
            EventBody::InsightWidgetExportRequested {
                widget_ref: widget_ref.clone(),
                format: config.format,
            },
            EventBody::InsightWidgetExportResolved { widget_ref, uri },
        ],
        start_render_session: false,
    })
}

#[cfg(test)]
#[path = "../tests/widget_handlers_tests.rs"]
mod tests;
