use super::*;

use shared::{
    domain::{DashboardSettings, WorkspaceSettings},
    error::ErrorCode,
    execution::ExecutionResult,
    filters::{DashboardDateFilter, DateBound, DateFilterType, DateGranularity},
    protocol::{CommandBody, FilterSettingsOperation},
};

use crate::{
    selectors,
    test_support::{df, parent, Harness, TestBackend},
};

fn staging_harness() -> Harness {
    Harness::with_backend(TestBackend::new().with_settings(WorkspaceSettings {
        settings: DashboardSettings {
            filter_apply_mode: FilterApplyMode::AllAtOnce,
            ..DashboardSettings::default()
        },
        ..WorkspaceSettings::default()
    }))
}

fn last_quarter() -> DateFilterSelection {
    DateFilterSelection {
        filter_type: DateFilterType::Relative,
        granularity: DateGranularity::Quarter,
        from: Some(DateBound::Offset(-1)),
        to: Some(DateBound::Offset(-1)),
        option_local_id: None,
    }
}

fn select_region(elements: &[&str]) -> CommandBody {
    CommandBody::ChangeAttributeFilterSelection {
        filter_local_id: "f-region".into(),
        elements: AttributeElements::Uris(elements.iter().map(|e| e.to_string()).collect()),
        selection_type: SelectionType::In,
    }
}

fn add_filter(display_form: ObjRef) -> CommandBody {
    CommandBody::AddAttributeFilter {
        display_form,
        index: -1,
        parent_filters: Vec::new(),
        initial_selection: None,
        initial_is_negative_selection: false,
        selection_mode: AttributeFilterSelectionMode::Multi,
        title: None,
    }
}

async fn seed_execution(harness: &mut Harness, widget: &str) {
    harness
        .apply(CommandBody::UpsertExecutionResult {
            widget_ref: ObjRef::identifier(widget),
            result: Some(ExecutionResult {
                fingerprint: "seed".into(),
                total_count: 1,
                data: serde_json::Value::Null,
            }),
            error: None,
            is_loading: false,
            export_ready: true,
        })
        .await;
}

fn region(state: &DashboardState) -> DashboardAttributeFilter {
    selectors::select_attribute_filter_by_local_id(state, &"f-region".into())
        .cloned()
        .expect("region filter")
}

#[tokio::test]
async fn date_selection_replaces_the_common_filter_and_invalidates_results() {
    let mut harness = Harness::new();
    seed_execution(&mut harness, "w-kpi").await;

    let events = harness
        .apply(CommandBody::ChangeDateFilterSelection {
            data_set: None,
            selection: last_quarter(),
        })
        .await;

    let expected = DashboardDateFilter {
        local_identifier: None,
        data_set: None,
        filter_type: DateFilterType::Relative,
        granularity: DateGranularity::Quarter,
        from: Some(DateBound::Offset(-1)),
        to: Some(DateBound::Offset(-1)),
        option_local_id: None,
    };
    assert_eq!(
        events,
        vec![EventBody::DateFilterChanged {
            data_set: None,
            filter: Some(expected.clone()),
            staged: false,
        }]
    );
    let state = harness.state();
    assert_eq!(selectors::select_common_date_filter(&state), Some(&expected));
    assert!(state.executions.is_empty());
}

#[tokio::test]
async fn date_selection_for_unknown_data_sets_is_invalid() {
    let mut harness = Harness::new();
    let not_in_catalog = harness
        .reject(CommandBody::ChangeDateFilterSelection {
            data_set: Some(ObjRef::identifier("shipped")),
            selection: last_quarter(),
        })
        .await;
    assert!(matches!(not_in_catalog, CommandError::InvalidArguments(_)));

    let not_in_context = harness
        .reject(CommandBody::ChangeDateFilterSelection {
            data_set: Some(ObjRef::identifier("created")),
            selection: last_quarter(),
        })
        .await;
    assert!(matches!(not_in_context, CommandError::InvalidArguments(_)));
}

#[tokio::test]
async fn added_filters_get_a_fresh_local_id() {
    let mut harness = Harness::new();
    seed_execution(&mut harness, "w-kpi").await;

    let events = harness.apply(add_filter(df("product"))).await;
    let [EventBody::AttributeFilterAdded { filter, index }] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(*index, 2);
    assert_eq!(filter.local_identifier.as_str().len(), 32);
    assert!(filter.is_all_selected());

    let state = harness.state();
    assert_eq!(selectors::select_attribute_filters(&state).len(), 3);
    // an all-selected filter does not change any result
    assert!(selectors::select_execution_result(&state, &ObjRef::identifier("w-kpi")).is_some());
}

#[tokio::test]
async fn adding_a_filter_validates_selection_and_parents() {
    let mut harness = Harness::new();
    assert!(matches!(
        harness.reject(add_filter(ObjRef::uri("/obj/df/city.name"))).await,
        CommandError::InvalidArguments(_)
    ));

    let single = CommandBody::AddAttributeFilter {
        display_form: df("product"),
        index: -1,
        parent_filters: Vec::new(),
        initial_selection: Some(AttributeElements::Values(vec!["A".into(), "B".into()])),
        initial_is_negative_selection: false,
        selection_mode: AttributeFilterSelectionMode::Single,
        title: None,
    };
    assert!(matches!(
        harness.reject(single).await,
        CommandError::InvalidArguments(_)
    ));

    let mut ghost_parent = add_filter(df("country"));
    if let CommandBody::AddAttributeFilter { parent_filters, .. } = &mut ghost_parent {
        *parent_filters = vec![parent("f-ghost", &[])];
    }
    assert!(matches!(
        harness.reject(ghost_parent).await,
        CommandError::Rejected(ParentFiltersValidation::ExtraneousParent)
    ));

    let mut connected = add_filter(df("country"));
    if let CommandBody::AddAttributeFilter { parent_filters, .. } = &mut connected {
        *parent_filters = vec![parent("f-region", &["country"])];
    }
    let events = harness.apply(connected).await;
    assert!(matches!(
        events.as_slice(),
        [EventBody::AttributeFilterAdded { filter, .. }] if filter.filter_elements_by.len() == 1
    ));
}

#[tokio::test]
async fn removing_a_filter_cleans_up_children_and_widgets() {
    let mut harness = Harness::new();
    harness
        .apply(CommandBody::ChangeWidgetFilterSettings {
            widget_ref: ObjRef::identifier("w-kpi"),
            operation: FilterSettingsOperation::IgnoreFilters {
                filters: vec![IgnoredFilter::AttributeFilter {
                    display_form: df("region"),
                }],
            },
        })
        .await;
    seed_execution(&mut harness, "w-insight").await;

    let events = harness
        .apply(CommandBody::RemoveAttributeFilters {
            filter_local_ids: vec!["f-region".into()],
        })
        .await;

    let [EventBody::AttributeFiltersRemoved {
        removed,
        affected_children,
    }] = events.as_slice()
    else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(removed.len(), 1);
    assert_eq!(affected_children, &vec![FilterLocalId::new("f-city")]);

    let state = harness.state();
    assert!(selectors::select_widget_ignored_filters(&state, &ObjRef::identifier("w-kpi")).is_empty());
    assert!(selectors::select_attribute_filter_by_local_id(&state, &"f-region".into()).is_none());
    assert!(state.executions.is_empty());
}

#[tokio::test]
async fn removing_unknown_filters_is_invalid() {
    let mut harness = Harness::new();
    assert!(matches!(
        harness
            .reject(CommandBody::RemoveAttributeFilters {
                filter_local_ids: Vec::new(),
            })
            .await,
        CommandError::InvalidArguments(_)
    ));
    assert!(matches!(
        harness
            .reject(CommandBody::RemoveAttributeFilters {
                filter_local_ids: vec!["f-region".into(), "f-ghost".into()],
            })
            .await,
        CommandError::InvalidArguments(_)
    ));
    assert_eq!(selectors::select_attribute_filters(&harness.state()).len(), 2);
}

#[tokio::test]
async fn moving_a_filter_reports_attribute_indexes() {
    let mut harness = Harness::new();
    let events = harness
        .apply(CommandBody::MoveAttributeFilter {
            filter_local_id: "f-city".into(),
            index: 0,
        })
        .await;
    assert_eq!(
        events,
        vec![EventBody::AttributeFilterMoved {
            filter_local_id: "f-city".into(),
            from_index: 1,
            to_index: 0,
        }]
    );
    let order: Vec<_> = selectors::select_attribute_filters(&harness.state())
        .iter()
        .map(|f| f.local_identifier.to_string())
        .collect();
    assert_eq!(order, vec!["f-city", "f-region"]);
}

#[tokio::test]
async fn parent_selection_change_drops_child_elements() {
    let mut harness = Harness::new();
    harness
        .apply(CommandBody::LoadAttributeFilterElements {
            filter_local_id: "f-city".into(),
            limit: None,
        })
        .await;
    harness.complete_next_task().await;
    let city = FilterLocalId::new("f-city");
    assert!(selectors::select_attribute_elements(&harness.state(), &city).is_some());

    let events = harness.apply(select_region(&["/elements/1"])).await;
    let [EventBody::AttributeFilterSelectionChanged { filter, staged }] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert!(!staged);
    assert!(!filter.negative_selection);

    let state = harness.state();
    assert!(selectors::select_attribute_elements(&state, &city).is_none());
    assert_eq!(region(&state).attribute_elements.len(), 1);
}

#[tokio::test]
async fn staged_selections_wait_for_apply() {
    let mut harness = staging_harness();
    seed_execution(&mut harness, "w-kpi").await;

    let events = harness.apply(select_region(&["/elements/2"])).await;
    assert!(matches!(
        events.as_slice(),
        [EventBody::AttributeFilterSelectionChanged { staged: true, .. }]
    ));
    let state = harness.state();
    assert!(region(&state).is_all_selected());
    assert!(selectors::select_is_working_filter_context_changed(&state));
    assert!(!state.executions.is_empty());

    harness.apply(CommandBody::ApplyWorkingFilterContext).await;
    let state = harness.state();
    assert!(!region(&state).is_all_selected());
    assert!(state.filter_context.working.is_none());
    assert!(state.executions.is_empty());
}

#[tokio::test]
async fn staged_parent_selections_keep_child_elements_until_applied() {
    let mut harness = staging_harness();
    let city = FilterLocalId::new("f-city");
    let load_city = || CommandBody::LoadAttributeFilterElements {
        filter_local_id: "f-city".into(),
        limit: None,
    };
    harness.apply(load_city()).await;
    harness.complete_next_task().await;

    harness.apply(select_region(&["/elements/1"])).await;
    assert!(harness.superseded.is_empty());
    assert!(selectors::select_attribute_elements(&harness.state(), &city).is_some());

    harness.apply(load_city()).await;
    harness.apply(CommandBody::ApplyWorkingFilterContext).await;
    assert_eq!(harness.superseded.len(), 1);
    assert_eq!(harness.superseded[0].key, TaskKey::Elements(city.clone()));
    assert!(harness.tasks.is_empty());
    let state = harness.state();
    assert!(selectors::select_attribute_elements(&state, &city).is_none());
    assert!(!selectors::select_is_attribute_elements_loading(&state, &city));
}

#[tokio::test]
async fn resetting_the_working_copy_discards_staged_changes() {
    let mut harness = staging_harness();
    harness.apply(select_region(&["/elements/2"])).await;

    let events = harness.apply(CommandBody::ResetWorkingFilterContext).await;
    assert_eq!(events, vec![EventBody::WorkingFilterContextReset]);
    let state = harness.state();
    assert!(!selectors::select_is_working_filter_context_changed(&state));
    assert!(region(&state).is_all_selected());
}

#[tokio::test]
async fn structural_changes_reach_the_working_copy() {
    let mut harness = staging_harness();
    harness.apply(select_region(&["/elements/2"])).await;
    harness.apply(add_filter(df("product"))).await;

    let state = harness.state();
    let working = state.filter_context.working.as_ref().expect("staged copy");
    assert_eq!(working.attribute_filters().count(), 3);
    assert_eq!(state.filter_context.filters.attribute_filters().count(), 3);
    let staged_region = working.attribute_filter(&"f-region".into()).expect("region");
    assert!(!staged_region.is_all_selected());
}

#[tokio::test]
async fn parents_may_not_form_a_cycle() {
    let mut harness = Harness::new();
    let err = harness
        .reject(CommandBody::SetAttributeFilterParents {
            filter_local_id: "f-region".into(),
            parent_filters: vec![parent("f-city", &[])],
        })
        .await;
    assert!(matches!(err, CommandError::InvalidArguments(_)));

    let events = harness
        .apply(CommandBody::SetAttributeFilterParents {
            filter_local_id: "f-city".into(),
            parent_filters: Vec::new(),
        })
        .await;
    assert!(matches!(
        events.as_slice(),
        [EventBody::AttributeFilterParentsChanged { filter }] if filter.filter_elements_by.is_empty()
    ));
}

#[tokio::test]
async fn parent_validation_reports_without_changing_state() {
    let mut harness = Harness::new();
    let version = harness.state().version;
    let command = || CommandBody::ValidateAttributeFilterParents {
        filter_local_id: "f-city".into(),
        parent_filters: Some(vec![parent("f-ghost", &[])]),
    };

    let first = harness.apply(command()).await;
    let second = harness.apply(command()).await;
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![EventBody::AttributeFilterParentsValidated {
            filter_local_id: "f-city".into(),
            result: ParentFiltersValidation::ExtraneousParent,
        }]
    );
    assert_eq!(harness.state().version, version);
}

#[tokio::test]
async fn filter_context_selection_merges_by_display_form() {
    let mut harness = Harness::new();
    let mut incoming = region(&harness.state());
    incoming.local_identifier = "from-url".into();
    incoming.display_form = ObjRef::uri("/obj/df/region.name");
    incoming.attribute_elements = AttributeElements::Uris(vec!["/elements/3".into()]);
    incoming.negative_selection = false;

    let events = harness
        .apply(CommandBody::ChangeFilterContextSelection {
            filters: vec![FilterContextItem::Attribute(incoming)],
            reset_others: false,
        })
        .await;
    assert!(matches!(events.as_slice(), [EventBody::FilterContextChanged { .. }]));
    let state = harness.state();
    assert_eq!(
        region(&state).attribute_elements,
        AttributeElements::Uris(vec!["/elements/3".into()])
    );
    assert!(selectors::select_common_date_filter(&state).is_some());
}

#[tokio::test]
async fn elements_load_in_the_background() {
    let mut harness = Harness::new();
    let local_id = FilterLocalId::new("f-region");
    let events = harness
        .apply(CommandBody::LoadAttributeFilterElements {
            filter_local_id: local_id.clone(),
            limit: Some(2),
        })
        .await;
    assert_eq!(
        events,
        vec![EventBody::AttributeFilterElementsRequested {
            filter_local_id: local_id.clone(),
        }]
    );
    assert!(selectors::select_is_attribute_elements_loading(&harness.state(), &local_id));

    let events = harness.complete_next_task().await;
    assert!(matches!(
        events.as_slice(),
        [EventBody::AttributeFilterElementsLoaded { elements, .. }] if elements.len() == 2
    ));
    assert_eq!(
        selectors::select_attribute_elements(&harness.state(), &local_id).map(<[_]>::len),
        Some(2)
    );
}

#[tokio::test]
async fn newer_element_loads_supersede_older_ones() {
    let mut harness = Harness::new();
    let local_id = FilterLocalId::new("f-region");
    let load = || CommandBody::LoadAttributeFilterElements {
        filter_local_id: "f-region".into(),
        limit: None,
    };
    harness.apply(load()).await;
    harness.apply(load()).await;

    assert_eq!(harness.superseded.len(), 1);
    assert_eq!(harness.superseded[0].key, TaskKey::Elements(local_id.clone()));
    assert_eq!(harness.superseded[0].command_type, "load_attribute_filter_elements");

    harness.complete_next_task().await;
    assert_eq!(
        selectors::select_attribute_elements(&harness.state(), &local_id).map(<[_]>::len),
        Some(5)
    );
    assert!(harness.tasks.is_empty());
}

#[tokio::test]
async fn element_load_failures_are_recorded() {
    let mut harness = Harness::new();
    harness.backend.fail(
        "get_attribute_elements",
        BackendError::Unavailable("elements".into()),
    );
    harness
        .apply(CommandBody::LoadAttributeFilterElements {
            filter_local_id: "f-city".into(),
            limit: None,
        })
        .await;

    let events = harness.complete_next_task().await;
    let [EventBody::AttributeFilterElementsFailed { error, .. }] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(error.code, ErrorCode::Unavailable);
    let entry = harness
        .state()
        .attribute_elements
        .get(&FilterLocalId::new("f-city"))
        .cloned()
        .expect("entry");
    assert!(entry.error.is_some());
    assert!(!entry.is_loading);
}

#[test]
fn element_results_for_cleared_entries_fail_as_superseded() {
    let harness_state = crate::test_support::sample_state();
    let err = on_elements_loaded(
        &harness_state,
        "f-region".into(),
        Uuid::new_v4(),
        Ok(Vec::new()),
    )
    .expect_err("no load is pending");
    assert!(matches!(err, CommandError::Superseded(_)));
}
