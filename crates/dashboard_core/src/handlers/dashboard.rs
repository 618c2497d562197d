use shared::{
    domain::{DashboardDocument, ObjRef, RenderMode, WorkspaceSettings},
    protocol::EventBody,
};
use tracing::info;

use super::{HandlerContext, Outcome};
use crate::{
    error::CommandError,
    selectors,
    store::{DashboardState, InitialState, RenderSnapshot, StateMutation},
};

/// Fresh-session state built from what is already loaded, for `document` or an empty dashboard.
fn rebuild_state(
    state: &DashboardState,
    document: Option<DashboardDocument>,
    render_mode: RenderMode,
) -> InitialState {
    InitialState {
        document,
        catalog: state.catalog.catalog().clone(),
        workspace: WorkspaceSettings {
            settings: state.config.settings.clone(),
            permissions: state.config.permissions,
        },
        capabilities: state.config.capabilities,
        render_mode,
    }
}

fn cancel_all_loads(ctx: &mut HandlerContext<'_>) {
    let cancelled = ctx.tasks.cancel_where(|_| true);
    ctx.superseded.extend(cancelled);
}

fn require_manage_permission(state: &DashboardState) -> Result<(), CommandError> {
    if state.config.permissions.can_manage_dashboard {
        Ok(())
    } else {
        Err(CommandError::invalid("user may not manage this dashboard"))
    }
}

pub async fn initialize(
    ctx: &mut HandlerContext<'_>,
    dashboard_ref: Option<ObjRef>,
) -> Result<Outcome, CommandError> {
    let workspace = ctx.workspace().to_string();
    let catalog = ctx.backend.get_catalog(&workspace).await?;
    let settings = ctx.backend.get_workspace_settings(&workspace).await?;
    let document = match &dashboard_ref {
        Some(dashboard_ref) => Some(ctx.backend.get_dashboard(&workspace, dashboard_ref).await?),
        None => None,
    };

    let event = EventBody::DashboardInitialized {
        dashboard_ref: document.as_ref().and_then(|d| d.dashboard_ref.clone()),
        title: document.as_ref().map(|d| d.title.clone()).unwrap_or_default(),
        widget_count: document.as_ref().map_or(0, |d| d.layout.widgets().count()),
        filter_count: document.as_ref().map_or(0, |d| d.filter_context.filters.len()),
    };
    info!(
        "initializing dashboard workspace={} dashboard={:?}",
        workspace, dashboard_ref
    );

    cancel_all_loads(ctx);
    let initial = InitialState {
        document,
        catalog,
        workspace: settings,
        capabilities: ctx.backend.capabilities(),
        render_mode: ctx.state.ui.render_mode,
    };
    Ok(Outcome {
        mutations: vec![
            StateMutation::Initialized(Box::new(initial)),
            StateMutation::SetRenderProgress(RenderSnapshot::default()),
        ],
        events: vec![event],
        start_render_session: true,
    })
}

fn persisted_ref(state: &DashboardState) -> Result<Option<ObjRef>, CommandError> {
    match &state.meta.persisted {
        None => Ok(None),
        Some(persisted) if persisted.dashboard_ref == state.meta.dashboard_ref => {
            Ok(persisted.dashboard_ref.clone())
        }
        Some(persisted) => Err(CommandError::InconsistentState(format!(
            "session is bound to {:?} but the persisted document is {:?}",
            state.meta.dashboard_ref, persisted.dashboard_ref
        ))),
    }
}

pub async fn save(ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    require_manage_permission(&ctx.state)?;
    let is_new = persisted_ref(&ctx.state)?.is_none();
    let document = selectors::select_dashboard_document(&ctx.state);

    let saved = ctx
        .backend
        .save_dashboard(ctx.workspace(), document)
        .await?;
    let dashboard_ref = saved.dashboard_ref.clone().ok_or_else(|| {
        CommandError::InconsistentState("backend saved the dashboard without a ref".into())
    })?;
    info!("dashboard saved dashboard={} is_new={}", dashboard_ref, is_new);

    Ok(Outcome::event(EventBody::DashboardSaved {
        dashboard_ref,
        is_new,
    })
    .with_mutation(StateMutation::DashboardPersisted(Box::new(saved))))
}

pub async fn save_as(
    ctx: &mut HandlerContext<'_>,
    title: String,
    switch_to_copy: bool,
) -> Result<Outcome, CommandError> {
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(CommandError::invalid("dashboard title must not be empty"));
    }
    let mut copy = selectors::select_dashboard_document(&ctx.state);
    copy.dashboard_ref = None;
    copy.identifier = None;
    copy.filter_context_ref = None;
    copy.updated = None;
    copy.title = title;

    let saved = ctx.backend.save_dashboard(ctx.workspace(), copy).await?;
    let dashboard_ref = saved.dashboard_ref.clone().ok_or_else(|| {
        CommandError::InconsistentState("backend saved the copy without a ref".into())
    })?;

    let mut outcome = Outcome::event(EventBody::DashboardCopySaved {
        dashboard_ref,
        switched_to_copy: switch_to_copy,
    });
    if switch_to_copy {
        // the working copy stays as is; only identity moves to the copy
        outcome
            .mutations
            .push(StateMutation::DashboardPersisted(Box::new(saved)));
    }
    Ok(outcome)
}

pub fn rename(ctx: &mut HandlerContext<'_>, title: String) -> Result<Outcome, CommandError> {
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(CommandError::invalid("dashboard title must not be empty"));
    }
    Ok(Outcome::event(EventBody::DashboardRenamed {
        title: title.clone(),
    })
    .with_mutation(StateMutation::SetTitle(title)))
}

pub fn reset(ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    let persisted = ctx.state.meta.persisted.clone();
    let dashboard_ref = persisted.as_ref().and_then(|d| d.dashboard_ref.clone());
    cancel_all_loads(ctx);
    let initial = rebuild_state(&ctx.state, persisted, ctx.state.ui.render_mode);
    Ok(Outcome::event(EventBody::DashboardReset { dashboard_ref })
        .with_mutation(StateMutation::Initialized(Box::new(initial))))
}

pub async fn delete(ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    let dashboard_ref = persisted_ref(&ctx.state)?
        .ok_or_else(|| CommandError::invalid("cannot delete a dashboard that was never saved"))?;
    require_manage_permission(&ctx.state)?;

    ctx.backend
        .delete_dashboard(ctx.workspace(), &dashboard_ref)
        .await?;
    info!("dashboard deleted dashboard={}", dashboard_ref);

    cancel_all_loads(ctx);
    let empty = rebuild_state(&ctx.state, None, ctx.state.ui.render_mode);
    let invalidate = ctx.invalidate_executions(None);
    Ok(Outcome {
        mutations: vec![StateMutation::Initialized(Box::new(empty)), invalidate],
        events: vec![EventBody::DashboardDeleted { dashboard_ref }],
        start_render_session: false,
    })
}

pub fn change_render_mode(
    ctx: &mut HandlerContext<'_>,
    mode: RenderMode,
    reset_dashboard: bool,
) -> Result<Outcome, CommandError> {
    let mut outcome = Outcome::default();
    if reset_dashboard {
        let persisted = ctx.state.meta.persisted.clone();
        let dashboard_ref = persisted.as_ref().and_then(|d| d.dashboard_ref.clone());
        cancel_all_loads(ctx);
        let initial = rebuild_state(&ctx.state, persisted, mode);
        outcome
            .mutations
            .push(StateMutation::Initialized(Box::new(initial)));
        outcome.events.push(EventBody::DashboardReset { dashboard_ref });
    } else {
        outcome.mutations.push(StateMutation::SetRenderMode(mode));
    }
    outcome.events.push(EventBody::RenderModeChanged { mode });
    Ok(outcome)
}

#[cfg(test)]
#[path = "../tests/dashboard_handlers_tests.rs"]
mod tests;
