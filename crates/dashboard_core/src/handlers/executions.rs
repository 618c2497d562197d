use shared::{
    domain::ObjRef, error::ErrorPayload, execution::ExecutionResult, protocol::EventBody,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{HandlerContext, Outcome, TaskKey, TaskOutput};
use crate::{
    backend::BackendError,
    error::CommandError,
    selectors,
    store::{DashboardState, ExecutionEntry, StateMutation},
};

/// Starts a fresh execution for the widget, superseding one already in flight.
pub fn refresh(ctx: &mut HandlerContext<'_>, widget_ref: ObjRef) -> Result<Outcome, CommandError> {
    if selectors::select_widget_by_ref(&ctx.state, &widget_ref).is_none() {
        return Err(CommandError::invalid(format!("widget {widget_ref} not found")));
    }
    let definition = selectors::select_execution_definition(&ctx.state, &widget_ref)
        .ok_or_else(|| CommandError::invalid(format!("widget {widget_ref} has nothing to execute")))?;

    let backend = ctx.backend.clone();
    let workspace = ctx.workspace().to_string();
    let (request_id, superseded) = ctx.tasks.spawn(
        TaskKey::Execution(widget_ref.clone()),
        ctx.correlation_id.clone(),
        ctx.command_type,
        async move { TaskOutput::Execution(backend.execute_query(&workspace, &definition).await) },
    );
    ctx.superseded.extend(superseded);
    debug!("execution started widget={} request_id={}", widget_ref, request_id);

    Ok(Outcome::event(EventBody::WidgetExecutionStarted {
        widget_ref: widget_ref.clone(),
    })
    .with_mutation(StateMutation::ExecutionStarted {
        widget_ref,
        request_id,
    }))
}

pub fn on_completed(
    state: &DashboardState,
    widget_ref: ObjRef,
    request_id: Uuid,
    result: Result<ExecutionResult, BackendError>,
) -> Result<Outcome, CommandError> {
    let current = state
        .executions
        .get(&widget_ref)
        .and_then(|entry| entry.request_id);
    if current != Some(request_id) {
        debug!("stale execution result dropped widget={}", widget_ref);
        return Err(CommandError::Superseded(format!(
            "execution of widget {widget_ref} was invalidated while running"
        )));
    }
    Ok(match result {
        Ok(result) => {
            let event = EventBody::WidgetExecutionSucceeded {
                widget_ref: widget_ref.clone(),
                fingerprint: result.fingerprint.clone(),
                total_count: result.total_count,
            };
            Outcome::event(event).with_mutation(StateMutation::UpsertExecution {
                widget_ref,
                entry: ExecutionEntry {
                    request_id: None,
                    is_loading: false,
                    result: Some(result),
                    error: None,
                    export_ready: true,
                },
            })
        }
        Err(err) => {
            warn!("execution failed widget={} error={}", widget_ref, err);
            let error = err.to_payload();
            Outcome::event(EventBody::WidgetExecutionFailed {
                widget_ref: widget_ref.clone(),
                error: error.clone(),
            })
            .with_mutation(StateMutation::UpsertExecution {
                widget_ref,
                entry: ExecutionEntry {
                    error: Some(error),
                    ..ExecutionEntry::default()
                },
            })
        }
    })
}

/// Execution state reported by a renderer that runs queries itself.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub result: Option<ExecutionResult>,
    pub error: Option<ErrorPayload>,
    pub is_loading: bool,
    pub export_ready: bool,
}

pub fn upsert(
    ctx: &mut HandlerContext<'_>,
    widget_ref: ObjRef,
    update: ExecutionUpdate,
) -> Result<Outcome, CommandError> {
    if selectors::select_widget_by_ref(&ctx.state, &widget_ref).is_none() {
        return Err(CommandError::invalid(format!("widget {widget_ref} not found")));
    }
    // the reported state wins over an engine-driven refresh
    let superseded = ctx.tasks.cancel(&TaskKey::Execution(widget_ref.clone()));
    ctx.superseded.extend(superseded);

    Ok(Outcome::event(EventBody::ExecutionResultUpserted {
        widget_ref: widget_ref.clone(),
    })
    .with_mutation(StateMutation::UpsertExecution {
        widget_ref,
        entry: ExecutionEntry {
            request_id: None,
            is_loading: update.is_loading,
            result: update.result,
            error: update.error,
            export_ready: update.export_ready,
        },
    }))
}

pub fn clear(
    ctx: &mut HandlerContext<'_>,
    widget_refs: Option<Vec<ObjRef>>,
) -> Result<Outcome, CommandError> {
    let invalidate = ctx.invalidate_executions(widget_refs.clone());
    Ok(Outcome::event(EventBody::ExecutionResultsCleared { widget_refs }).with_mutation(invalidate))
}

#[cfg(test)]
#[path = "../tests/execution_handlers_tests.rs"]
mod tests;
