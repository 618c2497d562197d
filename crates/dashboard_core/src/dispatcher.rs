use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::Utc;
use futures::{FutureExt, Stream, StreamExt};
use shared::{
    domain::CorrelationId,
    error::{CommandFailure, FailureReason},
    protocol::{DashboardCommand, DashboardEvent, EventBody},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::{sleep_until, Instant},
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    backend::{AnalyticalBackend, RetryingBackend},
    config::EngineConfig,
    error::{CommandError, DispatchError},
    handlers::{self, HandlerContext, Outcome, SupersededTask, TaskCompletion, TaskRegistry},
    render::RenderCoordinator,
    store::{DashboardState, StateMutation, Store},
};

enum EngineMessage {
    Dispatch {
        command: DashboardCommand,
        reply: oneshot::Sender<Vec<DashboardEvent>>,
    },
    Shutdown,
}

/// Events a dispatched command produced before its handler returned.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub correlation_id: CorrelationId,
    pub events: Vec<DashboardEvent>,
}

impl DispatchOutcome {
    pub fn failure(&self) -> Option<&CommandFailure> {
        self.events.iter().find_map(DashboardEvent::failure)
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    pub fn find(&self, event_type: &str) -> Option<&DashboardEvent> {
        self.events
            .iter()
            .find(|event| event.event_type() == event_type)
    }
}

/// Handle to a running dashboard engine. Commands are processed one at a time, in the
/// order they were dispatched.
#[derive(Clone)]
pub struct DashboardEngine {
    sender: mpsc::Sender<EngineMessage>,
    events: broadcast::Sender<DashboardEvent>,
    state: watch::Receiver<Arc<DashboardState>>,
    wait_timeout: Duration,
}

impl DashboardEngine {
    /// Starts the engine on the current tokio runtime.
    pub fn spawn(backend: Arc<dyn AnalyticalBackend>, config: EngineConfig) -> Self {
        let backend: Arc<dyn AnalyticalBackend> =
            Arc::new(RetryingBackend::new(backend, config.retry.clone()));
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (store, state) = Store::new();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        info!(
            "dashboard engine starting workspace={} undo_limit={}",
            config.workspace, config.undo_limit
        );
        let wait_timeout = config.wait_timeout();
        let actor = EngineActor {
            backend,
            render: RenderCoordinator::new(config.render.clone()),
            config,
            store,
            events: events.clone(),
            tasks: TaskRegistry::new(completions_tx),
            sequence: 0,
        };
        tokio::spawn(actor.run(mailbox, completions));

        Self {
            sender,
            events,
            state,
            wait_timeout,
        }
    }

    /// Queues a command and waits until its handler has finished. A command without a
    /// correlation id gets a fresh one.
    pub async fn dispatch(
        &self,
        command: impl Into<DashboardCommand>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut command = command.into();
        let correlation_id = command
            .correlation_id
            .get_or_insert_with(|| CorrelationId::new(Uuid::new_v4().to_string()))
            .clone();

        let (reply, response) = oneshot::channel();
        self.sender
            .send(EngineMessage::Dispatch { command, reply })
            .await
            .map_err(|_| DispatchError::EngineStopped)?;
        let events = response.await.map_err(|_| DispatchError::EngineStopped)?;
        Ok(DispatchOutcome {
            events: events
                .into_iter()
                .filter(|event| event.correlation_id.as_ref() == Some(&correlation_id))
                .collect(),
            correlation_id,
        })
    }

    /// Dispatches a command and waits for an event of `event_type` carrying its correlation
    /// id, including events emitted later by background loads the command started.
    pub async fn dispatch_and_wait_for(
        &self,
        command: impl Into<DashboardCommand>,
        event_type: &str,
    ) -> Result<DashboardEvent, DispatchError> {
        let mut events = self.events.subscribe();
        let outcome = self.dispatch(command).await?;
        if let Some(event) = outcome.find(event_type) {
            return Ok(event.clone());
        }
        if let Some(failure) = outcome.failure() {
            return Err(DispatchError::CommandFailed(failure.clone()));
        }

        let correlation_id = outcome.correlation_id;
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.correlation_id.as_ref() != Some(&correlation_id) => {}
                    Ok(event) if event.event_type() == event_type => return Ok(event),
                    Ok(event) => {
                        if let Some(failure) = event.failure() {
                            return Err(DispatchError::CommandFailed(failure.clone()));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("event subscriber lagged skipped={}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(DispatchError::EngineStopped)
                    }
                }
            }
        };
        tokio::time::timeout(self.wait_timeout, wait)
            .await
            .map_err(|_| DispatchError::Timeout {
                event_type: event_type.to_string(),
            })?
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Event stream that skips over anything missed by a lagging subscriber.
    pub fn event_stream(&self) -> impl Stream<Item = DashboardEvent> {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| async move { event.ok() })
    }

    pub fn state(&self) -> Arc<DashboardState> {
        self.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<Arc<DashboardState>> {
        self.state.clone()
    }

    pub fn select<T>(&self, selector: impl FnOnce(&DashboardState) -> T) -> T {
        selector(&self.state.borrow())
    }

    pub async fn shutdown(&self) {
        if self.sender.send(EngineMessage::Shutdown).await.is_err() {
            debug!("dashboard engine already stopped");
        }
    }
}

struct EngineActor {
    backend: Arc<dyn AnalyticalBackend>,
    config: EngineConfig,
    store: Store,
    events: broadcast::Sender<DashboardEvent>,
    tasks: TaskRegistry,
    render: RenderCoordinator,
    sequence: u64,
}

impl EngineActor {
    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<EngineMessage>,
        mut completions: mpsc::UnboundedReceiver<TaskCompletion>,
    ) {
        loop {
            let deadline = self.render.next_deadline();
            tokio::select! {
                message = mailbox.recv() => match message {
                    Some(EngineMessage::Dispatch { command, reply }) => {
                        let events = self.process(command).await;
                        if reply.send(events).is_err() {
                            debug!("dispatcher went away before the command finished");
                        }
                    }
                    Some(EngineMessage::Shutdown) | None => break,
                },
                Some(completion) = completions.recv() => self.on_task_completed(completion),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_render_deadline();
                }
            }
        }
        self.tasks.abort_all();
        info!("dashboard engine stopped");
    }

    fn publish(&mut self, correlation_id: Option<CorrelationId>, body: EventBody) -> DashboardEvent {
        self.sequence += 1;
        let event = DashboardEvent {
            correlation_id,
            sequence: self.sequence,
            timestamp: Utc::now(),
            body,
        };
        // no subscribers is fine
        let _ = self.events.send(event.clone());
        event
    }

    fn publish_failure(
        &mut self,
        correlation_id: Option<CorrelationId>,
        command_type: &str,
        failure: CommandFailure,
    ) -> DashboardEvent {
        self.publish(
            correlation_id,
            EventBody::CommandFailed {
                command_type: command_type.to_string(),
                failure,
            },
        )
    }

    async fn process(&mut self, command: DashboardCommand) -> Vec<DashboardEvent> {
        let command_type = command.command_type();
        let correlation_id = command.correlation_id.clone();
        let span = info_span!(
            "command",
            command_type = %command_type,
            correlation_id = %correlation_id.as_ref().map(CorrelationId::as_str).unwrap_or("-"),
        );
        async move {
            let mut published = vec![self.publish(
                correlation_id.clone(),
                EventBody::CommandStarted {
                    command_type: command_type.to_string(),
                },
            )];

            let now = Instant::now();
            let state = self.store.snapshot();
            let (result, superseded) = if !state.initialized
                && !command.body.allowed_before_initialization()
            {
                let failure = CommandError::invalid("dashboard is not initialized").into_failure();
                (Err(failure), Vec::new())
            } else {
                let mut ctx = HandlerContext {
                    backend: &self.backend,
                    config: &self.config,
                    state,
                    correlation_id: correlation_id.clone(),
                    command_type,
                    now,
                    tasks: &mut self.tasks,
                    render: &mut self.render,
                    superseded: Vec::new(),
                };
                let result = AssertUnwindSafe(handlers::handle(&mut ctx, command.body))
                    .catch_unwind()
                    .await;
                let result = match result {
                    Ok(result) => result.map_err(CommandError::into_failure),
                    Err(panic) => Err(CommandFailure::new(
                        FailureReason::InternalError,
                        panic_message(panic.as_ref()),
                    )),
                };
                (result, ctx.superseded)
            };

            self.report_superseded(superseded, &mut published);

            let outcome = result.and_then(|outcome| self.commit(outcome, now));
            match outcome {
                Ok(events) => {
                    for body in events {
                        published.push(self.publish(correlation_id.clone(), body));
                    }
                    debug!("command handled version={}", self.store.snapshot().version);
                }
                Err(failure) => {
                    warn!("command failed reason={:?} message={}", failure.reason, failure.message);
                    published.push(self.publish_failure(correlation_id.clone(), command_type, failure));
                }
            }
            published
        }
        .instrument(span)
        .await
    }

    /// Applies the outcome's mutations as one batch and hands back the events to publish.
    fn commit(&mut self, outcome: Outcome, now: Instant) -> Result<Vec<EventBody>, CommandFailure> {
        self.store
            .apply(outcome.mutations)
            .map_err(|err| CommandError::from(err).into_failure())?;
        if outcome.start_render_session {
            self.render.start(now);
        }
        Ok(outcome.events)
    }

    fn report_superseded(&mut self, superseded: Vec<SupersededTask>, published: &mut Vec<DashboardEvent>) {
        for task in superseded {
            let failure = CommandFailure::new(
                FailureReason::Superseded,
                format!("{} was superseded", task.key),
            );
            let event = self.publish_failure(task.correlation_id.clone(), task.command_type, failure);
            published.push(event);
        }
    }

    fn on_task_completed(&mut self, completion: TaskCompletion) {
        let Some(finished) = self.tasks.finish(&completion.key, completion.request_id) else {
            debug!("dropping result of a cancelled load key={}", completion.key);
            return;
        };
        let applied = handlers::complete_task(&self.store.snapshot(), completion).and_then(|outcome| {
            self.store.apply(outcome.mutations)?;
            Ok(outcome.events)
        });
        match applied {
            Ok(events) => {
                for body in events {
                    self.publish(finished.correlation_id.clone(), body);
                }
            }
            Err(err) => {
                warn!("background load result rejected error={}", err);
                self.publish_failure(finished.correlation_id, finished.command_type, err.into_failure());
            }
        }
    }

    fn on_render_deadline(&mut self) {
        let Some(completion) = self.render.on_deadline(Instant::now()) else {
            return;
        };
        if let Err(err) = self
            .store
            .apply(vec![StateMutation::SetRenderProgress(self.render.snapshot())])
        {
            warn!("recording render completion failed error={}", err);
        }
        self.publish(
            None,
            EventBody::RenderResolved {
                reason: completion.reason,
                outstanding: completion.outstanding,
            },
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("command handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("command handler panicked: {message}")
    } else {
        "command handler panicked".to_string()
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
