use std::collections::BTreeMap;

use shared::protocol::{AsyncRenderIgnoreReason, RenderCompletionReason};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{config::RenderConfig, store::RenderSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Requested { cycles: u32 },
    Resolved { at: Instant, cycles: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCompletion {
    pub reason: RenderCompletionReason,
    pub outstanding: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(Option<RenderCompletion>),
    Ignored(AsyncRenderIgnoreReason),
}

/// Tracks widget render registrations for one dashboard session and decides when the
/// dashboard counts as fully rendered. Time is always passed in.
#[derive(Debug, Clone)]
pub struct RenderCoordinator {
    config: RenderConfig,
    started_at: Option<Instant>,
    registrations: BTreeMap<String, Registration>,
    completed: Option<RenderCompletionReason>,
}

impl RenderCoordinator {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            started_at: None,
            registrations: BTreeMap::new(),
            completed: None,
        }
    }

    /// Begins a new session; any previous registrations are forgotten.
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.registrations.clear();
        self.completed = None;
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn request(&mut self, id: &str, now: Instant) -> Result<(), AsyncRenderIgnoreReason> {
        let Some(started_at) = self.started_at else {
            return Err(AsyncRenderIgnoreReason::OutsideRequestWindow);
        };
        if self.completed.is_some() {
            return Err(AsyncRenderIgnoreReason::RenderAlreadyResolved);
        }

        let next = match self.registrations.get(id) {
            None if now.duration_since(started_at) <= self.config.request_window() => {
                Registration::Requested { cycles: 0 }
            }
            None => return Err(AsyncRenderIgnoreReason::OutsideRequestWindow),
            Some(Registration::Requested { .. }) => {
                return Err(AsyncRenderIgnoreReason::AlreadyRequested)
            }
            Some(Registration::Resolved { cycles, .. }) if *cycles >= self.config.max_cycles => {
                return Err(AsyncRenderIgnoreReason::CycleLimitReached)
            }
            Some(Registration::Resolved { at, cycles }) => {
                if now.duration_since(*at) > self.config.cycle_window() {
                    return Err(AsyncRenderIgnoreReason::OutsideCycleWindow);
                }
                Registration::Requested { cycles: cycles + 1 }
            }
        };
        debug!("async render requested id={} registration={:?}", id, next);
        self.registrations.insert(id.to_string(), next);
        Ok(())
    }

    pub fn resolve(&mut self, id: &str, now: Instant) -> ResolveOutcome {
        if self.completed.is_some() {
            return ResolveOutcome::Ignored(AsyncRenderIgnoreReason::RenderAlreadyResolved);
        }
        let Some(Registration::Requested { cycles }) = self.registrations.get(id).copied() else {
            return ResolveOutcome::Ignored(AsyncRenderIgnoreReason::NotRequested);
        };
        self.registrations
            .insert(id.to_string(), Registration::Resolved { at: now, cycles });

        if self.outstanding().is_empty() {
            ResolveOutcome::Resolved(Some(self.complete(RenderCompletionReason::AllResolved)))
        } else {
            ResolveOutcome::Resolved(None)
        }
    }

    pub fn outstanding(&self) -> Vec<String> {
        self.registrations
            .iter()
            .filter(|(_, registration)| matches!(registration, Registration::Requested { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Earliest instant at which [`Self::on_deadline`] may complete the session.
    pub fn next_deadline(&self) -> Option<Instant> {
        let started_at = self.started_at?;
        if self.completed.is_some() {
            return None;
        }
        let timeout = started_at + self.config.timeout();
        if self.registrations.is_empty() {
            Some(timeout.min(started_at + self.config.request_window()))
        } else {
            Some(timeout)
        }
    }

    pub fn on_deadline(&mut self, now: Instant) -> Option<RenderCompletion> {
        let started_at = self.started_at?;
        if self.completed.is_some() {
            return None;
        }
        let elapsed = now.duration_since(started_at);
        if self.registrations.is_empty() && elapsed >= self.config.request_window() {
            return Some(self.complete(RenderCompletionReason::NoRequests));
        }
        if elapsed >= self.config.timeout() {
            return Some(self.complete(RenderCompletionReason::Timeout));
        }
        None
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            pending: self.outstanding(),
            resolved: self.completed.is_some(),
        }
    }

    fn complete(&mut self, reason: RenderCompletionReason) -> RenderCompletion {
        let outstanding = self.outstanding();
        info!(
            "dashboard render resolved reason={:?} outstanding={}",
            reason,
            outstanding.len()
        );
        self.completed = Some(reason);
        RenderCompletion {
            reason,
            outstanding,
        }
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
