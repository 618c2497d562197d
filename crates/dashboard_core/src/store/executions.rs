use std::collections::HashMap;

use shared::{domain::ObjRef, error::ErrorPayload, execution::ExecutionResult};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionEntry {
    /// Set while a refresh started by the engine is in flight.
    pub request_id: Option<Uuid>,
    pub is_loading: bool,
    pub result: Option<ExecutionResult>,
    pub error: Option<ErrorPayload>,
    pub export_ready: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionsState {
    entries: HashMap<ObjRef, ExecutionEntry>,
}

impl ExecutionsState {
    pub fn get(&self, widget_ref: &ObjRef) -> Option<&ExecutionEntry> {
        self.entries.get(widget_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn invalidate(&mut self, widget_refs: Option<&[ObjRef]>) {
        match widget_refs {
            None => self.entries.clear(),
            Some(widget_refs) => {
                for widget_ref in widget_refs {
                    self.entries.remove(widget_ref);
                }
            }
        }
    }

    pub(crate) fn start(&mut self, widget_ref: ObjRef, request_id: Uuid) {
        self.entries.insert(
            widget_ref,
            ExecutionEntry {
                request_id: Some(request_id),
                is_loading: true,
                ..ExecutionEntry::default()
            },
        );
    }

    pub(crate) fn upsert(&mut self, widget_ref: ObjRef, entry: ExecutionEntry) {
        self.entries.insert(widget_ref, entry);
    }
}
