//! Events emitted by graph objects
//!
//! An [`Event`] carries a name, the object that emitted it and an optional
//! payload. Change events are a flavour of event that tells observers the
//! emitter's state changed; bindings that cannot trap a property directly
//! re-read it whenever one arrives. Events that are re-emitted by an owner
//! (for example a list propagating its members' events) keep the original
//! event as their `inner` provenance.

use std::rc::Rc;

use crate::error::HandlerResult;
use crate::graph::{Graph, NodeId};
use crate::value::Value;

/// Callback invoked for each event delivered to a listener
pub type EventHandler = Rc<dyn Fn(&mut Graph, &Event) -> HandlerResult>;

/// Distinguishes plain events from change notifications
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Plain,
    Change,
}

/// An event emitted on a graph object
#[derive(Clone, Debug)]
pub struct Event {
    name: Rc<str>,
    source: NodeId,
    data: Value,
    kind: EventKind,
    inner: Option<Rc<Event>>,
}

impl Event {
    /// Create a plain event
    pub fn new(name: &str, source: NodeId) -> Self {
        Self {
            name: Rc::from(name),
            source,
            data: Value::Undefined,
            kind: EventKind::Plain,
            inner: None,
        }
    }

    /// Create a change event
    pub fn change(name: &str, source: NodeId) -> Self {
        Self {
            kind: EventKind::Change,
            ..Self::new(name, source)
        }
    }

    /// Re-emit an event on behalf of another object, keeping the original
    /// as provenance
    pub fn propagated(inner: Rc<Event>, source: NodeId) -> Self {
        Self {
            name: inner.name.clone(),
            source,
            data: inner.data.clone(),
            kind: inner.kind,
            inner: Some(inner),
        }
    }

    /// Attach a payload
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object this event was emitted on
    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_change(&self) -> bool {
        self.kind == EventKind::Change
    }

    /// The event this one was propagated from, if any
    pub fn inner(&self) -> Option<&Rc<Event>> {
        self.inner.as_ref()
    }

    /// The innermost event in the provenance chain
    pub fn original(&self) -> &Event {
        let mut event = self;
        while let Some(inner) = &event.inner {
            event = inner;
        }
        event
    }

    /// The object that originally emitted this event
    pub fn emitter(&self) -> NodeId {
        self.original().source
    }
}
