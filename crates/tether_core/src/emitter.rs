//! Event capability: emit, listen, intercept and observe
//!
//! Events are dispatched through the trap registry under
//! [`TrapKey::Event`], so listeners share the snapshot-before-dispatch and
//! unlink semantics of every other trap.
//!
//! There are three ways to listen:
//!
//! - [`Graph::listen`] with a plain callback,
//! - [`Graph::listen_with`] with a [`Listener`] that can also observe the
//!   object being unlinked and receives a [`Stop`] handle on registration,
//! - [`Graph::listen_stream`], which returns an [`EventStream`] that can be
//!   awaited one event at a time.
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_core::{Graph, Value};
//!
//! let mut graph = Graph::new();
//! let node = graph.create();
//! let count = Rc::new(Cell::new(0));
//!
//! let c = count.clone();
//! graph.listen(node, move |_, event| {
//!     assert_eq!(event.name(), "Clicked");
//!     c.set(c.get() + 1);
//!     Ok(())
//! }).unwrap();
//!
//! graph.emit(node, "Clicked", Value::Undefined);
//! assert_eq!(count.get(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{Error, HandlerResult, Result};
use crate::event::{Event, EventHandler};
use crate::graph::{Graph, NodeId};
use crate::trap::{Trap, TrapId, TrapKey, Trigger};
use crate::value::Value;

/// Interceptor for a named event; decides whether to forward it
pub type InterceptFn = Rc<dyn Fn(&mut Graph, Rc<Event>, Forward) -> HandlerResult>;

/// Continuation handed to an interceptor
///
/// Emitting through it dispatches straight to the object's listeners,
/// bypassing the interceptor.
#[derive(Clone, Copy, Debug)]
pub struct Forward {
    node: NodeId,
}

impl Forward {
    pub fn emit(&self, graph: &mut Graph, event: Rc<Event>) {
        graph.dispatch_event(self.node, event);
    }
}

/// Handle that stops a listener registered with [`Graph::listen_with`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stop(TrapId);

impl Stop {
    pub fn stop(&self, graph: &mut Graph) {
        graph.remove_trap(self.0);
    }

    pub fn trap(&self) -> TrapId {
        self.0
    }
}

type UnlinkedFn = Rc<dyn Fn(&mut Graph) -> HandlerResult>;
type InitFn = Box<dyn FnOnce(&mut Graph, Stop) -> HandlerResult>;

/// Listener with separate handlers for events, unlinking and registration
#[derive(Default)]
pub struct Listener {
    handler: Option<EventHandler>,
    unlinked: Option<UnlinkedFn>,
    init: Option<InitFn>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Graph, &Event) -> HandlerResult + 'static,
    {
        self.handler = Some(Rc::new(handler));
        self
    }

    /// Runs once when the observed object is unlinked
    pub fn unlinked<F>(mut self, unlinked: F) -> Self
    where
        F: Fn(&mut Graph) -> HandlerResult + 'static,
    {
        self.unlinked = Some(Rc::new(unlinked));
        self
    }

    /// Runs synchronously right after registration with a stop handle
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: FnOnce(&mut Graph, Stop) -> HandlerResult + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }
}

/// Asynchronous sequence of events emitted on one object
///
/// Events are buffered until read. Unlinking the object ends the sequence
/// and discards anything still buffered; [`EventStream::stop`] (or dropping
/// the stream) does the same from the reading side and removes the
/// underlying trap on the next emit.
pub struct EventStream {
    receiver: UnboundedReceiver<Rc<Event>>,
    closed: Rc<Cell<bool>>,
}

impl EventStream {
    /// Wait for the next event; `None` once the object is unlinked or the
    /// stream was stopped
    pub async fn next(&mut self) -> Option<Rc<Event>> {
        if self.closed.get() {
            return None;
        }
        let event = self.receiver.recv().await;
        if self.closed.get() {
            return None;
        }
        event
    }

    /// Take a buffered event without waiting
    pub fn try_next(&mut self) -> Option<Rc<Event>> {
        if self.closed.get() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Stop the sequence and discard buffered events
    pub fn stop(&mut self) {
        self.closed.set(true);
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Graph {
    /// Emit a plain event with an optional payload
    pub fn emit(&mut self, node: NodeId, name: &str, data: impl Into<Value>) {
        self.emit_event(node, Event::new(name, node).with_data(data));
    }

    /// Emit a change event
    pub fn emit_change(&mut self, node: NodeId, name: &str, data: impl Into<Value>) {
        self.emit_event(node, Event::change(name, node).with_data(data));
    }

    /// Emit a prepared event, passing it through an interceptor if one is
    /// registered for its name
    pub fn emit_event(&mut self, node: NodeId, event: Event) {
        let interceptor = match self.nodes.get(node) {
            Some(n) if !n.unlinked => n.intercepts.get(event.name()).cloned(),
            _ => return,
        };
        let event = Rc::new(event);
        match interceptor {
            Some(interceptor) => {
                if let Err(err) = interceptor(self, event, Forward { node }) {
                    self.report(Error::Handler(err));
                }
            }
            None => self.dispatch_event(node, event),
        }
    }

    pub(crate) fn dispatch_event(&mut self, node: NodeId, event: Rc<Event>) {
        self.invoke_trap(node, &TrapKey::Event, Trigger::Event(event));
    }

    /// Route events named `name` through `handler`, replacing any previous
    /// interceptor for that name
    pub fn intercept<F>(&mut self, node: NodeId, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut Graph, Rc<Event>, Forward) -> HandlerResult + 'static,
    {
        self.live_node_mut(node)?
            .intercepts
            .insert(Rc::from(name), Rc::new(handler));
        Ok(())
    }

    pub fn remove_intercept(&mut self, node: NodeId, name: &str) -> bool {
        self.nodes
            .get_mut(node)
            .is_some_and(|n| n.intercepts.remove(name).is_some())
    }

    /// Listen for every event emitted on `node`
    ///
    /// Handler errors are reported and do not stop other listeners.
    pub fn listen<F>(&mut self, node: NodeId, handler: F) -> Result<TrapId>
    where
        F: Fn(&mut Graph, &Event) -> HandlerResult + 'static,
    {
        self.listen_with(node, Listener::new().handler(handler))
    }

    /// Listen with a [`Listener`]
    pub fn listen_with(&mut self, node: NodeId, listener: Listener) -> Result<TrapId> {
        self.live_node(node)?;
        let Listener {
            handler,
            unlinked,
            init,
        } = listener;

        let mut trap = Trap::new(move |graph, trigger| {
            if let (Some(handler), Trigger::Event(event)) = (&handler, trigger) {
                if let Err(err) = handler(graph, event) {
                    graph.report(Error::Handler(err));
                }
            }
        });
        if let Some(unlinked) = unlinked {
            trap = trap.on_unlink(move |graph| {
                if let Err(err) = unlinked(graph) {
                    graph.report(Error::Handler(err));
                }
            });
        }
        let id = self.add_trap(node, TrapKey::Event, trap)?;

        if let Some(init) = init {
            if let Err(err) = init(self, Stop(id)) {
                self.report(Error::Handler(err));
            }
        }
        Ok(id)
    }

    /// Listen for events as an asynchronous sequence
    pub fn listen_stream(&mut self, node: NodeId) -> Result<EventStream> {
        self.live_node(node)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let sender: Rc<RefCell<Option<UnboundedSender<Rc<Event>>>>> =
            Rc::new(RefCell::new(Some(sender)));
        let closed = Rc::new(Cell::new(false));
        let own: Rc<Cell<Option<TrapId>>> = Rc::new(Cell::new(None));

        let trap = {
            let sender = sender.clone();
            let own = own.clone();
            let on_unlink_sender = sender.clone();
            let on_unlink_closed = closed.clone();
            Trap::new(move |graph, trigger| {
                let Trigger::Event(event) = trigger else {
                    return;
                };
                let delivered = sender
                    .borrow()
                    .as_ref()
                    .is_some_and(|tx| tx.send(event.clone()).is_ok());
                if !delivered {
                    sender.borrow_mut().take();
                    if let Some(id) = own.take() {
                        graph.remove_trap(id);
                    }
                }
            })
            .on_unlink(move |_| {
                on_unlink_closed.set(true);
                on_unlink_sender.borrow_mut().take();
            })
        };
        let id = self.add_trap(node, TrapKey::Event, trap)?;
        own.set(Some(id));
        Ok(EventStream { receiver, closed })
    }

    /// Observe several properties with one callback
    ///
    /// Either every property gets a trap or none does.
    pub fn observe<F>(&mut self, node: NodeId, properties: &[&str], callback: F) -> Result<Vec<TrapId>>
    where
        F: Fn(&mut Graph, &str, &Value) -> HandlerResult + 'static,
    {
        let callback = Rc::new(callback);
        let mut ids = Vec::with_capacity(properties.len());
        for name in properties {
            let callback = callback.clone();
            let property: Rc<str> = Rc::from(*name);
            let result = self.add_trap(
                node,
                TrapKey::Property(property.clone()),
                Trap::new(move |graph, trigger| {
                    if let Trigger::Value(value) = trigger {
                        if let Err(err) = callback(graph, &*property, value) {
                            graph.report(Error::Handler(err));
                        }
                    }
                }),
            );
            match result {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids {
                        self.remove_trap(id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }
}
