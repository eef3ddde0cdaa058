//! Trap registry
//!
//! Traps are the single observation primitive of the graph. A trap is a
//! callback registered on an object under a [`TrapKey`]: a property name,
//! the object's event stream, or its origin. Property writes, emitted events
//! and attachment changes are all delivered by invoking the traps listed
//! under the matching key.
//!
//! Requesting the first trap for a plain property turns it into an observed
//! property; from then on every write that changes the stored value invokes
//! the property's traps. Sealed and private (`_`-prefixed) properties can
//! never be trapped.
//!
//! Dispatch works on a snapshot of the trap list, so callbacks may add or
//! remove traps (including themselves) or unlink objects while a dispatch is
//! in flight. Traps removed mid-dispatch are skipped, and dispatch stops if
//! the object itself gets unlinked.

use slotmap::new_key_type;
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::graph::{Access, Graph, NodeId, RESERVED_PREFIX};
use crate::value::Value;

new_key_type! {
    /// Handle to a registered trap
    pub struct TrapId;
}

/// What a trap observes on its object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrapKey {
    /// Writes to a named property
    Property(Rc<str>),
    /// Events emitted on the object
    Event,
    /// Changes of the object's origin
    Origin,
}

impl TrapKey {
    pub fn property(name: &str) -> Self {
        TrapKey::Property(Rc::from(name))
    }
}

impl fmt::Display for TrapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapKey::Property(name) => write!(f, "{}", name),
            TrapKey::Event => write!(f, "<event>"),
            TrapKey::Origin => write!(f, "<origin>"),
        }
    }
}

/// Payload delivered to a trap callback
#[derive(Clone, Debug)]
pub enum Trigger {
    /// New value of a property
    Value(Value),
    /// An emitted event
    Event(Rc<Event>),
    /// New origin of the object
    Origin(Option<NodeId>),
}

/// Trap callback
pub type TrapFn = Rc<dyn Fn(&mut Graph, &Trigger)>;

/// Callback run when the trapped object is unlinked
pub type TrapUnlinkFn = Rc<dyn Fn(&mut Graph)>;

/// A trap ready to be registered with [`Graph::add_trap`]
pub struct Trap {
    callback: TrapFn,
    on_unlink: Option<TrapUnlinkFn>,
    invoke_now: bool,
}

impl Trap {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut Graph, &Trigger) + 'static,
    {
        Self {
            callback: Rc::new(callback),
            on_unlink: None,
            invoke_now: false,
        }
    }

    /// Run `callback` once if the object is unlinked while the trap is
    /// registered
    pub fn on_unlink<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Graph) + 'static,
    {
        self.on_unlink = Some(Rc::new(callback));
        self
    }

    /// Invoke the callback with the current value right after registering
    /// (property and origin traps only)
    pub fn invoke_now(mut self) -> Self {
        self.invoke_now = true;
        self
    }
}

/// Registered trap; `node` and `key` locate the list holding it
pub(crate) struct TrapEntry {
    pub(crate) node: NodeId,
    pub(crate) key: TrapKey,
    callback: TrapFn,
    pub(crate) on_unlink: Option<TrapUnlinkFn>,
}

impl Graph {
    /// Register a trap on an object
    ///
    /// Fails with [`Error::NoObserve`] if the object is unlinked, or if a
    /// property key names a property that does not exist, is private or is
    /// sealed.
    pub fn add_trap(&mut self, node: NodeId, key: TrapKey, trap: Trap) -> Result<TrapId> {
        let n = match self.nodes.get_mut(node) {
            Some(n) if !n.unlinked => n,
            _ => {
                return Err(Error::NoObserve(format!(
                    "{} on an unlinked object",
                    key
                )))
            }
        };
        if let TrapKey::Property(name) = &key {
            if name.starts_with(RESERVED_PREFIX) {
                return Err(Error::NoObserve(format!("{} is private", name)));
            }
            match n.properties.get_mut(&**name) {
                None => return Err(Error::NoObserve(format!("{} does not exist", name))),
                Some(p) if matches!(p.access, Access::Sealed) => {
                    return Err(Error::NoObserve(format!("{} is sealed", name)))
                }
                Some(p) => p.observed = true,
            }
        }

        let id = self.traps.insert(TrapEntry {
            node,
            key: key.clone(),
            callback: trap.callback.clone(),
            on_unlink: trap.on_unlink,
        });
        n.traps.entry(key.clone()).or_default().push(id);
        tracing::trace!(?node, %key, "trap added");

        if trap.invoke_now {
            let trigger = match &key {
                TrapKey::Property(name) => Some(Trigger::Value(self.get(node, name))),
                TrapKey::Origin => Some(Trigger::Origin(self.origin(node))),
                TrapKey::Event => None,
            };
            if let Some(trigger) = trigger {
                (trap.callback)(self, &trigger);
            }
        }
        Ok(id)
    }

    /// Remove a trap; returns `false` if it was already gone
    pub fn remove_trap(&mut self, id: TrapId) -> bool {
        let Some(entry) = self.traps.remove(id) else {
            return false;
        };
        if let Some(n) = self.nodes.get_mut(entry.node) {
            if let Some(list) = n.traps.get_mut(&entry.key) {
                list.retain(|t| *t != id);
                if list.is_empty() {
                    n.traps.remove(&entry.key);
                }
            }
        }
        true
    }

    /// Invoke every trap registered under `key`
    pub fn invoke_trap(&mut self, node: NodeId, key: &TrapKey, trigger: Trigger) {
        let snapshot: SmallVec<[TrapId; 8]> = match self.nodes.get(node) {
            Some(n) if !n.unlinked => match n.traps.get(key) {
                Some(list) => list.iter().copied().collect(),
                None => return,
            },
            _ => return,
        };
        for id in snapshot {
            if self.is_unlinked(node) {
                break;
            }
            let Some(callback) = self.traps.get(id).map(|e| e.callback.clone()) else {
                continue;
            };
            callback(self, &trigger);
        }
    }

    /// Number of traps registered on an object under `key`
    pub fn trap_count(&self, node: NodeId, key: &TrapKey) -> usize {
        self.nodes
            .get(node)
            .and_then(|n| n.traps.get(key))
            .map_or(0, |list| list.len())
    }

    /// The object and key a trap is registered under
    pub fn trap_owner(&self, id: TrapId) -> Option<(NodeId, &TrapKey)> {
        self.traps.get(id).map(|e| (e.node, &e.key))
    }
}
