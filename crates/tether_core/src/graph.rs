//! Object arena and attachment graph
//!
//! Every object lives in a [`Graph`] and is addressed by a [`NodeId`]
//! handle. Objects form an ownership tree: each object has at most one
//! *origin* (owner) and any number of attached children. Attaching an
//! object that already has an origin moves it atomically, attaching never
//! creates a cycle, and root objects can own children but can never be
//! attached themselves.
//!
//! [`Graph::unlink`] is the terminal lifecycle transition. It detaches the
//! object from its origin, runs and clears the unlink callbacks of every
//! trap registered on it, unlinks all attached children and discards the
//! bindings that target it. The object is then removed from the arena and
//! its handle reports [`Graph::is_unlinked`] from then on.
//!
//! # Example
//!
//! ```rust
//! use tether_core::Graph;
//!
//! let mut graph = Graph::new();
//! let parent = graph.create();
//! let child = graph.create();
//!
//! graph.attach(parent, child).unwrap();
//! assert_eq!(graph.origin(child), Some(parent));
//!
//! // Cycles are rejected
//! assert!(graph.attach(child, parent).is_err());
//!
//! // Unlinking cascades to attached children
//! graph.unlink(parent);
//! assert!(graph.is_unlinked(child));
//! ```

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::Cell;
use std::rc::Rc;

use crate::binding::{Bound, BoundId};
use crate::config::GraphConfig;
use crate::emitter::InterceptFn;
use crate::error::{Error, HandlerResult, Result};
use crate::event::{Event, EventHandler};
use crate::list::ListState;
use crate::trap::{Trap, TrapEntry, TrapId, TrapKey, Trigger};
use crate::value::Value;

new_key_type! {
    /// Handle to an object in a [`Graph`]
    pub struct NodeId;
}

/// Property names starting with this character are private and can never
/// be intercepted
pub const RESERVED_PREFIX: char = '_';

/// Custom setter; receives the written value and returns the value to store
pub type SetterFn = Rc<dyn Fn(&Graph, NodeId, Value) -> Value>;

/// Hook invoked right before an object is unlinked
pub type UnlinkHook = Rc<dyn Fn(&mut Graph, NodeId) -> HandlerResult>;

/// Invoked when an attached object leaves the origin it was attached to
pub type DetachHandler = Rc<dyn Fn(&mut Graph, NodeId) -> HandlerResult>;

/// Graph-wide sink for deferred failures
pub type ErrorHandler = Rc<dyn Fn(&Error)>;

/// How writes to a property are handled
#[derive(Clone)]
pub(crate) enum Access {
    /// Plain field; becomes observable on the first trap
    Plain,
    /// Exists and is writable but can never be intercepted
    Sealed,
    /// Writes pass through a custom setter first
    Accessor(SetterFn),
}

pub(crate) struct Property {
    pub(crate) value: Value,
    pub(crate) access: Access,
    /// Set once a trap has been requested; writes then notify traps
    pub(crate) observed: bool,
}

impl Property {
    pub(crate) fn new(value: Value, access: Access) -> Self {
        Self {
            value,
            access,
            observed: false,
        }
    }
}

/// Internal object storage
pub(crate) struct Node {
    pub(crate) unlinked: bool,
    pub(crate) root: bool,
    pub(crate) class: Option<Rc<str>>,
    pub(crate) label: Option<Rc<str>>,
    pub(crate) origin: Option<NodeId>,
    pub(crate) children: IndexSet<NodeId, FxBuildHasher>,
    pub(crate) properties: FxHashMap<Rc<str>, Property>,
    pub(crate) traps: FxHashMap<TrapKey, SmallVec<[TrapId; 4]>>,
    pub(crate) intercepts: FxHashMap<Rc<str>, InterceptFn>,
    pub(crate) bounds: SmallVec<[BoundId; 2]>,
    pub(crate) before_unlink: Option<UnlinkHook>,
    pub(crate) list: Option<Box<ListState>>,
}

impl Node {
    fn new(class: Option<Rc<str>>) -> Self {
        Self {
            unlinked: false,
            root: false,
            class,
            label: None,
            origin: None,
            children: IndexSet::default(),
            properties: FxHashMap::default(),
            traps: FxHashMap::default(),
            intercepts: FxHashMap::default(),
            bounds: SmallVec::new(),
            before_unlink: None,
            list: None,
        }
    }
}

/// Optional observers registered together with an attachment
///
/// The event handler receives every event emitted by the attached object;
/// the detach handler runs once when the object leaves this origin, either
/// because it moved, was detached or was unlinked. Both are removed at that
/// point.
#[derive(Clone, Default)]
pub struct AttachListener {
    handler: Option<EventHandler>,
    detached: Option<DetachHandler>,
}

impl AttachListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe events emitted by the attached object
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Graph, &Event) -> HandlerResult + 'static,
    {
        self.handler = Some(Rc::new(handler));
        self
    }

    /// Run when the attached object leaves this origin
    pub fn on_detach<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Graph, NodeId) -> HandlerResult + 'static,
    {
        self.detached = Some(Rc::new(handler));
        self
    }
}

/// The object arena: ownership edges, properties, traps and bindings
pub struct Graph {
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) traps: SlotMap<TrapId, TrapEntry>,
    pub(crate) bounds: SlotMap<BoundId, Bound>,
    pub(crate) config: GraphConfig,
    error_handler: Option<ErrorHandler>,
    localizer: Option<Rc<dyn Fn(&str) -> String>>,
}

impl Graph {
    /// Create an empty graph with the default configuration
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            traps: SlotMap::with_key(),
            bounds: SlotMap::with_key(),
            config,
            error_handler: None,
            localizer: None,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    /// Create a new object
    pub fn create(&mut self) -> NodeId {
        self.nodes.insert(Node::new(None))
    }

    /// Create a new object tagged with a class name (used by list
    /// restrictions)
    pub fn create_of(&mut self, class: &str) -> NodeId {
        self.nodes.insert(Node::new(Some(Rc::from(class))))
    }

    /// Create a new root object
    pub fn create_root(&mut self) -> NodeId {
        let id = self.create();
        if let Some(node) = self.nodes.get_mut(id) {
            node.root = true;
        }
        id
    }

    /// Mark an existing, unattached object as a root
    pub fn mark_root(&mut self, node: NodeId) -> Result<()> {
        let n = self.live_node_mut(node)?;
        if n.origin.is_some() {
            return Err(Error::InvalidArgument(
                "an attached object cannot become a root".into(),
            ));
        }
        n.root = true;
        Ok(())
    }

    pub fn is_root(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(|n| n.root)
    }

    /// Whether the object was unlinked (or never existed in this graph)
    pub fn is_unlinked(&self, node: NodeId) -> bool {
        self.nodes.get(node).map_or(true, |n| n.unlinked)
    }

    pub fn class_of(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.class.as_deref())
    }

    /// Set the label that labelled bindings match against
    pub fn set_label(&mut self, node: NodeId, label: &str) -> Result<()> {
        self.live_node_mut(node)?.label = Some(Rc::from(label));
        Ok(())
    }

    pub fn label_of(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.label.as_deref())
    }

    /// Register a hook that runs at the start of [`Graph::unlink`]
    pub fn on_before_unlink<F>(&mut self, node: NodeId, hook: F) -> Result<()>
    where
        F: Fn(&mut Graph, NodeId) -> HandlerResult + 'static,
    {
        self.live_node_mut(node)?.before_unlink = Some(Rc::new(hook));
        Ok(())
    }

    /// Number of objects currently alive in the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn live_node(&self, node: NodeId) -> Result<&Node> {
        self.nodes
            .get(node)
            .filter(|n| !n.unlinked)
            .ok_or(Error::ObjectUnlinked)
    }

    pub(crate) fn live_node_mut(&mut self, node: NodeId) -> Result<&mut Node> {
        match self.nodes.get_mut(node) {
            Some(n) if !n.unlinked => Ok(n),
            _ => Err(Error::ObjectUnlinked),
        }
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    /// Declare a plain property; it becomes observable on the first trap
    pub fn define(&mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Result<()> {
        self.define_property(node, name, Property::new(value.into(), Access::Plain))
    }

    /// Declare a property that can be written but never intercepted
    pub fn define_sealed(
        &mut self,
        node: NodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.define_property(node, name, Property::new(value.into(), Access::Sealed))
    }

    /// Declare a property whose writes pass through `setter`
    ///
    /// The setter's return value is what gets stored. Observing the property
    /// later keeps the setter in place; traps fire after it ran and only when
    /// the stored value changed.
    pub fn define_accessor<F>(
        &mut self,
        node: NodeId,
        name: &str,
        value: impl Into<Value>,
        setter: F,
    ) -> Result<()>
    where
        F: Fn(&Graph, NodeId, Value) -> Value + 'static,
    {
        self.define_property(
            node,
            name,
            Property::new(value.into(), Access::Accessor(Rc::new(setter))),
        )
    }

    fn define_property(&mut self, node: NodeId, name: &str, property: Property) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty property name".into()));
        }
        let n = self.live_node_mut(node)?;
        if n.properties.contains_key(name) {
            return Err(Error::InvalidArgument(format!(
                "property {} is already defined",
                name
            )));
        }
        n.properties.insert(Rc::from(name), property);
        Ok(())
    }

    pub fn has_property(&self, node: NodeId, name: &str) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|n| n.properties.contains_key(name))
    }

    /// Whether a trap could be installed for this property right now
    pub fn is_observable(&self, node: NodeId, name: &str) -> bool {
        if name.starts_with(RESERVED_PREFIX) {
            return false;
        }
        match self.live_node(node) {
            Ok(n) => n
                .properties
                .get(name)
                .is_some_and(|p| !matches!(p.access, Access::Sealed)),
            Err(_) => false,
        }
    }

    /// Read a property (`Undefined` if absent or the object is gone)
    pub fn get(&self, node: NodeId, name: &str) -> Value {
        self.nodes
            .get(node)
            .and_then(|n| n.properties.get(name))
            .map(|p| p.value.clone())
            .unwrap_or_default()
    }

    /// Write a property, declaring it as a plain property if needed
    ///
    /// Traps on an observed property are invoked only if the stored value
    /// actually changed.
    pub fn set(&mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut value = value.into();
        let setter = {
            let n = self.live_node_mut(node)?;
            match n.properties.get(name) {
                Some(p) => match &p.access {
                    Access::Accessor(setter) => Some(setter.clone()),
                    _ => None,
                },
                None => {
                    n.properties
                        .insert(Rc::from(name), Property::new(value, Access::Plain));
                    return Ok(());
                }
            }
        };
        if let Some(setter) = setter {
            value = setter(self, node, value);
        }

        let n = self.live_node_mut(node)?;
        let Some(property) = n.properties.get_mut(name) else {
            return Ok(());
        };
        if property.value == value {
            return Ok(());
        }
        property.value = value.clone();
        if property.observed {
            self.invoke_trap(node, &TrapKey::property(name), Trigger::Value(value));
        }
        Ok(())
    }

    /// Write without setter or traps (internal bookkeeping properties)
    pub(crate) fn write_silently(&mut self, node: NodeId, name: &str, value: Value) {
        if let Some(property) = self
            .nodes
            .get_mut(node)
            .and_then(|n| n.properties.get_mut(name))
        {
            property.value = value;
        }
    }

    // =========================================================================
    // ATTACHMENT
    // =========================================================================

    /// Attach `target` to `origin`, moving it from any previous origin
    ///
    /// Returns the target for chaining.
    pub fn attach(&mut self, origin: NodeId, target: NodeId) -> Result<NodeId> {
        self.attach_inner(origin, target, None)
    }

    /// Attach with observers for the target's events and its detachment
    pub fn attach_with(
        &mut self,
        origin: NodeId,
        target: NodeId,
        listener: AttachListener,
    ) -> Result<NodeId> {
        self.attach_inner(origin, target, Some(listener))
    }

    fn attach_inner(
        &mut self,
        origin: NodeId,
        target: NodeId,
        listener: Option<AttachListener>,
    ) -> Result<NodeId> {
        self.live_node(origin)?;
        let t = self.live_node(target)?;
        if t.root {
            return Err(Error::NoAttach("root objects cannot be attached".into()));
        }
        if origin == target {
            return Err(Error::NoAttach(
                "an object cannot be attached to itself".into(),
            ));
        }
        if self.is_ancestor(target, origin)? {
            return Err(Error::NoAttach("attachment would create a cycle".into()));
        }

        let previous = t.origin;
        if previous == Some(origin) {
            if let Some(listener) = listener {
                self.install_attach_listener(origin, target, listener)?;
            }
            return Ok(target);
        }

        if let Some(previous) = previous {
            if let Some(p) = self.nodes.get_mut(previous) {
                p.children.shift_remove(&target);
            }
        }
        if let Some(t) = self.nodes.get_mut(target) {
            t.origin = Some(origin);
        }
        if let Some(o) = self.nodes.get_mut(origin) {
            o.children.insert(target);
        }
        tracing::trace!(?origin, ?target, ?previous, "attached");

        self.invoke_trap(target, &TrapKey::Origin, Trigger::Origin(Some(origin)));
        if let Some(listener) = listener {
            self.install_attach_listener(origin, target, listener)?;
        }
        self.rebind_subtree(target);
        Ok(target)
    }

    /// Remove `target` from its origin without unlinking it
    pub fn detach(&mut self, target: NodeId) -> Result<()> {
        let Some(origin) = self.live_node_mut(target)?.origin.take() else {
            return Ok(());
        };
        if let Some(o) = self.nodes.get_mut(origin) {
            o.children.shift_remove(&target);
        }
        tracing::trace!(?origin, ?target, "detached");

        self.invoke_trap(target, &TrapKey::Origin, Trigger::Origin(None));
        self.rebind_subtree(target);
        Ok(())
    }

    /// Whether `ancestor` appears on the origin chain of `node`
    pub(crate) fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        let mut current = self.origin(node);
        let mut depth = 0;
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            depth += 1;
            if depth >= self.config.max_depth {
                return Err(Error::NoAttach(format!(
                    "attachment chain deeper than {}",
                    self.config.max_depth
                )));
            }
            current = self.origin(id);
        }
        Ok(false)
    }

    fn install_attach_listener(
        &mut self,
        origin: NodeId,
        target: NodeId,
        listener: AttachListener,
    ) -> Result<()> {
        let event_trap = match listener.handler {
            Some(handler) => Some(self.add_trap(
                target,
                TrapKey::Event,
                Trap::new(move |graph, trigger| {
                    if let Trigger::Event(event) = trigger {
                        if let Err(err) = handler(graph, event) {
                            graph.report(Error::Handler(err));
                        }
                    }
                }),
            )?),
            None => None,
        };

        let origin_trap: Rc<Cell<Option<TrapId>>> = Rc::new(Cell::new(None));
        let fire = {
            let origin_trap = origin_trap.clone();
            let detached = listener.detached;
            Rc::new(move |graph: &mut Graph| {
                let Some(own) = origin_trap.take() else {
                    return;
                };
                graph.remove_trap(own);
                if let Some(trap) = event_trap {
                    graph.remove_trap(trap);
                }
                if let Some(detached) = &detached {
                    if let Err(err) = detached(graph, target) {
                        graph.report(Error::Handler(err));
                    }
                }
            })
        };
        let on_unlink = fire.clone();
        let id = self.add_trap(
            target,
            TrapKey::Origin,
            Trap::new(move |graph, trigger| {
                if let Trigger::Origin(current) = trigger {
                    if *current != Some(origin) {
                        fire(graph);
                    }
                }
            })
            .on_unlink(move |graph| on_unlink(graph)),
        )?;
        origin_trap.set(Some(id));
        Ok(())
    }

    pub fn origin(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.origin)
    }

    /// Attached children in attachment order
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The object `hops` steps up the origin chain (`0` is the node itself)
    pub fn ancestor(&self, node: NodeId, hops: usize) -> Option<NodeId> {
        let mut current = Some(node);
        for _ in 0..hops {
            current = self.origin(current?);
        }
        current
    }

    /// Nearest ancestor tagged with `class`
    pub fn find_ancestor(&self, node: NodeId, class: &str) -> Option<NodeId> {
        let mut current = self.origin(node);
        let mut depth = 0;
        while let Some(id) = current {
            if self.class_of(id) == Some(class) {
                return Some(id);
            }
            depth += 1;
            if depth >= self.config.max_depth {
                return None;
            }
            current = self.origin(id);
        }
        None
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Unlink an object and, recursively, everything attached to it
    ///
    /// Does nothing if the object is already unlinked. Errors from the
    /// before-unlink hook go to the error handler.
    pub fn unlink(&mut self, node: NodeId) {
        let hook = match self.nodes.get(node) {
            Some(n) if !n.unlinked => n.before_unlink.clone(),
            _ => return,
        };
        if let Some(hook) = hook {
            if let Err(err) = hook(self, node) {
                self.report(Error::Handler(err));
            }
        }

        let (origin, trap_ids) = match self.nodes.get_mut(node) {
            Some(n) if !n.unlinked => {
                n.unlinked = true;
                let trap_ids: Vec<TrapId> = n.traps.drain().flat_map(|(_, ids)| ids).collect();
                (n.origin.take(), trap_ids)
            }
            _ => return,
        };
        if let Some(origin) = origin {
            if let Some(o) = self.nodes.get_mut(origin) {
                o.children.shift_remove(&node);
            }
        }

        let callbacks: Vec<_> = trap_ids
            .into_iter()
            .filter_map(|id| self.traps.remove(id))
            .filter_map(|entry| entry.on_unlink)
            .collect();
        for callback in callbacks {
            callback(self);
        }

        for child in self.children(node) {
            self.unlink(child);
        }

        self.discard_bounds(node);
        self.nodes.remove(node);
        tracing::trace!(?node, "unlinked");
    }

    // =========================================================================
    // ERRORS & HOOKS
    // =========================================================================

    /// Install the sink for failures that cannot be returned to a caller
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Error) + 'static,
    {
        self.error_handler = Some(Rc::new(handler));
    }

    /// Route a deferred failure to the error handler
    pub fn report(&self, error: Error) {
        match &self.error_handler {
            Some(handler) => handler(&error),
            None => tracing::error!(%error, "unhandled error"),
        }
    }

    /// Install the translation used by the `local` binding filter
    pub fn set_localizer<F>(&mut self, localizer: F)
    where
        F: Fn(&str) -> String + 'static,
    {
        self.localizer = Some(Rc::new(localizer));
    }

    pub(crate) fn localize(&self, text: &str) -> String {
        match &self.localizer {
            Some(localizer) => localizer(text),
            None => text.to_string(),
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
