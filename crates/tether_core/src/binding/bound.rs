//! Runtime state of installed bindings and the resolution algorithm
//!
//! Each path binding installed on a target becomes a [`Bound`] in the
//! graph's arena. Its `level` records how many origin hops above the target
//! the source sits (`None` while unresolved) and `chain` holds one entry per
//! path segment that is currently watched: the object holding the segment
//! and the trap observing it. Segments exposed as observable properties get
//! a property trap; anything else is re-read on the holder's change events.

use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

use slotmap::new_key_type;

use super::filter::Filter;
use super::SinkKind;
use crate::error::Error;
use crate::graph::{Graph, NodeId};
use crate::trap::{Trap, TrapId, TrapKey, Trigger};
use crate::value::Value;

new_key_type! {
    /// Handle to an installed path binding
    pub struct BoundId;
}

/// Everything installed by one [`Binding::bind_to`](super::Binding::bind_to)
/// call; pass it to [`Graph::unbind`] to stop tracking early
#[derive(Clone, Debug, Default)]
pub struct BindHandle {
    ids: SmallVec<[BoundId; 2]>,
}

impl BindHandle {
    pub(crate) fn push(&mut self, id: BoundId) {
        self.ids.push(id);
    }

    /// Path bindings backing this handle
    pub fn bounds(&self) -> &[BoundId] {
        &self.ids
    }
}

struct ChainLink {
    node: NodeId,
    trap: Option<TrapId>,
}

pub(crate) struct Bound {
    target: NodeId,
    path: Rc<[Rc<str>]>,
    label: Option<Rc<str>>,
    pinned: Option<NodeId>,
    level: Option<usize>,
    chain: Vec<ChainLink>,
    output: Rc<Output>,
    /// NoBind already reported for the current unresolved stretch
    reported: bool,
}

pub(crate) enum Delivery {
    Value(Value),
    Forced(Value),
    Reset,
}

/// Final stage of a binding: default, filters, change suppression, sink
pub(crate) struct Output {
    target: NodeId,
    sink: SinkKind,
    filters: Vec<Filter>,
    default: Value,
    description: Rc<str>,
    last: RefCell<Option<Value>>,
}

impl Output {
    pub(crate) fn new(
        target: NodeId,
        sink: SinkKind,
        filters: Vec<Filter>,
        default: Value,
        description: Rc<str>,
    ) -> Self {
        Self {
            target,
            sink,
            filters,
            default,
            description,
            last: RefCell::new(None),
        }
    }

    fn is_pristine(&self) -> bool {
        self.last.borrow().is_none()
    }

    pub(crate) fn deliver(&self, graph: &mut Graph, delivery: Delivery) {
        if graph.is_unlinked(self.target) {
            return;
        }
        let (value, forced) = match delivery {
            Delivery::Reset => (Value::Undefined, true),
            Delivery::Value(value) => (self.filter(graph, value), false),
            Delivery::Forced(value) => (self.filter(graph, value), true),
        };
        if !forced && self.last.borrow().as_ref() == Some(&value) {
            return;
        }
        *self.last.borrow_mut() = Some(value.clone());

        match &self.sink {
            SinkKind::Property(name) => {
                if let Err(err) = graph.set(self.target, name, value) {
                    graph.report(err);
                }
            }
            SinkKind::Callback(callback) => {
                if let Err(err) = callback(graph, &value) {
                    graph.report(Error::Handler(err));
                }
            }
            SinkKind::Internal(feed) => feed(graph, value),
        }
    }

    fn filter(&self, graph: &Graph, value: Value) -> Value {
        let value = if value.is_undefined() {
            self.default.clone()
        } else {
            value
        };
        self.filters
            .iter()
            .fold(value, |v, f| f.apply(graph, v, &self.description))
    }
}

impl Graph {
    pub(crate) fn install_path(
        &mut self,
        target: NodeId,
        path: Rc<[Rc<str>]>,
        label: Option<Rc<str>>,
        pinned: Option<NodeId>,
        output: Rc<Output>,
    ) -> BoundId {
        let id = self.bounds.insert(Bound {
            target,
            path,
            label,
            pinned,
            level: None,
            chain: Vec::new(),
            output,
            reported: false,
        });
        if let Some(node) = self.nodes.get_mut(target) {
            node.bounds.push(id);
        }
        self.resolve_bound(id, 0);
        id
    }

    /// Find the source starting `start_level` hops above the target's
    /// origin and watch the path from there
    fn resolve_bound(&mut self, id: BoundId, start_level: usize) {
        self.teardown_chain(id, 0);
        let Some(bound) = self.bounds.get(id) else {
            return;
        };
        let target = bound.target;
        let pinned = bound.pinned;
        let label = bound.label.clone();
        let first = bound.path[0].clone();
        let was_bound = bound.level.is_some();

        let mut level = start_level;
        let mut candidate = match pinned {
            Some(origin) => Some(origin),
            None => self.ancestor(target, start_level + 1),
        };
        loop {
            let Some(node) = candidate.filter(|n| !self.is_unlinked(*n)) else {
                self.unbind_state(id, false);
                return;
            };
            let accepts = label
                .as_deref()
                .map_or(true, |l| self.label_of(node) == Some(l));
            if accepts && self.has_property(node, &first) {
                let output = match self.bounds.get_mut(id) {
                    Some(bound) => {
                        bound.level = Some(level);
                        bound.reported = false;
                        bound.output.clone()
                    }
                    None => return,
                };
                tracing::debug!(binding = %output.description, level, "binding resolved");
                let value = self.watch_path(id, 0, node);
                let delivery = if was_bound {
                    Delivery::Value(value)
                } else {
                    Delivery::Forced(value)
                };
                output.deliver(self, delivery);
                return;
            }
            if pinned.is_some() || self.is_root(node) || level + 1 >= self.config.max_depth {
                self.unbind_state(id, true);
                return;
            }
            candidate = self.origin(node);
            level += 1;
        }
    }

    /// Enter the unresolved state; `report` raises NoBind once per stretch
    fn unbind_state(&mut self, id: BoundId, report: bool) {
        let Some(bound) = self.bounds.get_mut(id) else {
            return;
        };
        let was_bound = bound.level.take().is_some();
        let raise = report && !bound.reported;
        bound.reported |= report;
        let target = bound.target;
        let output = bound.output.clone();

        if raise {
            tracing::warn!(binding = %output.description, ?target, "binding unresolved");
            self.report(Error::NoBind(format!(
                "{} on {:?}",
                output.description, target
            )));
        } else {
            tracing::debug!(binding = %output.description, "binding unresolved");
        }
        if was_bound || output.is_pristine() {
            output.deliver(self, Delivery::Reset);
        }
    }

    /// Watch segments from `idx` on, starting at `node`; returns the value
    /// at the end of the path
    fn watch_path(&mut self, id: BoundId, idx: usize, node: NodeId) -> Value {
        let Some(path) = self.bounds.get(id).map(|b| b.path.clone()) else {
            return Value::Undefined;
        };
        if idx >= path.len() || self.is_unlinked(node) {
            return Value::Undefined;
        }
        let trap = self.watch_segment(id, idx, node, &path[idx]);
        match self.bounds.get_mut(id) {
            Some(bound) => bound.chain.push(ChainLink { node, trap }),
            None => {
                if let Some(trap) = trap {
                    self.remove_trap(trap);
                }
                return Value::Undefined;
            }
        }
        self.read_segment(id, idx, node, &path)
    }

    fn read_segment(&mut self, id: BoundId, idx: usize, node: NodeId, path: &[Rc<str>]) -> Value {
        let value = self.get(node, &path[idx]);
        if idx + 1 == path.len() {
            return value;
        }
        match value.as_node() {
            Some(next) if !self.is_unlinked(next) => self.watch_path(id, idx + 1, next),
            _ => Value::Undefined,
        }
    }

    fn watch_segment(&mut self, id: BoundId, idx: usize, node: NodeId, name: &str) -> Option<TrapId> {
        let (key, trap) = if self.is_observable(node, name) {
            let trap = Trap::new(move |graph, trigger| {
                if let Trigger::Value(_) = trigger {
                    graph.refresh_bound(id, idx);
                }
            });
            (TrapKey::property(name), trap)
        } else {
            let trap = Trap::new(move |graph, trigger| {
                if let Trigger::Event(event) = trigger {
                    if event.is_change() {
                        graph.refresh_bound(id, idx);
                    }
                }
            });
            (TrapKey::Event, trap)
        };
        let trap = trap.on_unlink(move |graph| graph.on_chain_unlinked(id, idx));
        match self.add_trap(node, key, trap) {
            Ok(trap) => Some(trap),
            Err(err) => {
                tracing::debug!(%err, "segment not watched");
                None
            }
        }
    }

    /// Segment `idx` changed: rebuild the chain below it and deliver
    fn refresh_bound(&mut self, id: BoundId, idx: usize) {
        let Some(bound) = self.bounds.get(id) else {
            return;
        };
        if bound.level.is_none() {
            return;
        }
        let Some(node) = bound.chain.get(idx).map(|l| l.node) else {
            return;
        };
        let path = bound.path.clone();
        let output = bound.output.clone();
        self.teardown_chain(id, idx + 1);
        let value = self.read_segment(id, idx, node, &path);
        output.deliver(self, Delivery::Value(value));
    }

    /// An object on the chain was unlinked
    fn on_chain_unlinked(&mut self, id: BoundId, idx: usize) {
        let Some(bound) = self.bounds.get_mut(id) else {
            return;
        };
        if let Some(link) = bound.chain.get_mut(idx) {
            link.trap = None;
        }
        let target = bound.target;
        let pinned = bound.pinned.is_some();
        if self.is_unlinked(target) {
            return;
        }
        match idx {
            // A non-pinned source is an ancestor; the cascade reaches the target
            0 if !pinned => {}
            0 => {
                self.teardown_chain(id, 0);
                self.unbind_state(id, false);
            }
            _ => self.refresh_bound(id, idx - 1),
        }
    }

    fn teardown_chain(&mut self, id: BoundId, from: usize) {
        let removed = match self.bounds.get_mut(id) {
            Some(bound) if bound.chain.len() > from => bound.chain.split_off(from),
            _ => return,
        };
        for link in removed {
            if let Some(trap) = link.trap {
                self.remove_trap(trap);
            }
        }
    }

    /// Re-resolve bindings in the subtree of an object whose origin changed
    ///
    /// A binding `d` levels below `node` whose source sits below `node`'s
    /// old origin is unaffected; everything else re-resolves from level `d`.
    /// Unresolved bindings retry from their own origin.
    pub(crate) fn rebind_subtree(&mut self, node: NodeId) {
        let mut work: Vec<(BoundId, usize)> = Vec::new();
        let mut stack = vec![(node, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            let Some(n) = self.nodes.get(current) else {
                continue;
            };
            for &id in &n.bounds {
                let Some(bound) = self.bounds.get(id) else {
                    continue;
                };
                if bound.pinned.is_some() {
                    continue;
                }
                match bound.level {
                    Some(level) if level < depth => {}
                    Some(_) => work.push((id, depth)),
                    None => work.push((id, 0)),
                }
            }
            stack.extend(n.children.iter().map(|c| (*c, depth + 1)));
        }
        for (id, from) in work {
            if self.bounds.contains_key(id) {
                self.resolve_bound(id, from);
            }
        }
    }

    pub(crate) fn discard_bounds(&mut self, node: NodeId) {
        let ids = match self.nodes.get_mut(node) {
            Some(n) => std::mem::take(&mut n.bounds),
            None => return,
        };
        for id in ids {
            self.discard_bound(id);
        }
    }

    fn discard_bound(&mut self, id: BoundId) {
        if let Some(bound) = self.bounds.remove(id) {
            for link in bound.chain {
                if let Some(trap) = link.trap {
                    self.remove_trap(trap);
                }
            }
        }
    }

    /// Stop a binding before its target is unlinked
    ///
    /// The sink keeps its last value.
    pub fn unbind(&mut self, handle: BindHandle) {
        for id in handle.ids {
            if let Some(target) = self.bounds.get(id).map(|b| b.target) {
                if let Some(n) = self.nodes.get_mut(target) {
                    n.bounds.retain(|b| *b != id);
                }
            }
            self.discard_bound(id);
        }
    }

    /// Nesting level of a resolved binding (`None` while unresolved)
    pub fn bound_level(&self, id: BoundId) -> Option<usize> {
        self.bounds.get(id).and_then(|b| b.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Binding, Sink};
    use std::cell::Cell;

    #[test]
    fn test_escalates_past_unrelated_ancestors() {
        let mut graph = Graph::new();
        let top = graph.create();
        let mid = graph.create();
        let target = graph.create();
        graph.define(top, "title", "hello").unwrap();
        graph.attach(top, mid).unwrap();
        graph.attach(mid, target).unwrap();

        let handle = graph.bind(target, "text", "title").unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("hello"));
        assert_eq!(graph.bound_level(handle.bounds()[0]), Some(1));
    }

    #[test]
    fn test_label_skips_ancestors() {
        let mut graph = Graph::new();
        let outer = graph.create();
        let inner = graph.create();
        let target = graph.create();
        graph.define(outer, "name", "outer").unwrap();
        graph.define(inner, "name", "inner").unwrap();
        graph.set_label(outer, "page").unwrap();
        graph.attach(outer, inner).unwrap();
        graph.attach(inner, target).unwrap();

        Binding::new("name")
            .label("page")
            .bind_to(&mut graph, target, "text")
            .unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("outer"));
    }

    #[test]
    fn test_no_bind_reported_once_at_root() {
        let mut graph = Graph::new();
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        graph.set_error_handler(move |err| {
            assert!(matches!(err, Error::NoBind(_)));
            e.set(e.get() + 1);
        });

        let root = graph.create_root();
        let a = graph.create();
        let b = graph.create();
        graph.attach(root, a).unwrap();
        graph.attach(root, b).unwrap();
        let target = graph.create();
        graph.attach(a, target).unwrap();

        graph.bind(target, "text", "missing").unwrap();
        assert_eq!(errors.get(), 1);

        // Still unresolved after moving; not reported again
        graph.attach(b, target).unwrap();
        assert_eq!(errors.get(), 1);

        // Resolving resets the report state
        graph.define(a, "missing", 1).unwrap();
        graph.attach(a, target).unwrap();
        assert_eq!(graph.get(target, "text"), Value::from(1));
        graph.attach(b, target).unwrap();
        assert_eq!(errors.get(), 2);
    }

    #[test]
    fn test_escalation_bounded_by_max_depth() {
        let mut graph = Graph::new();
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        graph.set_error_handler(move |err| {
            assert!(matches!(err, Error::NoBind(_)));
            e.set(e.get() + 1);
        });

        let top = graph.create();
        graph.define(top, "theme", "dark").unwrap();
        let upper = graph.create();
        let lower = graph.create();
        graph.attach(top, upper).unwrap();
        graph.attach(upper, lower).unwrap();
        let target = graph.create();
        graph.attach(lower, target).unwrap();
        graph.config.max_depth = 2;

        graph.bind(target, "text", "theme").unwrap();
        assert_eq!(errors.get(), 1);
        assert_eq!(graph.get(target, "text"), Value::Undefined);

        // Within reach once the chain is short enough
        graph.attach(upper, target).unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("dark"));
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn test_unattached_target_not_reported() {
        let mut graph = Graph::new();
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        graph.set_error_handler(move |_| e.set(e.get() + 1));
        let target = graph.create();
        graph.bind(target, "text", "x").unwrap();
        assert_eq!(errors.get(), 0);
    }

    #[test]
    fn test_pinned_does_not_follow_moves() {
        let mut graph = Graph::new();
        let source = graph.create();
        let other = graph.create();
        graph.define(source, "v", "pinned").unwrap();
        graph.define(other, "v", "other").unwrap();
        let target = graph.create();

        Binding::new("v")
            .bind_pinned(&mut graph, target, source, "text")
            .unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("pinned"));

        graph.attach(other, target).unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("pinned"));

        graph.unlink(source);
        assert_eq!(graph.get(target, "text"), Value::Undefined);
    }

    #[test]
    fn test_change_event_fallback_for_sealed() {
        let mut graph = Graph::new();
        let origin = graph.create();
        graph.define_sealed(origin, "state", "idle").unwrap();
        let target = graph.create();
        graph.attach(origin, target).unwrap();
        graph.bind(target, "text", "state").unwrap();
        assert_eq!(graph.get(target, "text"), Value::from("idle"));

        graph.set(origin, "state", "busy").unwrap();
        // Not observable; only a change event triggers a re-read
        assert_eq!(graph.get(target, "text"), Value::from("idle"));
        graph.emit(origin, "Tick", Value::Undefined);
        assert_eq!(graph.get(target, "text"), Value::from("idle"));
        graph.emit_change(origin, "StateChanged", Value::Undefined);
        assert_eq!(graph.get(target, "text"), Value::from("busy"));
    }

    #[test]
    fn test_callback_sink_suppresses_repeats() {
        let mut graph = Graph::new();
        let origin = graph.create();
        graph.define(origin, "n", 1).unwrap();
        let target = graph.create();
        graph.attach(origin, target).unwrap();

        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        Binding::new("n")
            .as_boolean()
            .bind_to(
                &mut graph,
                target,
                Sink::callback(move |_, _| {
                    c.set(c.get() + 1);
                    Ok(())
                }),
            )
            .unwrap();
        assert_eq!(calls.get(), 1);
        graph.set(origin, "n", 2).unwrap();
        assert_eq!(calls.get(), 1);
        graph.set(origin, "n", 0).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_unbind_stops_tracking() {
        let mut graph = Graph::new();
        let origin = graph.create();
        graph.define(origin, "n", 1).unwrap();
        let target = graph.create();
        graph.attach(origin, target).unwrap();

        let handle = graph.bind(target, "z", "n").unwrap();
        graph.unbind(handle);
        graph.set(origin, "n", 5).unwrap();
        assert_eq!(graph.get(target, "z"), Value::from(1));
        assert_eq!(graph.trap_count(origin, &TrapKey::property("n")), 0);
    }

    #[test]
    fn test_unlink_discards_traps() {
        let mut graph = Graph::new();
        let origin = graph.create();
        graph.define(origin, "n", 1).unwrap();
        let target = graph.create();
        graph.attach(origin, target).unwrap();
        graph.bind(target, "z", "n").unwrap();
        assert_eq!(graph.trap_count(origin, &TrapKey::property("n")), 1);

        graph.unlink(target);
        assert_eq!(graph.trap_count(origin, &TrapKey::property("n")), 0);
        assert!(graph.bounds.is_empty());
    }
}
