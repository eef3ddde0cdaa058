//! Observable ordered collection
//!
//! A [`List`] is a graph object holding an ordered, duplicate-free sequence
//! of other objects. Storage is a doubly linked list of links kept in a
//! slotmap, with a map from member to link for O(1) membership checks,
//! insertion before a known member and removal.
//!
//! Every mutation emits a change event on the list object:
//!
//! | Event    | Data            | Emitted by                                   |
//! |----------|-----------------|----------------------------------------------|
//! | `Add`    | the new member  | insert, add, splice, replace_all             |
//! | `Remove` | the old member  | remove, splice, replace_all, member detached |
//! | `Change` | -               | reverse, sort, replace_all (reordering)      |
//! | `Clear`  | -               | clear                                        |
//!
//! The list also exposes a sealed `count` property.
//!
//! With [`List::attach_all`] the list owns its members: additions are
//! attached to the list, removals unlink the member, and a member that is
//! attached elsewhere silently leaves the list. Events emitted by members
//! are re-emitted on the list with the member's event as provenance.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{Graph, List};
//!
//! let mut graph = Graph::new();
//! let list = List::create(&mut graph);
//! let a = graph.create();
//! let b = graph.create();
//!
//! list.add(&mut graph, a).unwrap();
//! list.insert(&mut graph, b, Some(a)).unwrap();
//! assert_eq!(list.to_vec(&graph), vec![b, a]);
//! assert_eq!(list.get(&graph, 1).unwrap(), a);
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{new_key_type, SlotMap};
use std::cmp::Ordering;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::graph::{Access, AttachListener, Graph, NodeId, Property};
use crate::trap::{Trap, TrapId, TrapKey};
use crate::value::Value;

/// Class name carried by list objects
pub const LIST_CLASS: &str = "List";
/// Sealed property holding the member count
pub const COUNT: &str = "count";

pub const EVENT_ADD: &str = "Add";
pub const EVENT_REMOVE: &str = "Remove";
pub const EVENT_CHANGE: &str = "Change";
pub const EVENT_CLEAR: &str = "Clear";

new_key_type! {
    pub(crate) struct LinkId;
}

struct Link {
    object: NodeId,
    prev: Option<LinkId>,
    next: Option<LinkId>,
    /// Unlink trap on a member the list does not own
    watch: Option<TrapId>,
}

/// Per-list storage, owned by the list's node
pub(crate) struct ListState {
    links: SlotMap<LinkId, Link>,
    index: FxHashMap<NodeId, LinkId>,
    head: Option<LinkId>,
    tail: Option<LinkId>,
    restriction: Option<Rc<str>>,
    auto_attach: bool,
    propagate: bool,
}

impl ListState {
    fn new(propagate: bool) -> Self {
        Self {
            links: SlotMap::with_key(),
            index: FxHashMap::default(),
            head: None,
            tail: None,
            restriction: None,
            auto_attach: false,
            propagate,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn push(&mut self, object: NodeId, before: Option<LinkId>, watch: Option<TrapId>) {
        let link = self.links.insert(Link {
            object,
            prev: None,
            next: None,
            watch,
        });
        self.index.insert(object, link);
        self.place(link, before);
    }

    /// Splice a detached link in before `before`, or at the tail
    fn place(&mut self, link: LinkId, before: Option<LinkId>) {
        let prev = match before {
            Some(before) => self.links.get(before).and_then(|l| l.prev),
            None => self.tail,
        };
        if let Some(l) = self.links.get_mut(link) {
            l.prev = prev;
            l.next = before;
        }
        match prev.and_then(|p| self.links.get_mut(p)) {
            Some(p) => p.next = Some(link),
            None => self.head = Some(link),
        }
        match before.and_then(|b| self.links.get_mut(b)) {
            Some(b) => b.prev = Some(link),
            None => self.tail = Some(link),
        }
    }

    /// Splice a link out, leaving it in the arena
    fn unplace(&mut self, link: LinkId) {
        let Some(l) = self.links.get_mut(link) else {
            return;
        };
        let (prev, next) = (l.prev.take(), l.next.take());
        match prev.and_then(|p| self.links.get_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.links.get_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }

    /// Remove a member; its link becomes stale for any cursor holding it
    fn remove(&mut self, object: NodeId) -> Option<Link> {
        let link = self.index.remove(&object)?;
        self.unplace(link);
        self.links.remove(link)
    }

    /// Empty the list, returning the unlink traps still registered on
    /// members
    fn reset(&mut self) -> Vec<TrapId> {
        let watches = self.watches();
        self.links.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        watches
    }

    fn watches(&self) -> Vec<TrapId> {
        self.links.values().filter_map(|l| l.watch).collect()
    }

    fn link_order(&self) -> Vec<LinkId> {
        let mut order = Vec::with_capacity(self.len());
        let mut current = self.head;
        while let Some(link) = current {
            order.push(link);
            current = self.links.get(link).and_then(|l| l.next);
        }
        order
    }

    fn relink(&mut self, order: &[LinkId]) {
        self.head = None;
        self.tail = None;
        for &link in order {
            if let Some(l) = self.links.get_mut(link) {
                l.prev = None;
                l.next = None;
            }
            self.place(link, None);
        }
    }

    /// Reorder the given members into the given relative order, moving as
    /// few links as possible; returns whether anything moved
    fn arrange(&mut self, order: &[NodeId]) -> bool {
        let mut anchor: Option<LinkId> = None;
        let mut moved = false;
        for object in order.iter().rev() {
            let Some(&link) = self.index.get(object) else {
                continue;
            };
            let next = self.links.get(link).and_then(|l| l.next);
            if next != anchor {
                self.unplace(link);
                self.place(link, anchor);
                moved = true;
            }
            anchor = Some(link);
        }
        moved
    }

    fn walk(&self, start: Option<LinkId>, forward: bool) -> Iter<'_> {
        Iter {
            state: Some(self),
            next: start,
            forward,
        }
    }
}

/// Borrowing iterator over list members
pub struct Iter<'g> {
    state: Option<&'g ListState>,
    next: Option<LinkId>,
    forward: bool,
}

impl Iterator for Iter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let link = self.state?.links.get(self.next?)?;
        self.next = if self.forward { link.next } else { link.prev };
        Some(link.object)
    }
}

/// Non-borrowing cursor over a list
///
/// The cursor advances past each member before yielding it, so removing the
/// yielded member (or any earlier one) is safe. Removing the member the
/// cursor is about to yield ends the iteration.
pub struct Cursor {
    list: NodeId,
    next: Option<LinkId>,
    started: bool,
}

impl Cursor {
    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        let state = list_state(graph, self.list)?;
        let link = if self.started {
            self.next?
        } else {
            self.started = true;
            state.head?
        };
        let link = state.links.get(link)?;
        self.next = link.next;
        Some(link.object)
    }
}

fn list_state(graph: &Graph, list: NodeId) -> Option<&ListState> {
    graph
        .nodes
        .get(list)
        .filter(|n| !n.unlinked)
        .and_then(|n| n.list.as_deref())
}

fn not_a_member() -> Error {
    Error::InvalidArgument("object is not in the list".into())
}

/// Handle to a list object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct List {
    id: NodeId,
}

impl List {
    /// Create an empty list object
    pub fn create(graph: &mut Graph) -> Self {
        let id = graph.create_of(LIST_CLASS);
        let propagate = graph.config.propagate_list_events;
        if let Some(node) = graph.nodes.get_mut(id) {
            node.list = Some(Box::new(ListState::new(propagate)));
            node.properties.insert(
                Rc::from(COUNT),
                Property::new(Value::from(0), Access::Sealed),
            );
        }
        // Members outliving the list drop their unlink traps
        let cleanup = Trap::new(|_, _| {}).on_unlink(move |graph| {
            let watches = graph
                .nodes
                .get(id)
                .and_then(|n| n.list.as_deref())
                .map(ListState::watches)
                .unwrap_or_default();
            for watch in watches {
                graph.remove_trap(watch);
            }
        });
        if let Err(err) = graph.add_trap(id, TrapKey::Origin, cleanup) {
            graph.report(err);
        }
        Self { id }
    }

    /// View an existing object as a list
    pub fn from_node(graph: &Graph, id: NodeId) -> Option<Self> {
        list_state(graph, id).map(|_| Self { id })
    }

    /// The list's own object
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn state<'g>(&self, graph: &'g Graph) -> Result<&'g ListState> {
        list_state(graph, self.id).ok_or(Error::ObjectUnlinked)
    }

    fn state_mut<'g>(&self, graph: &'g mut Graph) -> Result<&'g mut ListState> {
        graph
            .live_node_mut(self.id)?
            .list
            .as_deref_mut()
            .ok_or(Error::ObjectUnlinked)
    }

    fn sync_count(&self, graph: &mut Graph) {
        let count = self.count(graph);
        graph.write_silently(self.id, COUNT, Value::from(count));
    }

    fn check_insertable(&self, graph: &Graph, item: NodeId) -> Result<()> {
        let state = self.state(graph)?;
        if graph.is_unlinked(item) {
            return Err(Error::ObjectUnlinked);
        }
        if item == self.id {
            return Err(Error::InvalidArgument(
                "a list cannot contain itself".into(),
            ));
        }
        if let Some(class) = &state.restriction {
            let actual = graph.class_of(item);
            if actual != Some(&**class) {
                return Err(Error::ListRestriction(format!(
                    "expected {}, got {}",
                    class,
                    actual.unwrap_or("an unclassed object")
                )));
            }
        }
        if state.index.contains_key(&item) {
            return Err(Error::ListDuplicate);
        }
        if state.auto_attach {
            self.check_attachable(graph, item)?;
        }
        Ok(())
    }

    /// Rejects what [`Graph::attach`] would reject, before anything changes
    fn check_attachable(&self, graph: &Graph, item: NodeId) -> Result<()> {
        if graph.is_root(item) {
            return Err(Error::NoAttach("root objects cannot be attached".into()));
        }
        if graph.is_ancestor(item, self.id)? {
            return Err(Error::NoAttach(
                "a list cannot own one of its ancestors".into(),
            ));
        }
        Ok(())
    }

    fn attach_member(&self, graph: &mut Graph, item: NodeId, propagate: bool) -> Result<()> {
        let list = self.id;
        let mut listener = AttachListener::new().on_detach(move |graph, item| {
            List { id: list }.release(graph, item);
            Ok(())
        });
        if propagate {
            listener = listener.on_event(move |graph, event| {
                graph.emit_event(list, Event::propagated(Rc::new(event.clone()), list));
                Ok(())
            });
        }
        graph.attach_with(list, item, listener)?;
        Ok(())
    }

    /// A member left the list's ownership or was unlinked; drop it without
    /// unlinking
    fn release(&self, graph: &mut Graph, item: NodeId) {
        let Ok(state) = self.state_mut(graph) else {
            return;
        };
        if let Some(link) = state.remove(item) {
            if let Some(watch) = link.watch {
                graph.remove_trap(watch);
            }
            self.sync_count(graph);
            graph.emit_change(self.id, EVENT_REMOVE, item);
        }
    }

    /// Drop a member from the list when it gets unlinked
    fn watch_member(&self, graph: &mut Graph, item: NodeId) -> Result<TrapId> {
        let list = self.id;
        graph.add_trap(
            item,
            TrapKey::Origin,
            Trap::new(|_, _| {}).on_unlink(move |graph| List { id: list }.release(graph, item)),
        )
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Append an object
    pub fn add(&self, graph: &mut Graph, item: NodeId) -> Result<NodeId> {
        self.insert(graph, item, None)
    }

    pub fn add_all(&self, graph: &mut Graph, items: &[NodeId]) -> Result<()> {
        for &item in items {
            self.insert(graph, item, None)?;
        }
        Ok(())
    }

    /// Insert an object before `before`, or at the end
    ///
    /// When the list owns its members the object is attached first, so a
    /// failed attachment leaves the list unchanged.
    pub fn insert(&self, graph: &mut Graph, item: NodeId, before: Option<NodeId>) -> Result<NodeId> {
        self.check_insertable(graph, item)?;
        if let Some(before) = before {
            if !self.includes(graph, before) {
                return Err(not_a_member());
            }
        }
        let (owned, propagate) = {
            let state = self.state(graph)?;
            (state.auto_attach, state.propagate)
        };
        let watch = if owned {
            self.attach_member(graph, item, propagate)?;
            None
        } else {
            Some(self.watch_member(graph, item)?)
        };

        let state = self.state_mut(graph)?;
        if state.index.contains_key(&item) {
            if let Some(watch) = watch {
                graph.remove_trap(watch);
            }
            return Err(Error::ListDuplicate);
        }
        let anchor = before.and_then(|b| state.index.get(&b).copied());
        state.push(item, anchor, watch);
        self.sync_count(graph);
        graph.emit_change(self.id, EVENT_ADD, item);
        Ok(item)
    }

    /// Remove a member, unlinking it if the list owns it
    pub fn remove(&self, graph: &mut Graph, item: NodeId) -> Result<()> {
        let state = self.state_mut(graph)?;
        let Some(link) = state.remove(item) else {
            return Err(not_a_member());
        };
        let owned = state.auto_attach;
        if let Some(watch) = link.watch {
            graph.remove_trap(watch);
        }
        self.sync_count(graph);
        if owned && graph.origin(item) == Some(self.id) {
            graph.unlink(item);
        }
        graph.emit_change(self.id, EVENT_REMOVE, item);
        Ok(())
    }

    /// Remove the members from `start` through `end` (inclusive, defaults to
    /// `start`) and insert `items` in their place
    ///
    /// Without `start` nothing is removed and `items` are appended. Items
    /// must not already be members, including members of the removed range.
    pub fn splice(
        &self,
        graph: &mut Graph,
        start: Option<NodeId>,
        end: Option<NodeId>,
        items: &[NodeId],
    ) -> Result<()> {
        let removed = match (start, end) {
            (Some(start), end) => self.range(graph, start, end.unwrap_or(start))?,
            (None, Some(_)) => {
                return Err(Error::InvalidArgument("range end without a start".into()))
            }
            (None, None) => Vec::new(),
        };
        let mut seen = FxHashSet::default();
        for &item in items {
            self.check_insertable(graph, item)?;
            if !seen.insert(item) {
                return Err(Error::ListDuplicate);
            }
        }

        let anchor = removed.last().and_then(|&last| self.next_of(graph, last));
        for item in removed {
            self.remove(graph, item)?;
        }
        for &item in items {
            self.insert(graph, item, anchor)?;
        }
        Ok(())
    }

    /// Put `new` where `old` is
    pub fn replace_object(&self, graph: &mut Graph, old: NodeId, new: NodeId) -> Result<()> {
        if !self.includes(graph, old) {
            return Err(not_a_member());
        }
        if old == new {
            return Ok(());
        }
        self.insert(graph, new, Some(old))?;
        self.remove(graph, old)
    }

    /// Make the list contain exactly `items`, in that order
    ///
    /// Members missing from `items` are removed, members present are moved
    /// into place and new objects are inserted. Repeated objects in `items`
    /// keep their first position. Emits `Remove` and `Add` for each removed
    /// and inserted object and a single `Change` if existing members were
    /// reordered; nothing at all when the order is already right.
    pub fn replace_all(&self, graph: &mut Graph, items: &[NodeId]) -> Result<()> {
        let mut seen = FxHashSet::default();
        let items: Vec<NodeId> = items.iter().copied().filter(|i| seen.insert(*i)).collect();
        let current = self.state(graph)?.walk_all();
        for &item in &items {
            if !self.includes(graph, item) {
                self.check_insertable(graph, item)?;
            }
        }
        if items == current {
            return Ok(());
        }

        for member in current {
            if !seen.contains(&member) && self.includes(graph, member) {
                self.remove(graph, member)?;
            }
        }

        if self.state_mut(graph)?.arrange(&items) {
            graph.emit_change(self.id, EVENT_CHANGE, Value::Undefined);
        }

        let mut anchors = vec![None; items.len()];
        let mut anchor = None;
        for (i, &item) in items.iter().enumerate().rev() {
            if self.includes(graph, item) {
                anchor = Some(item);
            } else {
                anchors[i] = anchor;
            }
        }
        for (i, &item) in items.iter().enumerate() {
            if !self.includes(graph, item) {
                self.insert(graph, item, anchors[i])?;
            }
        }
        Ok(())
    }

    /// Remove every member with a single `Clear` event
    pub fn clear(&self, graph: &mut Graph) -> Result<()> {
        let state = self.state_mut(graph)?;
        if state.len() == 0 {
            return Ok(());
        }
        let members = state.walk_all();
        let owned = state.auto_attach;
        let watches = state.reset();
        for watch in watches {
            graph.remove_trap(watch);
        }
        self.sync_count(graph);
        if owned {
            for member in members {
                if graph.origin(member) == Some(self.id) {
                    graph.unlink(member);
                }
            }
        }
        graph.emit_change(self.id, EVENT_CLEAR, Value::Undefined);
        Ok(())
    }

    pub fn reverse(&self, graph: &mut Graph) -> Result<()> {
        let state = self.state_mut(graph)?;
        let mut order = state.link_order();
        if order.len() < 2 {
            return Ok(());
        }
        order.reverse();
        state.relink(&order);
        graph.emit_change(self.id, EVENT_CHANGE, Value::Undefined);
        Ok(())
    }

    /// Stable sort with a comparator that may read the graph
    ///
    /// `compare` must implement a total order; an inconsistent comparator
    /// may panic.
    pub fn sort<F>(&self, graph: &mut Graph, mut compare: F) -> Result<()>
    where
        F: FnMut(&Graph, NodeId, NodeId) -> Ordering,
    {
        let current = self.state(graph)?.walk_all();
        let mut sorted = current.clone();
        let view: &Graph = graph;
        sorted.sort_by(|a, b| compare(view, *a, *b));
        if sorted == current {
            return Ok(());
        }
        let state = self.state_mut(graph)?;
        let order: Vec<LinkId> = sorted
            .iter()
            .filter_map(|o| state.index.get(o).copied())
            .collect();
        state.relink(&order);
        graph.emit_change(self.id, EVENT_CHANGE, Value::Undefined);
        Ok(())
    }

    /// Only accept objects created with `class`
    pub fn restrict(&self, graph: &mut Graph, class: &str) -> Result<()> {
        let state = self.state(graph)?;
        match state.restriction.as_deref() {
            Some(existing) if existing == class => return Ok(()),
            Some(existing) => {
                return Err(Error::InvalidArgument(format!(
                    "list is already restricted to {}",
                    existing
                )))
            }
            None => {}
        }
        if let Some(member) = state
            .walk(state.head, true)
            .find(|m| graph.class_of(*m) != Some(class))
        {
            return Err(Error::ListRestriction(format!(
                "member {:?} is not a {}",
                member, class
            )));
        }
        self.state_mut(graph)?.restriction = Some(Rc::from(class));
        Ok(())
    }

    /// Switch ownership of members on or off
    ///
    /// Enabling attaches every current member and makes future additions
    /// owned too; member events are re-emitted on the list unless
    /// `suppress_propagation` is set or propagation is disabled in the
    /// graph's configuration. Enabling twice or disabling a non-empty list
    /// fails.
    pub fn attach_all(&self, graph: &mut Graph, enable: bool, suppress_propagation: bool) -> Result<()> {
        let configured = graph.config.propagate_list_events;
        let state = self.state_mut(graph)?;
        if !enable {
            if state.auto_attach && state.len() > 0 {
                return Err(Error::InvalidArgument(
                    "cannot release ownership of a non-empty list".into(),
                ));
            }
            state.auto_attach = false;
            return Ok(());
        }
        if state.auto_attach {
            return Err(Error::InvalidArgument("list already owns its members".into()));
        }
        let propagate = configured && !suppress_propagation;
        let members = state.walk_all();
        for &member in &members {
            self.check_attachable(graph, member)?;
        }
        for &member in &members {
            self.attach_member(graph, member, propagate)?;
        }

        // Owned members are released through their attach listeners
        let state = self.state_mut(graph)?;
        state.auto_attach = true;
        state.propagate = propagate;
        let watches: Vec<TrapId> = state
            .links
            .values_mut()
            .filter_map(|l| l.watch.take())
            .collect();
        for watch in watches {
            graph.remove_trap(watch);
        }
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn count(&self, graph: &Graph) -> usize {
        list_state(graph, self.id).map_or(0, |s| s.len())
    }

    pub fn is_empty(&self, graph: &Graph) -> bool {
        self.count(graph) == 0
    }

    pub fn first(&self, graph: &Graph) -> Option<NodeId> {
        let state = list_state(graph, self.id)?;
        state.walk(state.head, true).next()
    }

    pub fn last(&self, graph: &Graph) -> Option<NodeId> {
        let state = list_state(graph, self.id)?;
        state.walk(state.tail, false).next()
    }

    /// Member at `index`, walking from whichever end is closer
    pub fn get(&self, graph: &Graph, index: usize) -> Result<NodeId> {
        let state = self.state(graph)?;
        let len = state.len();
        if index >= len {
            return Err(Error::InvalidArgument(format!(
                "index {} out of range for a list of {}",
                index, len
            )));
        }
        let found = if index < len / 2 {
            state.walk(state.head, true).nth(index)
        } else {
            state.walk(state.tail, false).nth(len - 1 - index)
        };
        found.ok_or_else(|| Error::InvalidArgument(format!("index {} not reachable", index)))
    }

    /// Up to `n` members starting at `from` (inclusive) or the head
    pub fn take(&self, graph: &Graph, n: usize, from: Option<NodeId>) -> Result<Vec<NodeId>> {
        let state = self.state(graph)?;
        let start = match from {
            Some(from) => Some(*state.index.get(&from).ok_or_else(not_a_member)?),
            None => state.head,
        };
        Ok(state.walk(start, true).take(n).collect())
    }

    /// Up to `n` members ending at `to` (inclusive) or the tail, in list order
    pub fn take_last(&self, graph: &Graph, n: usize, to: Option<NodeId>) -> Result<Vec<NodeId>> {
        let state = self.state(graph)?;
        let start = match to {
            Some(to) => Some(*state.index.get(&to).ok_or_else(not_a_member)?),
            None => state.tail,
        };
        let mut items: Vec<NodeId> = state.walk(start, false).take(n).collect();
        items.reverse();
        Ok(items)
    }

    pub fn index_of(&self, graph: &Graph, item: NodeId) -> Option<usize> {
        if !self.includes(graph, item) {
            return None;
        }
        self.iter(graph).position(|m| m == item)
    }

    pub fn includes(&self, graph: &Graph, item: NodeId) -> bool {
        list_state(graph, self.id).is_some_and(|s| s.index.contains_key(&item))
    }

    pub fn find<F>(&self, graph: &Graph, mut predicate: F) -> Option<NodeId>
    where
        F: FnMut(&Graph, NodeId) -> bool,
    {
        self.iter(graph).find(|m| predicate(graph, *m))
    }

    pub fn some<F>(&self, graph: &Graph, mut predicate: F) -> bool
    where
        F: FnMut(&Graph, NodeId) -> bool,
    {
        self.iter(graph).any(|m| predicate(graph, m))
    }

    pub fn every<F>(&self, graph: &Graph, mut predicate: F) -> bool
    where
        F: FnMut(&Graph, NodeId) -> bool,
    {
        self.iter(graph).all(|m| predicate(graph, m))
    }

    /// Visit every member; the callback may mutate the graph and the list
    pub fn for_each<F>(&self, graph: &mut Graph, mut f: F)
    where
        F: FnMut(&mut Graph, NodeId),
    {
        let mut cursor = self.cursor();
        while let Some(member) = cursor.next(graph) {
            f(graph, member);
        }
    }

    pub fn map<T, F>(&self, graph: &Graph, mut f: F) -> Vec<T>
    where
        F: FnMut(&Graph, NodeId) -> T,
    {
        self.iter(graph).map(|m| f(graph, m)).collect()
    }

    pub fn filter<F>(&self, graph: &Graph, mut predicate: F) -> Vec<NodeId>
    where
        F: FnMut(&Graph, NodeId) -> bool,
    {
        self.iter(graph).filter(|m| predicate(graph, *m)).collect()
    }

    pub fn to_vec(&self, graph: &Graph) -> Vec<NodeId> {
        self.iter(graph).collect()
    }

    /// Fresh cursor starting at the head
    pub fn cursor(&self) -> Cursor {
        Cursor {
            list: self.id,
            next: None,
            started: false,
        }
    }

    pub fn iter<'g>(&self, graph: &'g Graph) -> Iter<'g> {
        match list_state(graph, self.id) {
            Some(state) => state.walk(state.head, true),
            None => Iter {
                state: None,
                next: None,
                forward: true,
            },
        }
    }

    fn range(&self, graph: &Graph, start: NodeId, end: NodeId) -> Result<Vec<NodeId>> {
        let state = self.state(graph)?;
        let link = *state.index.get(&start).ok_or_else(not_a_member)?;
        let mut range = Vec::new();
        for member in state.walk(Some(link), true) {
            range.push(member);
            if member == end {
                return Ok(range);
            }
        }
        Err(Error::InvalidArgument(
            "range end does not follow its start".into(),
        ))
    }

    fn next_of(&self, graph: &Graph, item: NodeId) -> Option<NodeId> {
        let state = list_state(graph, self.id)?;
        let link = state.links.get(*state.index.get(&item)?)?;
        state.walk(link.next, true).next()
    }
}

impl ListState {
    fn walk_all(&self) -> Vec<NodeId> {
        self.walk(self.head, true).collect()
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::Node(list.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder(graph: &mut Graph, list: List) -> Rc<RefCell<Vec<String>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        graph
            .listen(list.id(), move |_, event| {
                sink.borrow_mut().push(event.name().to_string());
                Ok(())
            })
            .unwrap();
        events
    }

    fn nodes(graph: &mut Graph, n: usize) -> Vec<NodeId> {
        (0..n).map(|_| graph.create()).collect()
    }

    #[test]
    fn test_insert_order_and_errors() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 3);
        let (a, b, c) = (items[0], items[1], items[2]);

        list.add(&mut graph, a).unwrap();
        list.add(&mut graph, c).unwrap();
        list.insert(&mut graph, b, Some(c)).unwrap();
        assert_eq!(list.to_vec(&graph), vec![a, b, c]);
        assert_eq!(graph.get(list.id(), COUNT), Value::from(3));

        assert!(matches!(list.add(&mut graph, a), Err(Error::ListDuplicate)));
        let outsider = graph.create();
        let stranger = graph.create();
        assert!(matches!(
            list.insert(&mut graph, outsider, Some(stranger)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            list.add(&mut graph, list.id()),
            Err(Error::InvalidArgument(_))
        ));
        graph.unlink(outsider);
        assert!(matches!(
            list.add(&mut graph, outsider),
            Err(Error::ObjectUnlinked)
        ));
        assert_eq!(list.count(&graph), 3);
    }

    #[test]
    fn test_restriction() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let row = graph.create_of("Row");
        let plain = graph.create();

        list.restrict(&mut graph, "Row").unwrap();
        list.add(&mut graph, row).unwrap();
        assert!(matches!(
            list.add(&mut graph, plain),
            Err(Error::ListRestriction(_))
        ));
        assert!(list.restrict(&mut graph, "Other").is_err());

        let loose = List::create(&mut graph);
        loose.add(&mut graph, plain).unwrap();
        assert!(matches!(
            loose.restrict(&mut graph, "Row"),
            Err(Error::ListRestriction(_))
        ));
    }

    #[test]
    fn test_get_take_take_last() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 5);
        list.add_all(&mut graph, &items).unwrap();

        for (i, item) in items.iter().enumerate() {
            assert_eq!(list.get(&graph, i).unwrap(), *item);
        }
        assert!(list.get(&graph, 5).is_err());

        assert_eq!(list.take(&graph, 2, None).unwrap(), items[..2].to_vec());
        assert_eq!(
            list.take(&graph, 10, Some(items[3])).unwrap(),
            items[3..].to_vec()
        );
        assert_eq!(list.take_last(&graph, 2, None).unwrap(), items[3..].to_vec());
        assert_eq!(
            list.take_last(&graph, 3, Some(items[1])).unwrap(),
            items[..2].to_vec()
        );
        assert_eq!(list.first(&graph), Some(items[0]));
        assert_eq!(list.last(&graph), Some(items[4]));
        assert_eq!(list.index_of(&graph, items[2]), Some(2));
    }

    #[test]
    fn test_remove_during_cursor() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 4);
        list.add_all(&mut graph, &items).unwrap();

        let mut visited = Vec::new();
        list.for_each(&mut graph, |graph, member| {
            visited.push(member);
            list.remove(graph, member).unwrap();
        });
        assert_eq!(visited, items);
        assert!(list.is_empty(&graph));
    }

    #[test]
    fn test_cursor_ends_on_removed_next() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 3);
        list.add_all(&mut graph, &items).unwrap();

        let mut cursor = list.cursor();
        assert_eq!(cursor.next(&graph), Some(items[0]));
        list.remove(&mut graph, items[1]).unwrap();
        assert_eq!(cursor.next(&graph), None);

        // A fresh cursor restarts from the head
        let mut cursor = list.cursor();
        assert_eq!(cursor.next(&graph), Some(items[0]));
        assert_eq!(cursor.next(&graph), Some(items[2]));
    }

    #[test]
    fn test_splice_and_replace_object() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 4);
        list.add_all(&mut graph, &items).unwrap();
        let fresh = nodes(&mut graph, 2);

        list.splice(&mut graph, Some(items[1]), Some(items[2]), &fresh)
            .unwrap();
        assert_eq!(
            list.to_vec(&graph),
            vec![items[0], fresh[0], fresh[1], items[3]]
        );

        let other = graph.create();
        list.replace_object(&mut graph, items[0], other).unwrap();
        assert_eq!(list.first(&graph), Some(other));
        assert!(!list.includes(&graph, items[0]));

        assert!(list
            .splice(&mut graph, Some(items[3]), Some(fresh[0]), &[])
            .is_err());
    }

    #[test]
    fn test_clear_emits_once() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 3);
        list.add_all(&mut graph, &items).unwrap();
        let events = recorder(&mut graph, list);

        list.clear(&mut graph).unwrap();
        assert_eq!(*events.borrow(), vec![EVENT_CLEAR]);
        assert_eq!(list.count(&graph), 0);
        assert!(!graph.is_unlinked(items[0]));
    }

    #[test]
    fn test_reverse_and_sort() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 3);
        for (i, item) in items.iter().enumerate() {
            graph.set(*item, "rank", i as i32).unwrap();
        }
        list.add_all(&mut graph, &items).unwrap();
        let events = recorder(&mut graph, list);

        list.reverse(&mut graph).unwrap();
        assert_eq!(list.to_vec(&graph), vec![items[2], items[1], items[0]]);
        assert_eq!(list.last(&graph), Some(items[0]));

        list.sort(&mut graph, |g, a, b| {
            g.get(a, "rank")
                .to_number()
                .total_cmp(&g.get(b, "rank").to_number())
        })
        .unwrap();
        assert_eq!(list.to_vec(&graph), items);
        assert_eq!(*events.borrow(), vec![EVENT_CHANGE, EVENT_CHANGE]);
    }

    #[test]
    fn test_owned_members_unlink_on_remove() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        list.attach_all(&mut graph, true, false).unwrap();
        let item = graph.create();
        list.add(&mut graph, item).unwrap();
        assert_eq!(graph.origin(item), Some(list.id()));

        assert!(list.attach_all(&mut graph, true, false).is_err());
        assert!(list.attach_all(&mut graph, false, false).is_err());

        list.remove(&mut graph, item).unwrap();
        assert!(graph.is_unlinked(item));
        list.attach_all(&mut graph, false, false).unwrap();
    }

    #[test]
    fn test_owned_member_detach_releases() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let item = graph.create();
        list.add(&mut graph, item).unwrap();
        list.attach_all(&mut graph, true, false).unwrap();
        let events = recorder(&mut graph, list);

        graph.detach(item).unwrap();
        assert!(!list.includes(&graph, item));
        assert!(!graph.is_unlinked(item));
        assert_eq!(*events.borrow(), vec![EVENT_REMOVE]);
    }

    #[test]
    fn test_member_events_propagate_with_provenance() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        list.attach_all(&mut graph, true, false).unwrap();
        let item = graph.create();
        list.add(&mut graph, item).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        graph
            .listen(list.id(), move |_, event| {
                sink.borrow_mut().push((event.name().to_string(), event.emitter()));
                Ok(())
            })
            .unwrap();
        graph.emit(item, "Clicked", Value::Undefined);
        assert_eq!(*seen.borrow(), vec![("Clicked".to_string(), item)]);
    }

    #[test]
    fn test_suppressed_propagation() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        list.attach_all(&mut graph, true, true).unwrap();
        let item = graph.create();
        list.add(&mut graph, item).unwrap();
        let events = recorder(&mut graph, list);
        graph.emit(item, "Clicked", Value::Undefined);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_unlinking_list_unlinks_owned_members() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        list.attach_all(&mut graph, true, false).unwrap();
        let items = nodes(&mut graph, 2);
        list.add_all(&mut graph, &items).unwrap();

        graph.unlink(list.id());
        assert!(items.iter().all(|i| graph.is_unlinked(*i)));
        assert!(list.to_vec(&graph).is_empty());
        let late = graph.create();
        assert!(matches!(
            list.add(&mut graph, late),
            Err(Error::ObjectUnlinked)
        ));
    }

    #[test]
    fn test_unlinked_member_leaves_plain_list() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 2);
        list.add_all(&mut graph, &items).unwrap();
        let events = recorder(&mut graph, list);

        graph.unlink(items[0]);
        assert!(!list.includes(&graph, items[0]));
        assert_eq!(list.to_vec(&graph), vec![items[1]]);
        assert_eq!(list.get(&graph, 0).unwrap(), items[1]);
        assert_eq!(graph.get(list.id(), COUNT), Value::from(1));
        assert_eq!(*events.borrow(), vec![EVENT_REMOVE]);
    }

    #[test]
    fn test_member_unlink_traps_are_dropped() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let items = nodes(&mut graph, 3);
        list.add_all(&mut graph, &items).unwrap();
        assert_eq!(graph.trap_count(items[0], &TrapKey::Origin), 1);

        list.remove(&mut graph, items[0]).unwrap();
        assert_eq!(graph.trap_count(items[0], &TrapKey::Origin), 0);

        list.clear(&mut graph).unwrap();
        assert_eq!(graph.trap_count(items[1], &TrapKey::Origin), 0);

        list.add(&mut graph, items[2]).unwrap();
        graph.unlink(list.id());
        assert_eq!(graph.trap_count(items[2], &TrapKey::Origin), 0);
        assert!(!graph.is_unlinked(items[2]));
    }

    #[test]
    fn test_owning_drops_member_unlink_traps() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let item = graph.create();
        list.add(&mut graph, item).unwrap();
        list.attach_all(&mut graph, true, false).unwrap();
        // Only the attach listener remains
        assert_eq!(graph.trap_count(item, &TrapKey::Origin), 1);

        graph.unlink(item);
        assert!(list.is_empty(&graph));
    }

    #[test]
    fn test_replace_all_rejects_unattachable_items_first() {
        let mut graph = Graph::new();
        let holder = graph.create();
        let list = List::create(&mut graph);
        graph.attach(holder, list.id()).unwrap();
        list.attach_all(&mut graph, true, false).unwrap();
        let items = nodes(&mut graph, 2);
        list.add_all(&mut graph, &items).unwrap();

        let root = graph.create_root();
        assert!(matches!(
            list.replace_all(&mut graph, &[root]),
            Err(Error::NoAttach(_))
        ));
        assert!(matches!(
            list.replace_all(&mut graph, &[items[1], holder]),
            Err(Error::NoAttach(_))
        ));
        assert_eq!(list.to_vec(&graph), items);
        assert!(items.iter().all(|i| !graph.is_unlinked(*i)));
        assert!(matches!(
            list.splice(&mut graph, Some(items[0]), None, &[root]),
            Err(Error::NoAttach(_))
        ));
        assert_eq!(list.to_vec(&graph), items);
    }

    #[test]
    fn test_attach_all_failure_leaves_list_unowned() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let plain = graph.create();
        let root = graph.create_root();
        list.add_all(&mut graph, &[plain, root]).unwrap();

        assert!(matches!(
            list.attach_all(&mut graph, true, false),
            Err(Error::NoAttach(_))
        ));
        assert_eq!(graph.origin(plain), None);

        let late = graph.create();
        list.add(&mut graph, late).unwrap();
        assert_eq!(graph.origin(late), None);
        list.remove(&mut graph, late).unwrap();
        assert!(!graph.is_unlinked(late));
    }
}
