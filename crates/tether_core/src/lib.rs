//! Tether Core Runtime
//!
//! This crate provides a reactive object graph for application frameworks:
//!
//! - **Attachment Graph**: Single-owner, acyclic ownership tree with cascading unlink
//! - **Trap Registry**: Observers on property writes, events and origin changes
//! - **Events**: Emit, listen (callback, listener object or async stream) and intercept
//! - **Observable Lists**: Ordered, duplicate-free collections with O(1) membership
//! - **Path Bindings**: Live subscriptions that track a property path through the tree
//!
//! Everything is single-threaded: objects live in a [`Graph`] arena and are
//! addressed by [`NodeId`] handles. Callbacks receive `&mut Graph` and may
//! mutate it freely; dispatch works on snapshots.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{Graph, Value};
//!
//! let mut graph = Graph::new();
//! let page = graph.create();
//! let model = graph.create();
//! graph.define(model, "y", 1).unwrap();
//! graph.define(page, "x", model).unwrap();
//!
//! // Bind `z` on a detached object to the path `x.y`
//! let target = graph.create();
//! graph.bind(target, "z", "x.y").unwrap();
//! assert_eq!(graph.get(target, "z"), Value::Undefined);
//!
//! // Attaching resolves the path through the new origin
//! graph.attach(page, target).unwrap();
//! assert_eq!(graph.get(target, "z"), Value::from(1));
//!
//! graph.set(model, "y", 2).unwrap();
//! assert_eq!(graph.get(target, "z"), Value::from(2));
//!
//! graph.detach(target).unwrap();
//! assert_eq!(graph.get(target, "z"), Value::Undefined);
//! ```

pub mod binding;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod graph;
pub mod list;
pub mod trap;
pub mod value;


pub use binding::{BindHandle, Binding, BindingOptions, BoundId, MapFn, Sink};
pub use config::{GraphConfig, DEFAULT_MAX_DEPTH};
pub use emitter::{EventStream, Forward, InterceptFn, Listener, Stop};
pub use error::{Error, HandlerResult, Result};
pub use event::{Event, EventHandler, EventKind};
pub use graph::{AttachListener, Graph, NodeId, RESERVED_PREFIX};
pub use list::{Cursor, Iter as ListIter, List};
pub use trap::{Trap, TrapId, TrapKey, Trigger};
pub use value::Value;

/// Prelude module - import everything commonly needed
pub mod prelude {
    pub use crate::binding::{Binding, BindingOptions, Sink};
    pub use crate::emitter::Listener;
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::graph::{AttachListener, Graph, NodeId};
    pub use crate::list::List;
    pub use crate::value::Value;
}
