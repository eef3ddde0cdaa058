//! Path bindings
//!
//! A [`Binding`] is an immutable description of a value to track: a dotted
//! property path (`"x.y"`), an optional label restricting which ancestor may
//! serve as the source, an optional default and a chain of filters.
//! Bindings can also be combined with [`Binding::and`], [`Binding::or`] and
//! [`Binding::equals`], or composed into text with [`Binding::format`].
//!
//! Binding a descriptor to a target object with [`Binding::bind_to`] starts a
//! live, one-way subscription. The first path segment is looked up on the
//! target's origin, then on the origin's origin and so on until an object
//! carrying it is found; the rest of the path is followed through nested
//! objects. The subscription re-resolves whenever the target or one of its
//! ancestors moves, and whenever any property along the path changes.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{Binding, Graph, Value};
//!
//! let mut graph = Graph::new();
//! let view = graph.create();
//! let model = graph.create();
//! graph.define(model, "title", "Hello").unwrap();
//! graph.define(view, "model", model).unwrap();
//!
//! let label = graph.create();
//! Binding::new("model.title")
//!     .as_string()
//!     .bind_to(&mut graph, label, "text")
//!     .unwrap();
//! assert_eq!(graph.get(label, "text"), Value::Undefined);
//!
//! graph.attach(view, label).unwrap();
//! assert_eq!(graph.get(label, "text"), Value::from("Hello"));
//!
//! graph.set(model, "title", "Bye").unwrap();
//! assert_eq!(graph.get(label, "text"), Value::from("Bye"));
//! ```

mod bound;
mod compose;
mod filter;

pub use bound::{BindHandle, BoundId};
pub use filter::MapFn;

pub(crate) use bound::Bound;

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, HandlerResult, Result};
use crate::graph::{Graph, NodeId};
use crate::value::Value;

use bound::Output;
use compose::Combinator;
use filter::{quoted, Filter};

/// Where a bound value goes
#[derive(Clone)]
pub struct Sink(pub(crate) SinkKind);

#[derive(Clone)]
pub(crate) enum SinkKind {
    /// Write a property on the target
    Property(Rc<str>),
    /// Call a user callback
    Callback(Rc<dyn Fn(&mut Graph, &Value) -> HandlerResult>),
    /// Feed a combinator or format operand
    Internal(Rc<dyn Fn(&mut Graph, Value)>),
}

impl Sink {
    pub fn property(name: &str) -> Self {
        Sink(SinkKind::Property(Rc::from(name)))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut Graph, &Value) -> HandlerResult + 'static,
    {
        Sink(SinkKind::Callback(Rc::new(f)))
    }

    pub(crate) fn internal<F>(f: F) -> Self
    where
        F: Fn(&mut Graph, Value) + 'static,
    {
        Sink(SinkKind::Internal(Rc::new(f)))
    }
}

impl From<&str> for Sink {
    fn from(name: &str) -> Self {
        Sink::property(name)
    }
}

/// Structured binding construction
#[derive(Clone, Debug, Default)]
pub struct BindingOptions {
    /// Dotted property path
    pub path: String,
    /// Value used while the path yields `undefined`
    pub default: Option<Value>,
    /// Only ancestors with this label may serve as source
    pub label: Option<String>,
    /// Path prepended to `path`
    pub prefix: Option<String>,
}

impl BindingOptions {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }
}

#[derive(Clone)]
pub(crate) enum Source {
    Path(Rc<[Rc<str>]>),
    Combine {
        op: Combinator,
        left: Binding,
        right: Binding,
    },
    Format {
        template: Rc<str>,
        /// Literal text around the placeholders; one more than `operands`
        parts: Rc<[Rc<str>]>,
        operands: Rc<[Binding]>,
    },
}

#[derive(Clone)]
pub(crate) struct BindingSpec {
    pub(crate) source: Source,
    pub(crate) label: Option<Rc<str>>,
    pub(crate) default: Value,
    pub(crate) filters: Vec<Filter>,
}

/// Immutable binding descriptor
///
/// Filter methods return a new descriptor, leaving the original usable.
#[derive(Clone)]
pub struct Binding {
    spec: Rc<BindingSpec>,
}

impl Binding {
    /// Bind to a dotted property path
    pub fn new(path: &str) -> Self {
        Self::from_source(Source::Path(split_path(None, path)), None, Value::Undefined)
    }

    pub fn with_options(options: BindingOptions) -> Self {
        Self::from_source(
            Source::Path(split_path(options.prefix.as_deref(), &options.path)),
            options.label.as_deref().map(Rc::from),
            options.default.unwrap_or_default(),
        )
    }

    /// Compose text from `%[path]` placeholders
    ///
    /// Each placeholder becomes a binding; `%%` is a literal percent sign.
    pub fn format(template: &str) -> Self {
        Self::format_with(template, Vec::new())
    }

    /// Compose text from `%[path]` placeholders and `%s` placeholders that
    /// take the given bindings in order
    ///
    /// Missing `%s` operands render as empty text.
    pub fn format_with(template: &str, bindings: Vec<Binding>) -> Self {
        let (parts, operands) = compose::parse_template(template, bindings);
        Self::from_source(
            Source::Format {
                template: Rc::from(template),
                parts: parts.into(),
                operands: operands.into(),
            },
            None,
            Value::Undefined,
        )
    }

    fn from_source(source: Source, label: Option<Rc<str>>, default: Value) -> Self {
        Self {
            spec: Rc::new(BindingSpec {
                source,
                label,
                default,
                filters: Vec::new(),
            }),
        }
    }

    fn filtered(mut self, filter: Filter) -> Self {
        Rc::make_mut(&mut self.spec).filters.push(filter);
        self
    }

    /// Only ancestors with this label may serve as source
    pub fn label(mut self, label: &str) -> Self {
        Rc::make_mut(&mut self.spec).label = Some(Rc::from(label));
        self
    }

    /// Value used while the source yields `undefined`
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        Rc::make_mut(&mut self.spec).default = value.into();
        self
    }

    pub fn as_string(self) -> Self {
        self.filtered(Filter::AsString)
    }

    pub fn as_number(self) -> Self {
        self.filtered(Filter::AsNumber)
    }

    pub fn as_boolean(self) -> Self {
        self.filtered(Filter::AsBoolean)
    }

    /// Lists become the sequence of their members
    pub fn as_list(self) -> Self {
        self.filtered(Filter::AsList)
    }

    pub fn not(self) -> Self {
        self.filtered(Filter::Not)
    }

    /// Translate text through the graph's localizer
    pub fn local(self) -> Self {
        self.filtered(Filter::Local)
    }

    /// `yes` for truthy values, `no` otherwise
    pub fn select(self, yes: impl Into<Value>, no: impl Into<Value>) -> Self {
        self.filtered(Filter::Select(yes.into(), no.into()))
    }

    /// Replace falsy values
    pub fn else_value(self, fallback: impl Into<Value>) -> Self {
        self.filtered(Filter::Else(fallback.into()))
    }

    /// `true` if the value equals one of `values`
    pub fn matches<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filtered(Filter::Matches(values.into()))
    }

    /// Log every value passing through at debug level
    pub fn debug(self) -> Self {
        self.filtered(Filter::Debug)
    }

    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.filtered(Filter::Map(Rc::new(f)))
    }

    /// `other` if this value is truthy, otherwise this value
    pub fn and(self, other: impl Into<Binding>) -> Self {
        self.combine(Combinator::And, other.into())
    }

    /// This value if truthy, otherwise `other`
    pub fn or(self, other: impl Into<Binding>) -> Self {
        self.combine(Combinator::Or, other.into())
    }

    /// Whether both values are equal
    pub fn equals(self, other: impl Into<Binding>) -> Self {
        self.combine(Combinator::Equals, other.into())
    }

    fn combine(self, op: Combinator, other: Binding) -> Self {
        Self::from_source(
            Source::Combine {
                op,
                left: self,
                right: other,
            },
            None,
            Value::Undefined,
        )
    }

    /// Start tracking this binding on `target`
    ///
    /// The sink is updated right away (with `undefined` if the path cannot
    /// be resolved yet) and again whenever the tracked value changes.
    pub fn bind_to(&self, graph: &mut Graph, target: NodeId, sink: impl Into<Sink>) -> Result<BindHandle> {
        self.bind_inner(graph, target, None, sink.into())
    }

    /// Track this binding against a fixed origin instead of the target's
    /// ancestors
    ///
    /// The binding never re-resolves when objects move; if `origin` lacks
    /// the first path segment the failure is reported.
    pub fn bind_pinned(
        &self,
        graph: &mut Graph,
        target: NodeId,
        origin: NodeId,
        sink: impl Into<Sink>,
    ) -> Result<BindHandle> {
        graph.live_node(origin)?;
        self.bind_inner(graph, target, Some(origin), sink.into())
    }

    fn bind_inner(
        &self,
        graph: &mut Graph,
        target: NodeId,
        pinned: Option<NodeId>,
        sink: Sink,
    ) -> Result<BindHandle> {
        graph.live_node(target)?;
        self.validate()?;
        let mut handle = BindHandle::default();
        self.install(graph, target, pinned, sink, &mut handle);
        Ok(handle)
    }

    fn validate(&self) -> Result<()> {
        match &self.spec.source {
            Source::Path(path) => {
                if path.is_empty() || path.iter().any(|s| s.is_empty()) {
                    return Err(Error::InvalidArgument(format!("malformed binding path in {}", self)));
                }
                Ok(())
            }
            Source::Combine { left, right, .. } => {
                left.validate()?;
                right.validate()
            }
            Source::Format { operands, .. } => operands.iter().try_for_each(Binding::validate),
        }
    }

    pub(crate) fn install(
        &self,
        graph: &mut Graph,
        target: NodeId,
        pinned: Option<NodeId>,
        sink: Sink,
        handle: &mut BindHandle,
    ) {
        let spec = &self.spec;
        let output = Rc::new(Output::new(
            target,
            sink.0,
            spec.filters.clone(),
            spec.default.clone(),
            Rc::from(self.to_string()),
        ));
        match &spec.source {
            Source::Path(path) => {
                let id = graph.install_path(target, path.clone(), spec.label.clone(), pinned, output);
                handle.push(id);
            }
            Source::Combine { op, left, right } => {
                compose::install_combine(graph, *op, left, right, target, pinned, output, handle);
            }
            Source::Format { parts, operands, .. } => {
                compose::install_format(graph, parts.clone(), operands, target, pinned, output, handle);
            }
        }
    }
}

fn split_path(prefix: Option<&str>, path: &str) -> Rc<[Rc<str>]> {
    prefix
        .into_iter()
        .flat_map(|p| p.split('.'))
        .chain(path.split('.'))
        .map(Rc::from)
        .collect()
}

impl From<&str> for Binding {
    fn from(path: &str) -> Self {
        Binding::new(path)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = &self.spec;
        match &spec.source {
            Source::Path(path) => {
                write!(f, "bound(")?;
                for (i, segment) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", segment)?;
                }
                if let Some(label) = &spec.label {
                    write!(f, "@{}", label)?;
                }
                write!(f, ")")?;
            }
            Source::Combine { op, left, right } => write!(f, "{}.{}({})", left, op, right)?,
            Source::Format { template, .. } => write!(f, "format({:?})", &**template)?,
        }
        if !spec.default.is_undefined() {
            write!(f, ".default({})", quoted(&spec.default))?;
        }
        for filter in &spec.filters {
            write!(f, "{}", filter)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({})", self)
    }
}

impl Graph {
    /// Bind `property` on `target` to a dotted path
    pub fn bind(&mut self, target: NodeId, property: &str, path: &str) -> Result<BindHandle> {
        Binding::new(path).bind_to(self, target, property)
    }
}
