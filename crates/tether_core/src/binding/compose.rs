//! Bindings built from other bindings: and/or/equals and text formatting
//!
//! Operands are installed as ordinary bindings on the same target feeding
//! an internal sink. A combinator stays silent until every operand has
//! delivered once, then recomputes on each operand change.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

use super::bound::{BindHandle, Delivery, Output};
use super::{Binding, Sink};
use crate::graph::{Graph, NodeId};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Combinator {
    And,
    Or,
    Equals,
}

impl Combinator {
    /// Short-circuit semantics yield an operand, equality yields a boolean
    fn apply(self, left: &Value, right: &Value) -> Value {
        match self {
            Combinator::And if left.is_truthy() => right.clone(),
            Combinator::And => left.clone(),
            Combinator::Or if left.is_truthy() => left.clone(),
            Combinator::Or => right.clone(),
            Combinator::Equals => Value::Bool(left == right),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::And => write!(f, "and"),
            Combinator::Or => write!(f, "or"),
            Combinator::Equals => write!(f, "equals"),
        }
    }
}

struct Pair {
    /// Bit per operand still waiting for its first value
    pending: Cell<u8>,
    values: RefCell<[Value; 2]>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn install_combine(
    graph: &mut Graph,
    op: Combinator,
    left: &Binding,
    right: &Binding,
    target: NodeId,
    pinned: Option<NodeId>,
    output: Rc<Output>,
    handle: &mut BindHandle,
) {
    let pair = Rc::new(Pair {
        pending: Cell::new(0b11),
        values: RefCell::new([Value::Undefined, Value::Undefined]),
    });
    for (slot, operand) in [left, right].into_iter().enumerate() {
        let pair = pair.clone();
        let output = output.clone();
        let sink = Sink::internal(move |graph, value| {
            pair.values.borrow_mut()[slot] = value;
            pair.pending.set(pair.pending.get() & !(1 << slot));
            if pair.pending.get() != 0 {
                return;
            }
            let result = {
                let values = pair.values.borrow();
                op.apply(&values[0], &values[1])
            };
            output.deliver(graph, Delivery::Value(result));
        });
        operand.install(graph, target, pinned, sink, handle);
    }
}

/// Split a template into literal parts and operand bindings
///
/// `%[path]` adds a path binding, `%s` takes the next provided binding and
/// `%%` is a literal percent sign. The result always has one more part than
/// operands.
pub(crate) fn parse_template(template: &str, provided: Vec<Binding>) -> (Vec<Rc<str>>, Vec<Binding>) {
    let mut provided = provided.into_iter();
    let mut parts = Vec::new();
    let mut operands = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        literal.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('%') {
            literal.push('%');
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('s') {
            if let Some(binding) = provided.next() {
                parts.push(Rc::from(mem::take(&mut literal)));
                operands.push(binding);
            }
            rest = tail;
        } else if let Some((path, tail)) = after.strip_prefix('[').and_then(|t| t.split_once(']')) {
            parts.push(Rc::from(mem::take(&mut literal)));
            operands.push(Binding::new(path));
            rest = tail;
        } else {
            literal.push('%');
            rest = after;
        }
    }
    literal.push_str(rest);
    parts.push(Rc::from(literal));
    (parts, operands)
}

pub(crate) fn install_format(
    graph: &mut Graph,
    parts: Rc<[Rc<str>]>,
    operands: &[Binding],
    target: NodeId,
    pinned: Option<NodeId>,
    output: Rc<Output>,
    handle: &mut BindHandle,
) {
    if operands.is_empty() {
        output.deliver(graph, Delivery::Value(Value::from(parts.concat())));
        return;
    }
    let values: Rc<RefCell<Vec<Option<Value>>>> = Rc::new(RefCell::new(vec![None; operands.len()]));
    for (slot, operand) in operands.iter().enumerate() {
        let values = values.clone();
        let parts = parts.clone();
        let output = output.clone();
        let sink = Sink::internal(move |graph, value| {
            values.borrow_mut()[slot] = Some(value);
            let text = {
                let values = values.borrow();
                if values.iter().any(Option::is_none) {
                    return;
                }
                render(&parts, &values)
            };
            output.deliver(graph, Delivery::Value(Value::from(text)));
        });
        operand.install(graph, target, pinned, sink, handle);
    }
}

fn render(parts: &[Rc<str>], values: &[Option<Value>]) -> String {
    let mut text = String::from(parts.first().map_or("", |p| &**p));
    for (value, part) in values.iter().zip(parts.iter().skip(1)) {
        if let Some(value) = value {
            text.push_str(&value.to_text());
        }
        text.push_str(part);
    }
    text
}
