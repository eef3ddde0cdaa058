//! Value filters applied to bound values before they reach the sink

use std::fmt;
use std::rc::Rc;

use crate::graph::Graph;
use crate::list::List;
use crate::value::Value;

/// Custom transformation supplied with [`Binding::map`](super::Binding::map)
pub type MapFn = Rc<dyn Fn(&Value) -> Value>;

#[derive(Clone)]
pub(crate) enum Filter {
    AsString,
    AsNumber,
    AsBoolean,
    AsList,
    Not,
    Local,
    Select(Value, Value),
    Else(Value),
    Matches(Rc<[Value]>),
    Debug,
    Map(MapFn),
}

impl Filter {
    pub(crate) fn apply(&self, graph: &Graph, value: Value, description: &str) -> Value {
        match self {
            Filter::AsString => Value::from(value.to_text()),
            Filter::AsNumber => Value::Number(value.to_number()),
            Filter::AsBoolean => Value::Bool(value.is_truthy()),
            Filter::AsList => as_list(graph, value),
            Filter::Not => Value::Bool(!value.is_truthy()),
            Filter::Local => match value {
                Value::Undefined | Value::Null => value,
                other => Value::from(graph.localize(&other.to_text())),
            },
            Filter::Select(yes, no) => {
                if value.is_truthy() {
                    yes.clone()
                } else {
                    no.clone()
                }
            }
            Filter::Else(fallback) => {
                if value.is_truthy() {
                    value
                } else {
                    fallback.clone()
                }
            }
            Filter::Matches(candidates) => Value::Bool(candidates.contains(&value)),
            Filter::Debug => {
                tracing::debug!(binding = description, ?value, "bound value");
                value
            }
            Filter::Map(f) => f(&value),
        }
    }
}

/// Lists become a list of their members, nullish becomes empty and any
/// other value becomes a single-element list
fn as_list(graph: &Graph, value: Value) -> Value {
    match value {
        Value::List(_) => value,
        Value::Undefined | Value::Null => Value::from(Vec::<Value>::new()),
        Value::Node(id) => match List::from_node(graph, id) {
            Some(list) => Value::from(list.map(graph, |_, m| Value::Node(m))),
            None => Value::from(vec![value]),
        },
        other => Value::from(vec![other]),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::AsString => write!(f, ".as_string()"),
            Filter::AsNumber => write!(f, ".as_number()"),
            Filter::AsBoolean => write!(f, ".as_boolean()"),
            Filter::AsList => write!(f, ".as_list()"),
            Filter::Not => write!(f, ".not()"),
            Filter::Local => write!(f, ".local()"),
            Filter::Select(a, b) => write!(f, ".select({}, {})", quoted(a), quoted(b)),
            Filter::Else(v) => write!(f, ".else({})", quoted(v)),
            Filter::Matches(values) => {
                write!(f, ".matches(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", quoted(v))?;
                }
                write!(f, ")")
            }
            Filter::Debug => write!(f, ".debug()"),
            Filter::Map(_) => write!(f, ".map(..)"),
        }
    }
}

pub(crate) fn quoted(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("{:?}", &**s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_filters() {
        let graph = Graph::new();
        let apply = |f: Filter, v: Value| f.apply(&graph, v, "test");

        assert_eq!(apply(Filter::AsString, Value::from(3)), Value::from("3"));
        assert_eq!(apply(Filter::AsString, Value::Undefined), Value::from(""));
        assert_eq!(apply(Filter::AsNumber, Value::from("2.5")), Value::from(2.5));
        assert_eq!(apply(Filter::AsBoolean, Value::from("")), Value::Bool(false));
        assert_eq!(apply(Filter::Not, Value::from(0)), Value::Bool(true));
        assert_eq!(
            apply(Filter::Select("on".into(), "off".into()), Value::Bool(true)),
            Value::from("on")
        );
        assert_eq!(
            apply(Filter::Else("none".into()), Value::Undefined),
            Value::from("none")
        );
        assert_eq!(
            apply(
                Filter::Matches(Rc::from(vec![Value::from("a"), Value::from("b")])),
                Value::from("b")
            ),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_local_uses_localizer() {
        let mut graph = Graph::new();
        graph.set_localizer(|text| format!("<{}>", text));
        assert_eq!(
            Filter::Local.apply(&graph, Value::from("Hello"), "test"),
            Value::from("<Hello>")
        );
        assert_eq!(
            Filter::Local.apply(&graph, Value::Undefined, "test"),
            Value::Undefined
        );
    }

    #[test]
    fn test_as_list_of_list_object() {
        let mut graph = Graph::new();
        let list = List::create(&mut graph);
        let a = graph.create();
        list.add(&mut graph, a).unwrap();

        let value = Filter::AsList.apply(&graph, Value::from(list), "test");
        assert_eq!(value, Value::from(vec![Value::Node(a)]));
        assert_eq!(
            Filter::AsList.apply(&graph, Value::Null, "test"),
            Value::from(Vec::<Value>::new())
        );
    }
}
