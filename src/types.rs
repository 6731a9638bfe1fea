//! Core types for spark-fiber.
//!
//! Elements are the immutable description components produce every render.
//! Fibers (see [`crate::engine`]) track how that description changes over
//! time; these types are what flows between the two.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::RenderContext;

/// Attribute carrying the text of a text element.
pub const TEXT_VALUE_ATTR: &str = "nodeValue";

// =============================================================================
// Event Handlers
// =============================================================================

/// Listener bound to a host node.
///
/// Handlers compare by identity, not by behavior. A component that builds a
/// fresh closure on every render gets its listener rebound on every commit;
/// build the handler once (or keep it in state) to avoid that.
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn()>);

impl EventHandler {
    /// Wrap a closure as a handler.
    pub fn new(handler: impl Fn() + 'static) -> Self {
        Self(Rc::new(handler))
    }

    /// Invoke the handler.
    pub fn call(&self) {
        (self.0)()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandler({:p})", Rc::as_ptr(&self.0))
    }
}

// =============================================================================
// Values
// =============================================================================

/// Attribute and dependency value.
///
/// Equality is identity-or-value: scalars and strings compare by value,
/// floats compare bit-for-bit (so `NaN == NaN` and `0.0 != -0.0`), handlers
/// compare by identity.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Handler(EventHandler),
}

impl Value {
    /// Check if this value is an event handler.
    #[inline]
    pub fn is_handler(&self) -> bool {
        matches!(self, Value::Handler(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&EventHandler> {
        match self {
            Value::Handler(h) => Some(h),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Handler(a), Value::Handler(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Handler(_) => f.write_str("[handler]"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::Str(v)
    }
}

impl From<EventHandler> for Value {
    fn from(v: EventHandler) -> Self {
        Value::Handler(v)
    }
}

/// Attribute map of an element. Ordered so diffs and snapshots are stable.
pub type Props = BTreeMap<String, Value>;

/// Split an attribute name into its event name if it is event-shaped.
///
/// `onClick` with a handler value is the `click` event; anything else is a
/// plain property.
pub fn event_name(name: &str, value: &Value) -> Option<String> {
    if !value.is_handler() {
        return None;
    }
    name.strip_prefix("on")
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.to_ascii_lowercase())
}

// =============================================================================
// Components
// =============================================================================

/// Signature of a component render function.
pub type RenderFn = dyn Fn(&mut RenderContext<'_>, &Props) -> Vec<Element>;

/// A function component.
///
/// Two components are the same kind only if they are clones of the same
/// `Component` value. Create each component once and reuse it.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    /// Create a component from its render function.
    ///
    /// # Arguments
    /// * `name` - Used in logs and error messages only
    /// * `render` - Called once per render pass with the hook context and props
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderContext<'_>, &Props) -> Vec<Element> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }

    pub(crate) fn render(&self, cx: &mut RenderContext<'_>, props: &Props) -> Vec<Element> {
        (self.render)(cx, props)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

// =============================================================================
// Elements
// =============================================================================

/// What an element renders as.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// Host node with a tag name (`div`, `span`, ...).
    Host(Rc<str>),
    /// Text node; its text lives in the [`TEXT_VALUE_ATTR`] attribute.
    Text,
    /// Function component.
    Component(Component),
}

impl ElementKind {
    /// Check whether two kinds occupy the same render slot type.
    pub fn same_kind(&self, other: &ElementKind) -> bool {
        match (self, other) {
            (ElementKind::Host(a), ElementKind::Host(b)) => a == b,
            (ElementKind::Text, ElementKind::Text) => true,
            (ElementKind::Component(a), ElementKind::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Immutable description of one node of the UI.
///
/// Cheap to clone: attributes and children are shared.
#[derive(Clone, Debug)]
pub struct Element {
    kind: ElementKind,
    props: Rc<Props>,
    children: Rc<Vec<Element>>,
}

impl Element {
    fn with_kind(kind: ElementKind) -> Self {
        Self {
            kind,
            props: Rc::new(Props::new()),
            children: Rc::new(Vec::new()),
        }
    }

    /// Host element with a tag name.
    pub fn host(tag: &str) -> Self {
        Self::with_kind(ElementKind::Host(Rc::from(tag)))
    }

    /// Text element.
    pub fn text(value: impl Into<Value>) -> Self {
        Self::with_kind(ElementKind::Text).attr(TEXT_VALUE_ATTR, value)
    }

    /// Component element.
    pub fn component(component: &Component) -> Self {
        Self::with_kind(ElementKind::Component(component.clone()))
    }

    /// Set an attribute.
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        Rc::make_mut(&mut self.props).insert(name.to_string(), value.into());
        self
    }

    /// Bind an event handler, e.g. `.on("click", handler)` sets `onclick`.
    pub fn on(self, event: &str, handler: EventHandler) -> Self {
        let name = format!("on{event}");
        self.attr(&name, handler)
    }

    /// Append a child element.
    pub fn child(mut self, child: Element) -> Self {
        Rc::make_mut(&mut self.children).push(child);
        self
    }

    /// Append a text child.
    pub fn text_child(self, value: impl Into<Value>) -> Self {
        self.child(Element::text(value))
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        Rc::make_mut(&mut self.children).extend(children);
        self
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn props(&self) -> &Rc<Props> {
        &self.props
    }

    pub fn child_elements(&self) -> &Rc<Vec<Element>> {
        &self.children
    }
}

/// Shorthand for [`Element::host`].
pub fn h(tag: &str) -> Element {
    Element::host(tag)
}

/// Shorthand for [`Element::text`].
pub fn text(value: impl Into<Value>) -> Element {
    Element::text(value)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality_is_identity_or_value() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::from(1), Value::from(true));

        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));

        let handler = EventHandler::new(|| {});
        let same = handler.clone();
        let other = EventHandler::new(|| {});
        assert_eq!(Value::from(handler.clone()), Value::from(same));
        assert_ne!(Value::from(handler), Value::from(other));
    }

    #[test]
    fn test_event_name_classification() {
        let handler = Value::from(EventHandler::new(|| {}));
        assert_eq!(event_name("onClick", &handler), Some("click".to_string()));
        assert_eq!(event_name("onclick", &handler), Some("click".to_string()));
        assert_eq!(event_name("on", &handler), None);
        assert_eq!(event_name("onClick", &Value::from("x")), None);
        assert_eq!(event_name("title", &handler), None);
    }

    #[test]
    fn test_element_builder() {
        let el = h("div").attr("id", "root").text_child("hi").child(h("span"));

        assert!(matches!(el.kind(), ElementKind::Host(tag) if &**tag == "div"));
        assert_eq!(el.props().get("id"), Some(&Value::from("root")));
        assert_eq!(el.child_elements().len(), 2);
        assert!(matches!(el.child_elements()[0].kind(), ElementKind::Text));
        assert_eq!(
            el.child_elements()[0].props().get(TEXT_VALUE_ATTR),
            Some(&Value::from("hi"))
        );
    }

    #[test]
    fn test_same_kind() {
        let a = Component::new("A", |_, _| Vec::new());
        let b = Component::new("A", |_, _| Vec::new());

        assert!(ElementKind::Component(a.clone()).same_kind(&ElementKind::Component(a.clone())));
        assert!(!ElementKind::Component(a).same_kind(&ElementKind::Component(b)));
        assert!(h("div").kind().same_kind(h("div").kind()));
        assert!(!h("div").kind().same_kind(h("span").kind()));
        assert!(text("x").kind().same_kind(text("y").kind()));
    }
}
