//! Location Tracker
//!
//! Derives "where in the view" an action came from, without the component
//! tree keeping any global state.
//!
//! Every component renders with an explicit [`LocationContext`]: the ordered
//! stack of tagged ancestors above it. Wrapping a component with
//! [`tag_location`] pushes one [`LocationNode`] onto that stack for its
//! subtree and binds every [`ActionCallback`] in its props to the resulting
//! path. Untagged components pass the context through untouched, so they
//! contribute no segment.
//!
//! ```text
//! Page (tagged "Page")
//! └── Grid (untagged)
//!     └── Card (tagged "Card", override "Special Card")
//!         └── onClick fires -> action.location = "Page > Special Card"
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::dispatch::{Action, Dispatch};

/// Separator between path segments when a path is displayed
pub const LOCATION_SEPARATOR: &str = " > ";

/// One tagged component instance in the render tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationNode {
    /// Name given when the component was tagged
    pub own_name: String,
    /// Name supplied at the usage site, if any
    pub override_name: Option<String>,
}

impl LocationNode {
    pub fn new(own_name: impl Into<String>) -> Self {
        Self {
            own_name: own_name.into(),
            override_name: None,
        }
    }

    pub fn with_override(mut self, name: impl Into<String>) -> Self {
        self.override_name = Some(name.into());
        self
    }

    /// The name this node contributes to a path
    pub fn name(&self) -> &str {
        self.override_name.as_deref().unwrap_or(&self.own_name)
    }
}

/// Joined names from the outermost tagged ancestor down to the origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationPath {
    segments: Vec<String>,
}

impl LocationPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments<I, T>(segments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The innermost segment
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn join(&self, separator: &str) -> String {
        self.segments.join(separator)
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(LOCATION_SEPARATOR))
    }
}

/// The ancestor stack a component renders within
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationContext {
    nodes: Vec<LocationNode>,
}

impl LocationContext {
    /// Context at the top of the tree: no tagged ancestors
    pub fn root() -> Self {
        Self::default()
    }

    /// Context with an arbitrary ancestor stack, outermost first
    pub fn from_names<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            nodes: names.into_iter().map(LocationNode::new).collect(),
        }
    }

    /// Context for the subtree of a tagged component
    pub fn enter(&self, node: LocationNode) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[LocationNode] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        self.nodes.len()
    }

    pub fn path(&self) -> LocationPath {
        LocationPath::from_segments(self.nodes.iter().map(LocationNode::name))
    }
}

/// A callback that creates an action and dispatches it.
///
/// Once bound to a location, the action is stamped with that path right
/// before dispatch.
pub struct ActionCallback<A = ()> {
    creator: Rc<dyn Fn(A) -> Action>,
    dispatcher: Rc<dyn Dispatch>,
    location: Option<LocationPath>,
}

impl<A> Clone for ActionCallback<A> {
    fn clone(&self) -> Self {
        Self {
            creator: Rc::clone(&self.creator),
            dispatcher: Rc::clone(&self.dispatcher),
            location: self.location.clone(),
        }
    }
}

impl<A> fmt::Debug for ActionCallback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCallback")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl<A> ActionCallback<A> {
    pub fn new<F>(dispatcher: Rc<dyn Dispatch>, creator: F) -> Self
    where
        F: Fn(A) -> Action + 'static,
    {
        Self {
            creator: Rc::new(creator),
            dispatcher,
            location: None,
        }
    }

    /// The path actions will be stamped with, if bound
    pub fn location(&self) -> Option<&LocationPath> {
        self.location.as_ref()
    }

    /// Create the action, stamp it, dispatch it
    pub fn fire(&self, arg: A) {
        let mut action = (self.creator)(arg);
        if let Some(location) = &self.location {
            action.location = Some(location.clone());
        }
        self.dispatcher.dispatch(action);
    }
}

/// Bind a callback to a location path. A later binding (deeper in the tree)
/// replaces an earlier one.
pub fn bind_callback<A>(callback: ActionCallback<A>, path: &LocationPath) -> ActionCallback<A> {
    ActionCallback {
        location: Some(path.clone()),
        ..callback
    }
}

/// Props that may carry action callbacks.
///
/// Implement this for a props type by binding each callback field; types
/// without callbacks return `self`.
pub trait BindLocation: Sized {
    fn bind_location(self, path: &LocationPath) -> Self;
}

impl BindLocation for () {
    fn bind_location(self, _path: &LocationPath) -> Self {}
}

impl<A> BindLocation for ActionCallback<A> {
    fn bind_location(self, path: &LocationPath) -> Self {
        bind_callback(self, path)
    }
}

impl<T: BindLocation> BindLocation for Option<T> {
    fn bind_location(self, path: &LocationPath) -> Self {
        self.map(|inner| inner.bind_location(path))
    }
}

impl<T: BindLocation> BindLocation for Vec<T> {
    fn bind_location(self, path: &LocationPath) -> Self {
        self.into_iter().map(|inner| inner.bind_location(path)).collect()
    }
}

/// The composition contract location derivation needs from a view framework
pub trait Component {
    type Props;
    type Output;

    fn render(&self, props: Self::Props, ctx: &LocationContext) -> Self::Output;
}

/// Component built from a render function
pub struct FnComponent<F, P, O> {
    render: F,
    _marker: PhantomData<fn(P) -> O>,
}

/// Wrap a render function as a [`Component`]
pub fn component_fn<F, P, O>(render: F) -> FnComponent<F, P, O>
where
    F: Fn(P, &LocationContext) -> O,
{
    FnComponent {
        render,
        _marker: PhantomData,
    }
}

impl<F, P, O> Component for FnComponent<F, P, O>
where
    F: Fn(P, &LocationContext) -> O,
{
    type Props = P;
    type Output = O;

    fn render(&self, props: P, ctx: &LocationContext) -> O {
        (self.render)(props, ctx)
    }
}

/// Props of a tagged component: the inner props plus the usage-site override
#[derive(Debug, Clone, Default)]
pub struct TaggedProps<P> {
    pub override_name: Option<String>,
    pub props: P,
}

impl<P> TaggedProps<P> {
    pub fn new(props: P) -> Self {
        Self {
            override_name: None,
            props,
        }
    }

    pub fn with_override(mut self, name: impl Into<String>) -> Self {
        self.override_name = Some(name.into());
        self
    }
}

/// A component decorated with a location name
pub struct Tagged<C> {
    default_name: String,
    inner: C,
}

impl<C> Tagged<C> {
    pub fn new(default_name: impl Into<String>, inner: C) -> Self {
        Self {
            default_name: default_name.into(),
            inner,
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C> Component for Tagged<C>
where
    C: Component,
    C::Props: BindLocation,
{
    type Props = TaggedProps<C::Props>;
    type Output = C::Output;

    fn render(&self, props: Self::Props, ctx: &LocationContext) -> C::Output {
        let mut node = LocationNode::new(self.default_name.as_str());
        node.override_name = props.override_name;

        let ctx = ctx.enter(node);
        let props = props.props.bind_location(&ctx.path());
        self.inner.render(props, &ctx)
    }
}

/// Decorate a component with a location name: `tag_location("Card")(card)`
pub fn tag_location<C>(default_name: impl Into<String>) -> impl FnOnce(C) -> Tagged<C> {
    let default_name = default_name.into();
    move |component| Tagged::new(default_name, component)
}
