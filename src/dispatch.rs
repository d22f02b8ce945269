//! Dispatch Pipeline
//!
//! Wraps an application's store and intercepts every action on its way in.
//! Each action moves through
//!
//! ```text
//! Received -> PreListenersRun -> Mutated -> PostListenersRun -> StateDiffRun -> Settled
//! ```
//!
//! - pre-dispatch listeners see the state strictly before the mutation
//! - post-dispatch listeners see the state strictly after it, plus the
//!   location stamped on the action (if any)
//! - state listeners see `(previous, next)` once per action, whatever its type
//!
//! Listeners run synchronously in registration order. A failing listener
//! (error or panic) is reported in the [`DispatchReport`] and logged; it never
//! stops the mutation, the other listeners, or later actions.
//!
//! Dispatching from inside a listener queues the new action. It runs after the
//! current action has settled, so actions are processed strictly one at a time.
//!
//! A panic from the store itself is not isolated. It propagates out of
//! `dispatch`, but the pipeline is left idle with an empty queue, so later
//! actions are processed normally.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, trace};

use crate::data_layer::panic_message;
use crate::error::{ListenerError, ListenerPhase};
use crate::location::LocationPath;

/// An action flowing through the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Where in the view the action was dispatched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationPath>,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Value::Null,
            location: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_location(mut self, location: LocationPath) -> Self {
        self.location = Some(location);
        self
    }
}

/// The application's state store, as seen by the pipeline
pub trait Store {
    type State: Clone;

    fn get_state(&self) -> Self::State;

    /// Apply an action, producing the next state
    fn dispatch(&mut self, action: &Action);
}

/// Anything actions can be sent to.
///
/// Listeners receive the pipeline as a `&dyn Dispatch`; location-bound
/// callbacks hold one behind an `Rc`.
pub trait Dispatch {
    fn dispatch(&self, action: Action);
}

/// A store made of a state value and a pure reducer
pub struct ReducerStore<S> {
    state: S,
    reducer: Box<dyn Fn(&S, &Action) -> S>,
}

impl<S> ReducerStore<S> {
    pub fn new(initial: S, reducer: impl Fn(&S, &Action) -> S + 'static) -> Self {
        Self {
            state: initial,
            reducer: Box::new(reducer),
        }
    }
}

impl<S: Clone> Store for ReducerStore<S> {
    type State = S;

    fn get_state(&self) -> S {
        self.state.clone()
    }

    fn dispatch(&mut self, action: &Action) {
        self.state = (self.reducer)(&self.state, action);
    }
}

/// Action types a listener is registered for. Matching is exact string membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchKeys(BTreeSet<String>);

impl MatchKeys {
    pub fn matches(&self, action_type: &str) -> bool {
        self.0.contains(action_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<&str> for MatchKeys {
    fn from(key: &str) -> Self {
        Self(BTreeSet::from([key.to_string()]))
    }
}

impl From<String> for MatchKeys {
    fn from(key: String) -> Self {
        Self(BTreeSet::from([key]))
    }
}

impl From<&[&str]> for MatchKeys {
    fn from(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for MatchKeys {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl From<Vec<&str>> for MatchKeys {
    fn from(keys: Vec<&str>) -> Self {
        keys.as_slice().into()
    }
}

impl From<Vec<String>> for MatchKeys {
    fn from(keys: Vec<String>) -> Self {
        Self(keys.into_iter().collect())
    }
}

/// Where an action currently is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Received,
    PreListenersRun,
    Mutated,
    PostListenersRun,
    StateDiffRun,
    Settled,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchPhase::Received => "received",
            DispatchPhase::PreListenersRun => "pre-listeners-run",
            DispatchPhase::Mutated => "mutated",
            DispatchPhase::PostListenersRun => "post-listeners-run",
            DispatchPhase::StateDiffRun => "state-diff-run",
            DispatchPhase::Settled => "settled",
        };
        f.write_str(name)
    }
}

/// Outcome of a top-level `dispatch` call
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Every action settled during the call, the dispatched one first, then
    /// any actions queued by listeners, in queue order
    pub settled: Vec<Action>,
    /// Listener failures isolated along the way
    pub errors: Vec<ListenerError>,
    /// True when the call came from inside a listener and was queued
    pub queued: bool,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Handler for the pre-dispatch phase
pub type PreListener<St> = Box<dyn Fn(&Action, &St, &dyn Dispatch) -> anyhow::Result<()>>;

/// Handler for the post-dispatch phase
pub type PostListener<St> =
    Box<dyn Fn(&Action, &St, Option<&LocationPath>, &dyn Dispatch) -> anyhow::Result<()>>;

/// Handler observing every state transition
pub type StateListener<St> = Box<dyn Fn(&St, &St) -> anyhow::Result<()>>;

struct Registration<H> {
    keys: MatchKeys,
    handler: H,
}

/// The interception layer around a store.
///
/// Listener registration takes `&mut self` and belongs to the initialisation
/// phase; `dispatch` takes `&self` so the pipeline can be shared (e.g. behind
/// an `Rc`) with callbacks and listeners.
pub struct DispatchPipeline<S: Store> {
    store: RefCell<S>,
    pre: Vec<Registration<PreListener<S::State>>>,
    post: Vec<Registration<PostListener<S::State>>>,
    state_listeners: Vec<StateListener<S::State>>,
    queue: RefCell<VecDeque<Action>>,
    phase: Cell<DispatchPhase>,
}

impl<S: Store> DispatchPipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: RefCell::new(store),
            pre: Vec::new(),
            post: Vec::new(),
            state_listeners: Vec::new(),
            queue: RefCell::new(VecDeque::new()),
            phase: Cell::new(DispatchPhase::Settled),
        }
    }

    /// Current state of the wrapped store
    pub fn get_state(&self) -> S::State {
        self.store.borrow().get_state()
    }

    /// Phase of the action being processed; `Settled` when idle
    pub fn phase(&self) -> DispatchPhase {
        self.phase.get()
    }

    /// Register a handler run before the store applies matching actions
    pub fn add_pre_dispatch_listeners<K, F>(&mut self, keys: K, handler: F)
    where
        K: Into<MatchKeys>,
        F: Fn(&Action, &S::State, &dyn Dispatch) -> anyhow::Result<()> + 'static,
    {
        self.pre.push(Registration {
            keys: keys.into(),
            handler: Box::new(handler),
        });
    }

    /// Register a handler run after the store applies matching actions
    pub fn add_post_dispatch_listeners<K, F>(&mut self, keys: K, handler: F)
    where
        K: Into<MatchKeys>,
        F: Fn(&Action, &S::State, Option<&LocationPath>, &dyn Dispatch) -> anyhow::Result<()> + 'static,
    {
        self.post.push(Registration {
            keys: keys.into(),
            handler: Box::new(handler),
        });
    }

    /// Register one state listener
    pub fn add_state_listener<F>(&mut self, handler: F)
    where
        F: Fn(&S::State, &S::State) -> anyhow::Result<()> + 'static,
    {
        self.state_listeners.push(Box::new(handler));
    }

    /// Register several state listeners at once, in order
    pub fn add_state_listeners<I>(&mut self, handlers: I)
    where
        I: IntoIterator<Item = StateListener<S::State>>,
    {
        self.state_listeners.extend(handlers);
    }

    /// Dispatch an action and run it (and anything it queues) to completion.
    ///
    /// Called re-entrantly from a listener, the action is queued instead and
    /// the returned report is empty with `queued` set.
    pub fn dispatch(&self, action: Action) -> DispatchReport {
        self.queue.borrow_mut().push_back(action);

        if self.phase.get() != DispatchPhase::Settled {
            trace!(phase = %self.phase.get(), "re-entrant dispatch queued");
            return DispatchReport {
                queued: true,
                ..DispatchReport::default()
            };
        }

        let _reset = ResetOnUnwind {
            phase: &self.phase,
            queue: &self.queue,
        };
        let mut report = DispatchReport::default();
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(action) => self.process(action, &mut report),
                None => break,
            }
        }
        report
    }

    fn process(&self, action: Action, report: &mut DispatchReport) {
        self.enter(&action, DispatchPhase::Received);
        let previous = self.store.borrow().get_state();

        for registration in self.pre.iter().filter(|r| r.keys.matches(&action.action_type)) {
            let outcome = isolate(|| (registration.handler)(&action, &previous, self));
            self.record(&action, ListenerPhase::Pre, outcome, report);
        }
        self.enter(&action, DispatchPhase::PreListenersRun);

        // The store borrow must end before any listener can call back in
        self.store.borrow_mut().dispatch(&action);
        self.enter(&action, DispatchPhase::Mutated);
        let next = self.store.borrow().get_state();

        let location = action.location.as_ref();
        for registration in self.post.iter().filter(|r| r.keys.matches(&action.action_type)) {
            let outcome = isolate(|| (registration.handler)(&action, &next, location, self));
            self.record(&action, ListenerPhase::Post, outcome, report);
        }
        self.enter(&action, DispatchPhase::PostListenersRun);

        for listener in &self.state_listeners {
            let outcome = isolate(|| listener(&previous, &next));
            self.record(&action, ListenerPhase::StateDiff, outcome, report);
        }
        self.enter(&action, DispatchPhase::StateDiffRun);

        self.enter(&action, DispatchPhase::Settled);
        report.settled.push(action);
    }

    fn enter(&self, action: &Action, phase: DispatchPhase) {
        trace!(action = %action.action_type, %phase, "dispatch phase");
        self.phase.set(phase);
    }

    fn record(
        &self,
        action: &Action,
        phase: ListenerPhase,
        outcome: anyhow::Result<()>,
        report: &mut DispatchReport,
    ) {
        if let Err(source) = outcome {
            let err = ListenerError {
                action_type: action.action_type.clone(),
                phase,
                source,
            };
            error!(action = %action.action_type, %phase, error = %err.source, "listener failed");
            report.errors.push(err);
        }
    }
}

impl<S: Store> Dispatch for DispatchPipeline<S> {
    fn dispatch(&self, action: Action) {
        DispatchPipeline::dispatch(self, action);
    }
}

/// Returns a pipeline to idle when processing unwinds (a panicking store).
///
/// Actions queued behind the failed one are discarded, and the panic keeps
/// propagating to the caller of `dispatch`.
struct ResetOnUnwind<'a> {
    phase: &'a Cell<DispatchPhase>,
    queue: &'a RefCell<VecDeque<Action>>,
}

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        let phase = self.phase.get();
        if phase == DispatchPhase::Settled {
            return;
        }
        let discarded = match self.queue.try_borrow_mut() {
            Ok(mut queue) => queue.drain(..).count(),
            Err(_) => 0,
        };
        error!(%phase, discarded, "dispatch unwound, pipeline reset to settled");
        self.phase.set(DispatchPhase::Settled);
    }
}

/// Run a listener body, turning panics into errors
fn isolate(body: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("listener panicked: {}", panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn counter() -> DispatchPipeline<ReducerStore<i64>> {
        DispatchPipeline::new(ReducerStore::new(0, |state: &i64, action: &Action| {
            match action.action_type.as_str() {
                "INCREMENT" => state + 1,
                "DECREMENT" => state - 1,
                _ => *state,
            }
        }))
    }

    #[test]
    fn test_match_keys_conversions() {
        let keys: MatchKeys = ["A", "B"].into();
        assert!(keys.matches("A"));
        assert!(keys.matches("B"));
        assert!(!keys.matches("C"));
        assert!(!keys.matches("a"));

        let single: MatchKeys = "A".into();
        assert_eq!(single.iter().collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn test_reducer_store_applies_actions() {
        let pipeline = counter();
        pipeline.dispatch(Action::new("INCREMENT"));
        pipeline.dispatch(Action::new("INCREMENT"));
        pipeline.dispatch(Action::new("DECREMENT"));
        assert_eq!(pipeline.get_state(), 1);
    }

    #[test]
    fn test_phase_settled_between_dispatches() {
        let mut pipeline = counter();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        pipeline.add_post_dispatch_listeners("INCREMENT", move |action, state, _, _| {
            log.borrow_mut().push((action.action_type.clone(), *state));
            Ok(())
        });

        assert_eq!(pipeline.phase(), DispatchPhase::Settled);
        let report = pipeline.dispatch(Action::new("INCREMENT"));
        assert_eq!(pipeline.phase(), DispatchPhase::Settled);
        assert!(report.is_clean());
        assert!(!report.queued);
        assert_eq!(*seen.borrow(), vec![("INCREMENT".to_string(), 1)]);
    }

    #[test]
    fn test_isolate_converts_panics() {
        let err = isolate(|| panic!("kaboom")).unwrap_err();
        assert!(err.to_string().contains("kaboom"));
        assert!(isolate(|| Ok(())).is_ok());
    }

    #[test]
    fn test_action_serializes_with_type_key() {
        let action = Action::new("ADD_TO_CART").with_payload(serde_json::json!({ "sku": 1 }));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "ADD_TO_CART");
        assert_eq!(value["payload"]["sku"], 1);
        assert!(value.get("location").is_none());
    }
}
