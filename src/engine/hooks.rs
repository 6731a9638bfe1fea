//! Hooks - per-component state cells and effect cells.
//!
//! Hooks are methods of [`RenderContext`], which only exists while a component
//! renders, and are addressed by call position: the Nth `use_state` call of a
//! render reuses the Nth cell of the previous committed render.
//!
//! # State cells
//!
//! ```text
//! SetState::set / update ──push──► StateQueue.pending ──request_update──► scheduler
//!                                        │
//! render:  value = fold(committed, pending)     (nothing consumed)
//! commit:  committed = value; drain folded actions
//! ```
//!
//! Folding without consuming keeps updates alive when a render pass is
//! thrown away before commit; the next pass folds them again.
//!
//! # Effect cells
//!
//! `use_effect` only records the callback. Commit compares the record with
//! the same position of the previous render and decides whether to run it:
//!
//! | Deps            | Runs                                       |
//! |-----------------|--------------------------------------------|
//! | `Deps::Always`  | after every commit                         |
//! | `Deps::OnMount` | after the first commit; cleanup on unmount |
//! | `Deps::On(..)`  | when any value changed since last commit   |

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::FiberError;
use crate::scheduler::Priority;
use crate::types::{Element, Value};

/// Cleanup returned by an effect callback.
pub type Cleanup = Box<dyn FnOnce()>;

/// Effect body; returns an optional cleanup.
pub type EffectCallback = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Receiver of update requests coming from state setters.
pub trait UpdateSink {
    /// Request a render pass at `priority`, or at the ambient priority.
    fn request_update(&self, priority: Option<Priority>);
}

// =============================================================================
// Hook slots
// =============================================================================

/// One position of a component's hook list.
pub(crate) trait HookSlot {
    /// Make this render's result the committed state.
    fn commit(&self);

    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// State cells
// =============================================================================

/// Queued state transition.
enum Action<T> {
    Replace(T),
    Update(Rc<dyn Fn(&T) -> T>),
}

impl<T: Clone> Action<T> {
    fn apply(&self, current: &T) -> T {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Update(f) => f(current),
        }
    }
}

/// Committed value plus the actions not yet consumed by a commit.
struct StateQueue<T> {
    committed: RefCell<T>,
    pending: RefCell<Vec<Action<T>>>,
}

/// A state cell as seen by one render.
struct StateHook<T> {
    queue: Rc<StateQueue<T>>,
    value: T,
    /// Number of pending actions folded into `value`.
    consumed: usize,
}

impl<T: Clone + PartialEq + 'static> StateHook<T> {
    fn render(queue: Rc<StateQueue<T>>) -> Self {
        let (value, consumed) = {
            let mut value = queue.committed.borrow().clone();
            let pending = queue.pending.borrow();
            for action in pending.iter() {
                value = action.apply(&value);
            }
            (value, pending.len())
        };
        Self {
            queue,
            value,
            consumed,
        }
    }
}

impl<T: Clone + PartialEq + 'static> HookSlot for StateHook<T> {
    fn commit(&self) {
        *self.queue.committed.borrow_mut() = self.value.clone();
        let mut pending = self.queue.pending.borrow_mut();
        let consumed = self.consumed.min(pending.len());
        pending.drain(..consumed);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Setter of a state cell. Cheap to clone; safe to keep after unmount (it
/// then does nothing).
pub struct SetState<T> {
    queue: Weak<StateQueue<T>>,
    sink: Weak<dyn UpdateSink>,
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<T> fmt::Debug for SetState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState")
            .field("live", &(self.queue.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> SetState<T> {
    /// Replace the value.
    ///
    /// Does nothing when no update is pending and `value` equals the
    /// committed value.
    pub fn set(&self, value: T) {
        self.replace(value, None);
    }

    /// Queue a transition computed from the value at the time it is applied.
    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        self.update_with_priority(None, f);
    }

    /// Like [`update`](Self::update), requesting a pass at `priority`.
    pub fn update_with_priority(&self, priority: Option<Priority>, f: impl Fn(&T) -> T + 'static) {
        let Some(queue) = self.queue.upgrade() else { return };
        queue.pending.borrow_mut().push(Action::Update(Rc::new(f)));
        self.notify(priority);
    }

    /// Like [`set`](Self::set), requesting a pass at `priority`. Skipped the
    /// same way when the value is unchanged.
    pub fn set_with_priority(&self, priority: Priority, value: T) {
        self.replace(value, Some(priority));
    }

    /// Value of the last commit, if the cell is still mounted.
    pub fn committed(&self) -> Option<T> {
        self.queue.upgrade().map(|q| q.committed.borrow().clone())
    }

    fn replace(&self, value: T, priority: Option<Priority>) {
        let Some(queue) = self.queue.upgrade() else { return };
        {
            let mut pending = queue.pending.borrow_mut();
            if pending.is_empty() && *queue.committed.borrow() == value {
                trace!("state unchanged, update skipped");
                return;
            }
            pending.push(Action::Replace(value));
        }
        self.notify(priority);
    }

    fn notify(&self, priority: Option<Priority>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.request_update(priority);
        }
    }
}

// =============================================================================
// Effect cells
// =============================================================================

/// Dependency policy of an effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Deps {
    /// No dependency list: run after every commit.
    Always,
    /// Empty list: run on mount, clean up on unmount.
    OnMount,
    /// Run when any value differs from the previous commit.
    On(Vec<Value>),
}

impl Deps {
    /// Dependency-list shorthand.
    pub fn on(values: impl IntoIterator<Item = Value>) -> Self {
        Deps::On(values.into_iter().collect())
    }

    /// Check whether an effect with these deps must re-run given the deps of
    /// the same effect in the previous commit.
    pub fn changed_since(&self, previous: &Deps) -> bool {
        match (self, previous) {
            (Deps::Always, _) => true,
            (Deps::OnMount, _) => false,
            (Deps::On(now), Deps::On(before)) => {
                now.len() != before.len() || now.iter().zip(before).any(|(a, b)| a != b)
            }
            (Deps::On(_), _) => true,
        }
    }
}

/// Effect record of one render.
pub struct Effect {
    callback: Option<EffectCallback>,
    deps: Deps,
    cleanup: Option<Cleanup>,
}

impl Effect {
    pub(crate) fn new(deps: Deps, callback: EffectCallback) -> Self {
        Self {
            callback: Some(callback),
            deps,
            cleanup: None,
        }
    }

    pub fn deps(&self) -> &Deps {
        &self.deps
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    fn run(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.cleanup = callback();
        }
    }

    /// Run the captured cleanup, if any.
    pub(crate) fn clean_up(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("deps", &self.deps)
            .field("pending", &self.callback.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// Run the effects of one committed fiber against the effects of its
/// previous render, position by position.
pub(crate) fn commit_effects(current: &mut [Effect], previous: Vec<Effect>, component: &str) {
    let mut previous = previous.into_iter();
    for effect in current.iter_mut() {
        match previous.next() {
            None => effect.run(),
            Some(mut old) => {
                if effect.deps.changed_since(&old.deps) {
                    old.clean_up();
                    effect.run();
                } else {
                    effect.callback = None;
                    effect.cleanup = old.cleanup.take();
                }
            }
        }
    }

    let mut dropped = 0;
    for mut old in previous {
        old.clean_up();
        dropped += 1;
    }
    if dropped > 0 {
        warn!(component, dropped, "effect count shrank between renders");
    }
}

// =============================================================================
// RenderContext
// =============================================================================

/// Hook context of one component render.
pub struct RenderContext<'a> {
    component: &'a str,
    previous: &'a [Rc<dyn HookSlot>],
    hooks: Vec<Rc<dyn HookSlot>>,
    effects: Vec<Effect>,
    children: &'a [Element],
    sink: &'a Weak<dyn UpdateSink>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        component: &'a str,
        previous: &'a [Rc<dyn HookSlot>],
        children: &'a [Element],
        sink: &'a Weak<dyn UpdateSink>,
    ) -> Self {
        Self {
            component,
            previous,
            hooks: Vec::with_capacity(previous.len()),
            effects: Vec::new(),
            children,
            sink,
        }
    }

    /// Name of the component being rendered.
    pub fn component(&self) -> &str {
        self.component
    }

    /// Children passed to the component element.
    pub fn children(&self) -> &[Element] {
        self.children
    }

    /// State cell. `initial` is used on the first render only.
    ///
    /// # Returns
    /// The value for this render and a setter.
    ///
    /// # Panics
    /// If the cell at this position held a different type last render.
    pub fn use_state<T: Clone + PartialEq + 'static>(&mut self, initial: T) -> (T, SetState<T>) {
        self.use_state_with(|| initial)
    }

    /// State cell with a lazily computed initial value.
    pub fn use_state_with<T: Clone + PartialEq + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> (T, SetState<T>) {
        let index = self.hooks.len();
        let queue = match self.previous.get(index) {
            Some(slot) => match slot.as_any().downcast_ref::<StateHook<T>>() {
                Some(hook) => hook.queue.clone(),
                None => {
                    let error = FiberError::HookOrder {
                        component: self.component.to_string(),
                        index,
                        expected: type_name::<T>(),
                    };
                    panic!("{error}");
                }
            },
            None => Rc::new(StateQueue {
                committed: RefCell::new(init()),
                pending: RefCell::new(Vec::new()),
            }),
        };

        let hook = StateHook::render(queue);
        let value = hook.value.clone();
        let setter = SetState {
            queue: Rc::downgrade(&hook.queue),
            sink: self.sink.clone(),
        };
        self.hooks.push(Rc::new(hook));
        (value, setter)
    }

    /// Effect cell. `effect` runs after commit according to `deps`.
    pub fn use_effect<F>(&mut self, deps: Deps, effect: F)
    where
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.effects.push(Effect::new(deps, Box::new(effect)));
    }

    pub(crate) fn finish(self) -> (Vec<Rc<dyn HookSlot>>, Vec<Effect>) {
        (self.hooks, self.effects)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingSink {
        requests: Cell<usize>,
    }

    impl UpdateSink for CountingSink {
        fn request_update(&self, _priority: Option<Priority>) {
            self.requests.set(self.requests.get() + 1);
        }
    }

    fn render_state(
        previous: &[Rc<dyn HookSlot>],
        sink: &Weak<dyn UpdateSink>,
    ) -> (i32, SetState<i32>, Vec<Rc<dyn HookSlot>>) {
        let mut cx = RenderContext::new("Test", previous, &[], sink);
        let (value, set) = cx.use_state(0);
        let (hooks, _) = cx.finish();
        (value, set, hooks)
    }

    #[test]
    fn test_state_folds_in_order() {
        let sink = Rc::new(CountingSink::default());
        let weak: Weak<dyn UpdateSink> = Rc::downgrade(&sink) as Weak<dyn UpdateSink>;

        let (value, set, hooks) = render_state(&[], &weak);
        assert_eq!(value, 0);
        hooks[0].commit();

        set.update(|n| n + 1);
        set.set(10);
        set.update(|n| n * 2);
        assert_eq!(sink.requests.get(), 3);

        let (value, _, next) = render_state(&hooks, &weak);
        assert_eq!(value, 20);

        // Nothing consumed until commit
        assert_eq!(set.committed(), Some(0));
        next[0].commit();
        assert_eq!(set.committed(), Some(20));

        let (value, _, _) = render_state(&next, &weak);
        assert_eq!(value, 20);
    }

    #[test]
    fn test_discarded_render_keeps_updates() {
        let weak: Weak<dyn UpdateSink> = Weak::<CountingSink>::new();

        let (_, set, hooks) = render_state(&[], &weak);
        hooks[0].commit();
        set.update(|n| n + 5);

        // First render is thrown away
        let (value, _, _) = render_state(&hooks, &weak);
        assert_eq!(value, 5);

        let (value, _, retry) = render_state(&hooks, &weak);
        assert_eq!(value, 5);
        retry[0].commit();
        assert_eq!(set.committed(), Some(5));
    }

    #[test]
    fn test_set_same_value_is_skipped() {
        let sink = Rc::new(CountingSink::default());
        let weak: Weak<dyn UpdateSink> = Rc::downgrade(&sink) as Weak<dyn UpdateSink>;

        let (_, set, hooks) = render_state(&[], &weak);
        hooks[0].commit();

        set.set(0);
        assert_eq!(sink.requests.get(), 0);

        set.set(1);
        set.set(0);
        assert_eq!(sink.requests.get(), 2);
    }

    #[test]
    fn test_set_with_priority_same_value_is_skipped() {
        let sink = Rc::new(CountingSink::default());
        let weak: Weak<dyn UpdateSink> = Rc::downgrade(&sink) as Weak<dyn UpdateSink>;

        let (_, set, hooks) = render_state(&[], &weak);
        hooks[0].commit();

        set.set_with_priority(Priority::Immediate, 0);
        assert_eq!(sink.requests.get(), 0);

        set.set_with_priority(Priority::Immediate, 7);
        assert_eq!(sink.requests.get(), 1);

        // Pending work disables the skip so the queue can return to 0
        set.set_with_priority(Priority::Low, 0);
        assert_eq!(sink.requests.get(), 2);
        let (value, _, _) = render_state(&hooks, &weak);
        assert_eq!(value, 0);
    }

    #[test]
    fn test_setter_after_unmount_is_inert() {
        let sink = Rc::new(CountingSink::default());
        let weak: Weak<dyn UpdateSink> = Rc::downgrade(&sink) as Weak<dyn UpdateSink>;

        let (_, set, hooks) = render_state(&[], &weak);
        drop(hooks);

        set.set(3);
        set.update(|n| n + 1);
        assert_eq!(sink.requests.get(), 0);
        assert_eq!(set.committed(), None);
    }

    #[test]
    #[should_panic(expected = "hook")]
    fn test_hook_type_mismatch_panics() {
        let weak: Weak<dyn UpdateSink> = Weak::<CountingSink>::new();
        let (_, _, hooks) = render_state(&[], &weak);

        let mut cx = RenderContext::new("Test", &hooks, &[], &weak);
        let _ = cx.use_state(String::new());
    }

    #[test]
    fn test_deps_policy() {
        let x = Deps::on([Value::from(1)]);
        let y = Deps::on([Value::from(2)]);

        assert!(Deps::Always.changed_since(&Deps::Always));
        assert!(!Deps::OnMount.changed_since(&Deps::OnMount));
        assert!(!x.changed_since(&x.clone()));
        assert!(x.changed_since(&y));
        assert!(x.changed_since(&Deps::on([Value::from(1), Value::from(1)])));
        assert!(x.changed_since(&Deps::Always));
    }

    #[test]
    fn test_commit_effects_table() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let effect = |name: &'static str, deps: Deps| {
            let log = log.clone();
            Effect::new(
                deps,
                Box::new(move || {
                    log.borrow_mut().push(format!("run {name}"));
                    let log = log.clone();
                    Some(Box::new(move || log.borrow_mut().push(format!("clean {name}"))) as Cleanup)
                }),
            )
        };

        let mut first = vec![
            effect("always", Deps::Always),
            effect("mount", Deps::OnMount),
            effect("x", Deps::on([Value::from(1)])),
        ];
        commit_effects(&mut first, Vec::new(), "Test");
        assert_eq!(*log.borrow(), vec!["run always", "run mount", "run x"]);
        log.borrow_mut().clear();

        let mut second = vec![
            effect("always", Deps::Always),
            effect("mount", Deps::OnMount),
            effect("x", Deps::on([Value::from(1)])),
        ];
        commit_effects(&mut second, first, "Test");
        assert_eq!(*log.borrow(), vec!["clean always", "run always"]);
        assert!(second.iter().all(Effect::has_cleanup));
        log.borrow_mut().clear();

        let mut third = vec![effect("always", Deps::Always)];
        commit_effects(&mut third, second, "Test");
        assert_eq!(
            *log.borrow(),
            vec!["clean always", "run always", "clean mount", "clean x"]
        );
    }
}
