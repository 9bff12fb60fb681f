//! Shared fixtures for the crate's tests.

use std::sync::{Arc, Mutex};

use crate::comp::{Component, Kind};

/// An ordinary component carrying one integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Weight(pub u32);
impl Component for Weight {}

/// A second ordinary component, for multi-parameter signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label(pub u32);
impl Component for Label {}

/// A zero-sized tag component.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Flagged;
impl Component for Flagged {
    const KIND: Kind = Kind::Tag;
}

/// A shared component: one instance observed by every holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Config(pub u32);
impl Component for Config {
    const KIND: Kind = Kind::Shared;
}

/// A transient component, wiped on every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pulse(pub u32);
impl Component for Pulse {
    const KIND: Kind = Kind::Transient;
}

/// An immutable component; mutable bindings are rejected.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frozen(pub u32);
impl Component for Frozen {
    const IMMUTABLE: bool = true;
}

/// A numbered marker type for scheduler tests, standing in for otherwise
/// unrelated component types.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Marker<const N: usize>;
impl<const N: usize> Component for Marker<N> {}

/// A log that systems append to, for asserting execution order.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub(crate) fn new() -> Self { Self::default() }

    pub(crate) fn push(&self, event: impl Into<String>) {
        self.events.lock().expect("event log poisoned").push(event.into());
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().expect("event log poisoned"))
    }

    /// Asserts that every event matching `before` is logged ahead of every
    /// event matching `after`.
    pub(crate) fn assert_all_before(events: &[String], before: &str, after: &str) {
        let last_before = events.iter().rposition(|event| event == before);
        let first_after = events.iter().position(|event| event == after);
        if let (Some(last_before), Some(first_after)) = (last_before, first_after) {
            assert!(
                last_before < first_after,
                "expected every `{before}` before any `{after}`: {events:?}",
            );
        }
    }
}
