//! Enter/exit bookkeeping for call-level profiling.
//!
//! The tracker does not discover calls itself. An event source (the
//! `#[mbench::track]` macro, or manual [`enter`](crate::enter) /
//! [`exit`](crate::exit) calls) reports every call boundary together with the
//! module the call was made from. Each accepted `enter` stores a resource
//! [`Snapshot`]; the matching `exit` turns it into [`Deltas`] and folds them
//! into the [`AggregateStore`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::sampler::{Deltas, ResourceSampler, Snapshot};
use crate::store::AggregateStore;

/// Identity of a traced unit: its qualified name and defining module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite<'a> {
    pub name: &'a str,
    pub module: &'a str,
}

impl<'a> CallSite<'a> {
    pub fn new(name: &'a str, module: &'a str) -> Self {
        Self { name, module }
    }
}

/// Which invocations the tracker records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Calls made from the target module.
    Caller,
    /// Calls of functions defined in the target module.
    Callee,
    /// Every call, regardless of module.
    #[default]
    All,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "caller" => Ok(Mode::Caller),
            "callee" => Ok(Mode::Callee),
            "all" => Ok(Mode::All),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Caller => write!(f, "caller"),
            Mode::Callee => write!(f, "callee"),
            Mode::All => write!(f, "all"),
        }
    }
}

/// Module filter applied to both `enter` and `exit` events. Exact match only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    target_module: Option<String>,
    mode: Mode,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(target_module: impl Into<String>, mode: Mode) -> Self {
        Self {
            target_module: Some(target_module.into()),
            mode,
        }
    }

    pub fn target_module(&self) -> Option<&str> {
        self.target_module.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn accepts(&self, site: &CallSite<'_>, invoking_module: &str) -> bool {
        match (self.mode, self.target_module.as_deref()) {
            (Mode::All, _) => true,
            (Mode::Callee, Some(target)) => site.module == target,
            (Mode::Caller, Some(target)) => invoking_module == target,
            (_, None) => false,
        }
    }
}

/// What happens when a name is entered again before it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotPolicy {
    /// One slot per key: a second `enter` overwrites the first snapshot, so
    /// the outer call of a recursion is measured from the innermost start.
    Shared,
    /// A stack per key: properly nested calls each keep their own snapshot.
    #[default]
    Nested,
}

/// How in-flight calls are keyed. Aggregation is always by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Keying {
    /// By name only; concurrent threads share slots.
    Name,
    /// By name and OS thread id.
    #[default]
    NameAndThread,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub name: String,
    pub tid: Option<u64>,
}

/// Start-of-call readings, alive between `enter` and the matching `exit`.
#[derive(Debug, Clone, Copy)]
pub struct InFlightCall {
    pub start: Snapshot,
}

/// Storage for in-flight calls.
///
/// The tracker only needs these operations, so a sharded or lock-free store
/// can replace [`HashMapInFlight`] without touching the tracker.
pub trait InFlightStore: Send {
    /// Innermost call stored under `key`.
    fn get(&self, key: &InFlightKey) -> Option<&InFlightCall>;

    fn update(&mut self, key: InFlightKey, call: InFlightCall, policy: SlotPolicy);

    /// Removes and returns the innermost call stored under `key`.
    fn remove(&mut self, key: &InFlightKey) -> Option<InFlightCall>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&InFlightKey, &InFlightCall)> + '_>;
}

#[derive(Debug, Default)]
pub struct HashMapInFlight {
    slots: HashMap<InFlightKey, Vec<InFlightCall>>,
}

impl InFlightStore for HashMapInFlight {
    fn get(&self, key: &InFlightKey) -> Option<&InFlightCall> {
        self.slots.get(key).and_then(|stack| stack.last())
    }

    fn update(&mut self, key: InFlightKey, call: InFlightCall, policy: SlotPolicy) {
        let stack = self.slots.entry(key).or_default();
        if policy == SlotPolicy::Shared {
            stack.clear();
        }
        stack.push(call);
    }

    fn remove(&mut self, key: &InFlightKey) -> Option<InFlightCall> {
        let stack = self.slots.get_mut(key)?;
        let call = stack.pop();
        if stack.is_empty() {
            self.slots.remove(key);
        }
        call
    }

    fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&InFlightKey, &InFlightCall)> + '_> {
        Box::new(
            self.slots
                .iter()
                .flat_map(|(key, stack)| stack.iter().map(move |call| (key, call))),
        )
    }
}

/// Per-call state machine: Untracked → InFlight on `enter`, back on `exit`.
pub struct CallTracker {
    filter: Filter,
    slot_policy: SlotPolicy,
    keying: Keying,
    in_flight: Box<dyn InFlightStore>,
}

impl CallTracker {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            slot_policy: SlotPolicy::default(),
            keying: Keying::default(),
            in_flight: Box::new(HashMapInFlight::default()),
        }
    }

    pub fn slot_policy(mut self, policy: SlotPolicy) -> Self {
        self.slot_policy = policy;
        self
    }

    pub fn keying(mut self, keying: Keying) -> Self {
        self.keying = keying;
        self
    }

    pub fn in_flight_store(mut self, store: Box<dyn InFlightStore>) -> Self {
        self.in_flight = store;
        self
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    /// Number of calls currently awaiting their `exit`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_calls(&self) -> impl Iterator<Item = (&InFlightKey, &InFlightCall)> + '_ {
        self.in_flight.iter()
    }

    fn key(&self, site: &CallSite<'_>) -> InFlightKey {
        InFlightKey {
            name: site.name.to_string(),
            tid: match self.keying {
                Keying::Name => None,
                Keying::NameAndThread => Some(crate::tid::current_tid()),
            },
        }
    }

    /// Records the start of a call. Returns whether the call is tracked.
    pub fn enter(
        &mut self,
        site: &CallSite<'_>,
        invoking_module: &str,
        sampler: &dyn ResourceSampler,
    ) -> bool {
        if !self.filter.accepts(site, invoking_module) {
            return false;
        }
        let key = self.key(site);
        let call = InFlightCall {
            start: sampler.snapshot(),
        };
        self.in_flight.update(key, call, self.slot_policy);
        true
    }

    /// Closes the innermost in-flight call of `site` and folds its deltas
    /// into `store`.
    ///
    /// Filtered-out sites and exits without a matching `enter` are ignored.
    pub fn exit(
        &mut self,
        site: &CallSite<'_>,
        invoking_module: &str,
        sampler: &dyn ResourceSampler,
        store: &mut AggregateStore,
    ) -> Option<Deltas> {
        if !self.filter.accepts(site, invoking_module) {
            return None;
        }
        let key = self.key(site);
        let call = self.in_flight.remove(&key)?;
        let deltas = Deltas::between(&call.start, &sampler.snapshot());
        store.update(site.name, &deltas);
        Some(deltas)
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new(Filter::all())
    }
}
