//! # ComponentSet: ordered fan-out over many components
//!
//! [`ComponentSet`] applies lifecycle calls to its members **in sequence
//! order**, collecting every failure instead of stopping at the first one.
//!
//! ## What it guarantees
//! - `None` placeholders are skipped by every operation and compacted by
//!   every mutating pass (`remove` with no targets compacts too).
//! - `start`/`stop` skip members already in the target state.
//! - One member's failure never aborts the batch; failures come back as one
//!   [`ComponentError::Batch`].
//!
//! ## Diagram
//! ```text
//!   start()
//!     ├─► [a] running?  skip │ else a.start() ─► err? push
//!     ├─► [None]        skip
//!     └─► [b] running?  skip │ else b.start() ─► err? push
//!   errors.is_empty() ? Ok : Err(Batch(errors))
//! ```

use parking_lot::RwLock;

use crate::components::component::LifecycleRef;
use crate::components::ident::Id;
use crate::error::ComponentError;

/// Ordered collection of lifecycle members; `None` entries are placeholders.
#[derive(Default)]
pub struct ComponentSet {
    members: RwLock<Vec<Option<LifecycleRef>>>,
}

impl ComponentSet {
    /// Creates a set holding `members` in order (placeholders included).
    pub fn new(members: impl IntoIterator<Item = Option<LifecycleRef>>) -> Self {
        Self {
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    /// Appends members in order; `None` placeholders are kept until the next `remove`.
    pub fn add(&self, members: impl IntoIterator<Item = Option<LifecycleRef>>) {
        self.members.write().extend(members);
    }

    /// Appends one member.
    pub fn push(&self, member: LifecycleRef) {
        self.members.write().push(Some(member));
    }

    /// Removes every member whose id matches one of `targets` and compacts placeholders.
    pub fn remove(&self, targets: &[LifecycleRef]) {
        self.members.write().retain(|slot| match slot {
            None => false,
            Some(m) => !targets.iter().any(|t| t.id() == m.id()),
        });
    }

    /// First member with the given id.
    pub fn find(&self, id: &Id) -> Option<LifecycleRef> {
        self.members
            .read()
            .iter()
            .flatten()
            .find(|m| m.id() == id)
            .cloned()
    }

    /// Calls `f` for every member in order, skipping placeholders.
    ///
    /// Runs over a snapshot, so `f` may mutate the set.
    pub fn each(&self, mut f: impl FnMut(&LifecycleRef)) {
        for m in self.snapshot() {
            f(&m);
        }
    }

    /// Number of slots, placeholders included.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// `true` if the set has no slots.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Starts every stopped member; aggregates failures.
    pub async fn start(&self) -> Result<(), ComponentError> {
        let mut errs = Vec::new();
        for m in self.snapshot() {
            if m.is_running() {
                continue;
            }
            if let Err(e) = m.start().await {
                tracing::warn!(component = %m.info(), error = %e, "member start failed");
                errs.push(e);
            }
        }
        ComponentError::aggregate(errs)
    }

    /// Stops every running member; aggregates failures.
    pub async fn stop(&self) -> Result<(), ComponentError> {
        let mut errs = Vec::new();
        for m in self.snapshot() {
            if !m.is_running() {
                continue;
            }
            if let Err(e) = m.stop().await {
                tracing::warn!(component = %m.info(), error = %e, "member stop failed");
                errs.push(e);
            }
        }
        ComponentError::aggregate(errs)
    }

    /// Finalizes every member; aggregates failures.
    pub async fn finalize(&self) -> Result<(), ComponentError> {
        let mut errs = Vec::new();
        for m in self.snapshot() {
            if let Err(e) = m.finalize().await {
                errs.push(e);
            }
        }
        ComponentError::aggregate(errs)
    }

    fn snapshot(&self) -> Vec<LifecycleRef> {
        self.members.read().iter().flatten().cloned().collect()
    }
}
