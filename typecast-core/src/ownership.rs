#![forbid(unsafe_code)]

use thiserror::Error;
use typecast_ast::OwnershipMode;

use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u32);

/// Lifecycle state of a single handle.
///
/// The only transitions are `Valid -> Moved` and `Valid -> Destroyed`.
/// Copying leaves the source `Valid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleState {
    Valid,
    Moved,
    Destroyed,
}

impl HandleState {
    pub fn allows_use(&self) -> bool {
        matches!(self, HandleState::Valid)
    }

    pub fn display(&self) -> &'static str {
        match self {
            HandleState::Valid => "valid",
            HandleState::Moved => "moved-from",
            HandleState::Destroyed => "destroyed",
        }
    }

    /// Violation raised by touching a handle in this state, if any.
    fn use_violation(&self) -> Option<ViolationKind> {
        match self {
            HandleState::Valid => None,
            HandleState::Moved => Some(ViolationKind::UseAfterMove),
            HandleState::Destroyed => Some(ViolationKind::UseAfterRelease),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ViolationKind {
    #[error("handle used after its ownership was moved away")]
    UseAfterMove,
    #[error("unique handles cannot be copied")]
    NonCopyable,
    #[error("handle released twice")]
    DoubleRelease,
    #[error("handle used after it was released")]
    UseAfterRelease,
}

impl ViolationKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ViolationKind::UseAfterMove => "UseAfterMoveError",
            ViolationKind::NonCopyable => "NonCopyableError",
            ViolationKind::DoubleRelease => "DoubleReleaseError",
            ViolationKind::UseAfterRelease => "UseAfterReleaseError",
        }
    }
}

#[derive(Clone, Debug)]
struct Handle {
    mode: OwnershipMode,
    pointee: Type,
    lineage: usize,
    state: HandleState,
}

/// Handles that alias one allocation. `live` counts `Valid` members.
#[derive(Clone, Debug)]
struct Lineage {
    live: u32,
    freed: bool,
}

/// Outcome of a successful release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    /// Other handles still keep the pointee alive.
    Shared { remaining: u32 },
    /// The last owner is gone.
    Freed,
}

#[derive(Debug, Default)]
pub struct OwnershipTracker {
    handles: Vec<Handle>,
    lineages: Vec<Lineage>,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make(&mut self, mode: OwnershipMode, pointee: Type) -> HandleId {
        let lineage = self.lineages.len();
        self.lineages.push(Lineage {
            live: 1,
            freed: false,
        });
        let id = self.push(mode, pointee, lineage);
        tracing::debug!(handle = id.0, mode = mode.display(), "handle constructed");
        id
    }

    pub fn make_unique(&mut self, pointee: Type) -> HandleId {
        self.make(OwnershipMode::Unique, pointee)
    }

    pub fn make_shared(&mut self, pointee: Type) -> HandleId {
        self.make(OwnershipMode::Shared, pointee)
    }

    fn push(&mut self, mode: OwnershipMode, pointee: Type, lineage: usize) -> HandleId {
        let id = HandleId(self.handles.len() as u32);
        self.handles.push(Handle {
            mode,
            pointee,
            lineage,
            state: HandleState::Valid,
        });
        id
    }

    fn handle(&self, id: HandleId) -> &Handle {
        &self.handles[id.0 as usize]
    }

    /// Any non-ownership operation: dereference, member access, comparison.
    pub fn use_handle(&self, id: HandleId) -> Result<(), ViolationKind> {
        match self.handle(id).state.use_violation() {
            Some(v) => Err(v),
            None => Ok(()),
        }
    }

    /// Transfers ownership to a fresh handle. The source becomes `Moved`.
    pub fn move_handle(&mut self, id: HandleId) -> Result<HandleId, ViolationKind> {
        self.use_handle(id)?;
        let (mode, pointee, lineage) = {
            let h = &mut self.handles[id.0 as usize];
            h.state = HandleState::Moved;
            (h.mode, h.pointee.clone(), h.lineage)
        };
        let to = self.push(mode, pointee, lineage);
        tracing::debug!(from = id.0, to = to.0, "handle moved");
        Ok(to)
    }

    /// Shared handles only; bumps the lineage's reference count.
    pub fn copy(&mut self, id: HandleId) -> Result<HandleId, ViolationKind> {
        self.use_handle(id)?;
        let h = self.handle(id);
        if h.mode == OwnershipMode::Unique {
            return Err(ViolationKind::NonCopyable);
        }
        let (mode, pointee, lineage) = (h.mode, h.pointee.clone(), h.lineage);
        self.lineages[lineage].live += 1;
        let to = self.push(mode, pointee, lineage);
        tracing::debug!(
            from = id.0,
            to = to.0,
            count = self.lineages[lineage].live,
            "shared handle copied"
        );
        Ok(to)
    }

    pub fn release(&mut self, id: HandleId) -> Result<Released, ViolationKind> {
        let h = &mut self.handles[id.0 as usize];
        match h.state {
            HandleState::Destroyed => return Err(ViolationKind::DoubleRelease),
            HandleState::Moved => return Err(ViolationKind::UseAfterMove),
            HandleState::Valid => h.state = HandleState::Destroyed,
        }
        let lineage = &mut self.lineages[h.lineage];
        lineage.live = lineage.live.saturating_sub(1);
        let outcome = if lineage.live == 0 {
            lineage.freed = true;
            Released::Freed
        } else {
            Released::Shared {
                remaining: lineage.live,
            }
        };
        tracing::debug!(handle = id.0, ?outcome, "handle released");
        Ok(outcome)
    }

    pub fn state(&self, id: HandleId) -> HandleState {
        self.handle(id).state
    }

    /// Live handles sharing `id`'s pointee, `id` included if still valid.
    pub fn ref_count(&self, id: HandleId) -> u32 {
        self.lineages[self.handle(id).lineage].live
    }

    pub fn is_freed(&self, id: HandleId) -> bool {
        self.lineages[self.handle(id).lineage].freed
    }

    pub fn mode(&self, id: HandleId) -> OwnershipMode {
        self.handle(id).mode
    }

    pub fn pointee(&self, id: HandleId) -> &Type {
        &self.handle(id).pointee
    }
}
