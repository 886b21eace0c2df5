//! Error types shared across the kernel.

use crate::capacity::CapacitySnapshot;
use crate::config::ConfigError;
use crate::fixed::{SimTime, Weight};
use crate::graph::GraphError;
use crate::id::{EntityKind, PodId, StableId};
use crate::sanity::SanityFinding;
use stowage_stats::SinkError;

/// Errors raised by kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("duplicate identity: {kind} {id} is already registered")]
    DuplicateIdentity { kind: EntityKind, id: u32 },

    #[error("not found: {kind} {id}")]
    NotFound { kind: EntityKind, id: u32 },

    #[error("unknown {selector} variant: {value:?}")]
    UnknownVariant {
        selector: &'static str,
        value: String,
    },

    #[error("subsystem `{subsystem}` failed at t={time}: {source}")]
    SubsystemFailure {
        subsystem: String,
        time: SimTime,
        #[source]
        source: SubsystemError,
    },

    #[error("{pod} cannot take {requested}: only {available} left")]
    InsufficientCapacity {
        pod: PodId,
        requested: Weight,
        available: Weight,
    },

    #[error("{count} units of weight {unit} overflow the weight range")]
    WeightOverflow { unit: Weight, count: u32 },

    #[error("order of {units} units exceeds the limit of {limit}")]
    OrderTooLarge { units: u64, limit: u64 },

    #[error("no {kind} identity left to hand out")]
    IdentityExhausted { kind: EntityKind },

    #[error("invalid state of {kind} {id}: {reason}")]
    InvalidState {
        kind: EntityKind,
        id: u32,
        reason: &'static str,
    },

    #[error("{kind} without units")]
    Empty { kind: EntityKind },

    #[error("the update list is frozen; structural edits are only allowed before the first tick")]
    ScheduleFrozen,

    #[error("the run was aborted by an earlier subsystem failure")]
    RunAborted,

    #[error("capacity totals drifted: incremental {incremental:?}, scanned {scanned:?}")]
    CapacityDrift {
        incremental: CapacitySnapshot,
        scanned: CapacitySnapshot,
    },

    #[error("sanity check refused the run with {} finding(s)", .0.len())]
    SanityRefused(Vec<SanityFinding>),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl KernelError {
    pub(crate) fn not_found<I: StableId>(id: I) -> Self {
        KernelError::NotFound {
            kind: I::KIND,
            id: id.raw(),
        }
    }

    pub(crate) fn invalid<I: StableId>(id: I, reason: &'static str) -> Self {
        KernelError::InvalidState {
            kind: I::KIND,
            id: id.raw(),
            reason,
        }
    }
}

/// Error returned from an `Updateable::update` call.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    /// A kernel operation invoked by the subsystem failed.
    #[error(transparent)]
    Kernel(Box<KernelError>),

    /// The subsystem failed on its own terms.
    #[error("{0}")]
    Failed(String),
}

impl From<KernelError> for SubsystemError {
    fn from(err: KernelError) -> Self {
        SubsystemError::Kernel(Box::new(err))
    }
}

impl From<SinkError> for SubsystemError {
    fn from(err: SinkError) -> Self {
        SubsystemError::Kernel(Box::new(KernelError::Sink(err)))
    }
}
