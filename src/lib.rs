//! # htm-sp - the Spatial Pooler of a Hierarchical Temporal Memory system
//!
//! The Spatial Pooler (SP) converts dense or sparse binary input vectors into
//! stable sparse distributed representations (SDRs). A population of columns
//! competes over the input space: each column owns a receptive field of
//! proximal synapses, computes an overlap score against the current input,
//! is optionally boosted to compensate for historically low activity, and
//! finally passes through an inhibition step that enforces sparsity.
//!
//! The crate is organised around a small data model:
//!
//! - [`core::config::HtmConfig`] - the immutable parameter bundle.
//! - [`core::store`] - an addressable key-value store that can run as a
//!   single in-memory map or be partitioned round-robin across several
//!   backing maps.
//! - [`core::matrix::SparseMatrix`] - a bidirectional mapping between
//!   multi-dimensional coordinates and flat indices, backed by the store.
//! - [`core::connections::Connections`] - the aggregate of all columns,
//!   their synapses, and the engine-wide statistic arrays.
//! - [`core::spatial_pooler::SpatialPooler`] - the overlap / inhibition /
//!   boosting / adaptation algorithm; it owns no data, it operates on a
//!   `Connections` instance.
//! - [`core::homeostasis::HomeostaticPlasticityController`] - observes the
//!   stream of active-column sets and signals when the learned
//!   representation has become stable.
//!
//! Temporal memory, encoders and classifiers are separate subsystems and are
//! not part of this crate.

pub mod core;

pub use crate::core::config::HtmConfig;
pub use crate::core::connections::Connections;
pub use crate::core::homeostasis::{
    HomeostaticPlasticityController, HpcParams, StabilityEvent,
};
pub use crate::core::serialization::TextSerializable;
pub use crate::core::spatial_pooler::SpatialPooler;
pub use error::{HtmError, Result};

/// Error types for the crate.
pub mod error {
    use thiserror::Error;

    /// Main error type for spatial pooling operations.
    ///
    /// Configuration and addressing errors are not recoverable locally and
    /// surface to the caller. Numeric invariant violations (permanence or
    /// duty cycle leaving `[0, 1]`) are clamped and logged at the write site
    /// instead of being raised, so long training runs stay alive.
    #[derive(Error, Debug)]
    pub enum HtmError {
        /// A parameter failed validation at initialization time.
        #[error("invalid configuration '{name}': {message}")]
        InvalidConfig {
            /// Name of the offending parameter.
            name: &'static str,
            /// Description of the problem.
            message: String,
        },

        /// A flat index was outside the configured space.
        #[error("index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// A coordinate tuple was outside the configured dimensions.
        #[error("coordinates {coordinates:?} out of bounds (dimensions: {dimensions:?})")]
        CoordinatesOutOfBounds {
            /// The invalid coordinates.
            coordinates: Vec<usize>,
            /// The configured dimension sizes.
            dimensions: Vec<usize>,
        },

        /// An insert used a key that is already present in the store.
        #[error("duplicate key {key} inserted into store")]
        DuplicateKey {
            /// The duplicated key.
            key: usize,
        },

        /// A lookup or removal did not find the key in any partition.
        #[error("key {key} not found in store")]
        KeyNotFound {
            /// The missing key.
            key: usize,
        },

        /// A distributed-only operation was invoked against a backend that
        /// does not support it.
        #[error("operation '{operation}' is not supported by backend '{backend}'")]
        UnsupportedOperation {
            /// Name of the invoked operation.
            operation: &'static str,
            /// Name of the backend type.
            backend: &'static str,
        },

        /// A compute cycle selected no active columns even though the input
        /// carried active bits. This indicates a misconfiguration (for
        /// example a stimulus threshold above every reachable overlap).
        #[error("no active columns in cycle {cycle}; check stimulus threshold and potential pool sizes")]
        NoActiveColumns {
            /// The compute cycle that produced the empty activation.
            cycle: u32,
        },

        /// The text serialization stream was malformed.
        #[error("serialization error: {0}")]
        Serialization(String),

        /// An I/O error during serialization.
        #[error("i/o error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Result type alias using [`HtmError`].
    pub type Result<T> = std::result::Result<T, HtmError>;
}
