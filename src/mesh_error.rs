//! DgMeshError: Unified error type for dg-fem-mesh public APIs
//!
//! Every stage of the mesh pipeline (distribution, face construction,
//! standard elements, metrics) reports failures through this type. The four
//! fatal classes are kept distinct so a driver can print a precise diagnostic
//! before the collective abort.

use thiserror::Error;

/// Boxed message carried by communication failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommError(pub String);

impl From<String> for CommError {
    fn from(s: String) -> Self {
        CommError(s)
    }
}

impl From<&str> for CommError {
    fn from(s: &str) -> Self {
        CommError(s.to_owned())
    }
}

/// Unified error type for dg-fem-mesh operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DgMeshError {
    /// A global-ID lookup that must succeed did not (corrupt mesh or partition).
    #[error("mesh inconsistency: {0}")]
    MeshInconsistency(String),
    /// Non-matching (hanging-node) interior faces are not supported.
    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),
    /// Non-positive Jacobian or singular mass matrix.
    #[error("geometry degeneracy: {0}")]
    GeometryDegeneracy(String),
    /// Face corners could not be located among the element corners.
    #[error("corner correspondence failure: {0}")]
    CorrespondenceFailure(String),
    /// Communication failure with a neighbor rank.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: CommError,
    },
    /// A received buffer does not have the announced size.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Malformed wire record.
    #[error("wire format error: {0}")]
    WireFormat(String),
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Failure inside a dense linear-algebra kernel.
    #[error("linear algebra failure: {0}")]
    LinearAlgebra(String),
}

impl DgMeshError {
    /// Short class name used in abort diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            DgMeshError::MeshInconsistency(_) => "FatalMeshInconsistency",
            DgMeshError::UnsupportedTopology(_) => "FatalUnsupportedTopology",
            DgMeshError::GeometryDegeneracy(_) | DgMeshError::LinearAlgebra(_) => {
                "FatalGeometryDegeneracy"
            }
            DgMeshError::CorrespondenceFailure(_) => "FatalCorrespondenceFailure",
            DgMeshError::CommError { .. }
            | DgMeshError::BufferSizeMismatch { .. }
            | DgMeshError::WireFormat(_) => "FatalCommunication",
            DgMeshError::InvalidConfig(_) => "FatalConfiguration",
        }
    }
}
