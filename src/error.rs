//! Error types for index construction, persistence and distributed builds.

use thiserror::Error;

/// Errors surfaced by the index core.
///
/// Geometric predicates never fail; errors come from invariant-violating
/// inputs, persistence, the distributed build pipeline and cancellation.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A gid does not fit the 36-bit field of a packed morphology id.
    #[error("invalid gid: {0} does not fit in {} bits", crate::ids::GID_BITS)]
    InvalidGid(u64),

    /// A section id does not fit its 14-bit field.
    #[error("invalid section_id: {0} does not fit in {} bits", crate::ids::SECTION_BITS)]
    InvalidSectionId(u32),

    /// A segment id does not fit its 14-bit field.
    #[error("invalid segment_id: {0} does not fit in {} bits", crate::ids::SEGMENT_BITS)]
    InvalidSegmentId(u32),

    /// A sphere or cylinder was constructed with a negative radius.
    #[error("invalid radius: {0} is negative")]
    NegativeRadius(f64),

    /// A cylinder was constructed with coincident endpoints.
    #[error("degenerate cylinder: p1 and p2 coincide")]
    DegenerateCylinder,

    /// The on-disk structure version is newer than this build understands.
    #[error(
        "file format is in a future format (version {file_version}, supported {supported}); \
         please update neurospace"
    )]
    FutureFormat { file_version: u16, supported: u16 },

    /// The file does not start with the expected magic bytes.
    #[error("not a neurospace index file (bad magic)")]
    BadMagic,

    /// Distributed builds need enough elements to fill every partition.
    #[error("too few elements for a distributed build: {n_elements} < {required}")]
    TooFewElements { n_elements: usize, required: usize },

    /// The mapped arena cannot hold the index being written.
    #[error("mapped arena too small: need {needed} bytes, capacity is {capacity}")]
    ArenaFull { needed: usize, capacity: usize },

    /// Propagated I/O failure; on-disk state may be partial but never silently corrupt.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A cancellation request was observed at a poll point.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, IndexError>;
