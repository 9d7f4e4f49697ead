use thiserror::Error;

/// Error taxonomy of the core. Every variant is fatal for the run: the
/// surrounding collaborator must abort without writing partial output.
#[derive(Error, Debug)]
pub enum BenthosError {
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Reference data: {0}")]
    ReferenceData(String),

    #[error("Cycle detected in reference taxonomy: {0}")]
    CycleDetected(String),

    #[error("Mapping coverage: {0}")]
    MappingCoverage(String),

    #[error("Conservation violated: {0}")]
    Conservation(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BenthosError>;
