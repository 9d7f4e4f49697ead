//! Taxonomic reconciliation and abundance distribution for benthic
//! macroinvertebrate monitoring data, built on the Dutch TWN species list.

pub mod config;
pub mod diagnostics;
pub mod diversity;
pub mod error;
pub mod mapping;
pub mod protocol;
pub mod schema;
pub mod taxonomy;
pub mod tree;
pub mod twn;

pub use config::{AnchorSet, DiversityLevel, Protocol, ProtocolConfig};
pub use error::{BenthosError, Result};
pub use tree::TwnTree;
