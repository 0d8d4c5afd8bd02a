//! Opportunity scanner for the spot/futures carry.
//!
//! Admits a symbol when its entry spread and funding rate both meet their
//! thresholds, ranks admitted symbols by spread and keeps the top K.

pub mod config;
pub mod error;
pub mod scanner;

pub use config::ScannerConfig;
pub use error::{ScannerError, ScannerResult};
pub use scanner::{Candidate, OpportunityScanner};
