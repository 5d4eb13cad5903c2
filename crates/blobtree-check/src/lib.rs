//! Consistency checker for blob tree databases.
//!
//! Walks a database and reports where the directory tree, the per-directory
//! key maps and the settings record disagree: leaves nobody owns, entries
//! naming missing leaves, keys that no longer hash to their leaf and the
//! leftovers of interrupted splits.

pub mod checker;
pub mod error;
pub mod report;

pub use checker::Checker;
pub use error::{CheckError, CheckResult};
pub use report::{CheckReport, Problem};
