//! Business logic services.

pub mod export;
pub mod identity;

pub use export::{CsvExport, ExportGroup};
pub use identity::{IdentityService, IdentityState};
