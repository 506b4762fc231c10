//! Link-ratio selection for cumulative loss triangles: per-column development
//! factors, an editable library of averaging formulas, manual and automatic
//! exclusions, cumulative-to-ultimate projection, cross-view sync, and JSON
//! persistence keyed by dataset scope.

pub mod average;
pub mod library;
pub mod persist;
pub mod projection;
pub mod ratio;
pub mod selection;
pub mod sync;
pub mod triangle;
pub mod types;
