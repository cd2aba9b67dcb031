//! Arrow data format conversion utilities.
//!
//! This module converts row-major query results into Apache Arrow columnar
//! format.

mod builders;
mod converter;

pub use builders::build_array;
pub use converter::ArrowConverter;
