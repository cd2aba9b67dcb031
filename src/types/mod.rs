//! SQL values and column type mapping.

mod mapping;
mod value;

pub use mapping::{ColumnType, TypeMapper, DECLTYPE_METADATA_KEY};
pub use value::{FromValue, Value};
