//! Table and column descriptors produced by the migration planner.
//!
//! These are plain values: they are captured once when the migration is planned and never change
//! afterwards. The live counterpart tracking chunk progress is [`crate::state::table::Table`].

mod table;

pub use table::{ColumnList, ColumnValues, TableDescriptor, TableName, UniqueKey};
