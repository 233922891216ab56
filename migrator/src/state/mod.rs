//! Shared migration state read and mutated by concurrent workers.

pub mod binlog;
pub mod progress;
pub mod table;
