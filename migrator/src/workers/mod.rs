pub mod base;
pub mod throttler;
pub mod watchdog;
