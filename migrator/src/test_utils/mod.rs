//! Fakes and fixtures for exercising the coordination components without a database.
//!
//! - [`executor`] records cutover calls and can drain events into a coordinator
//! - [`sampler`] returns scripted load samples
//! - [`postpone`] is an in-memory postpone marker
//! - [`migration`] builds wired-up components for a test migration

pub mod executor;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod migration;
pub mod postpone;
pub mod sampler;
