//! Load based throttling of row copy and event apply work.

mod controller;
mod sampler;

pub use controller::{ThrottleController, ThrottleDecision, ThrottleReason};
pub use sampler::{LoadSample, LoadSampler};
