//! Activation context module
//!
//! Turns external activation requests into structured hints for the agent.

mod activation;

pub use activation::{ActivationContext, ActivationRequest};
