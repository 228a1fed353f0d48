// src/core/agents/mod.rs

//! The agent RPC client set: a typed gRPC client per proxy agent, and the
//! parallel fan-out (`each_client`) the pipeline uses to pause, resume, and
//! health-check all of them at once.

pub mod client;
pub mod fanout;
pub mod proto;

pub use client::AgentHandle;
pub use fanout::{AgentFanout, RealAgentFanout, each_client, health_check_all, pause_all, resume_all};
