// src/core/agents/proto.rs

//! Generated client/server types for the agent RPC service, compiled from
//! `proto/agent.proto` by `tonic-prost-build` (see `build.rs`).

pub mod agent {
    tonic::include_proto!("failover.agent");
}
