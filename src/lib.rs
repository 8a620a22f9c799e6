//! minigrid - a small compute cluster simulator
//!
//! Worker nodes register capacity, pods are placed on nodes by a first-fit
//! policy, nodes report liveness via heartbeats, and node failure triggers
//! automatic workload relocation. See [`cluster`] for the state engine and
//! [`agent`] for the simulated worker process.

pub mod agent;
pub mod cli;
pub mod cluster;
