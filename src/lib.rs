//! weave-compute-daemon: a single-host compute daemon that accepts
//! text-to-image generation requests over a local Unix socket, executes
//! them through an embedded diffusion engine, and returns raw pixel data.
//!
//! This crate covers the request-handling surface: the binary wire
//! protocol, the socket lifecycle, the per-connection accept/request
//! loop, the generation pipeline glue, and shutdown coordination. The
//! inference engine itself is modeled as a trait (`engine::GenerationEngine`)
//! with one deterministic stub implementation; a real build links a GPU
//! backend behind the same trait.

pub mod cli;
pub mod engine;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod socket;
pub mod wire;
