//! strato cluster operator library.
//!
//! This crate primarily ships a `cluster-operator` binary, but we expose a
//! small library surface to enable integration testing and reuse.

pub mod cluster;
pub mod config;
pub mod lookup;
pub mod pipeline;
pub mod resources;
pub mod stack;
pub mod template;
pub mod worker;
