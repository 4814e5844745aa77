//! Per-service node factories.
//!
//! Each factory knows its image, deterministic node name, volume layout, and
//! configuration delivery for one cluster role. Inter-service addresses use
//! container names (resolved by the engine's embedded DNS on the shared
//! network), never IPs, so nodes survive stop/start without re-addressing.

pub mod consul;
pub mod loadbalancer;
pub mod nomad;
pub mod vault;
