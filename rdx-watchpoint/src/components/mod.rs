//! The pieces a watcher is assembled from: probes, actions and the built-in
//! conditions.

pub mod action;
pub mod conditions;
pub mod probe;
