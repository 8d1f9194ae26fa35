pub mod cache;
pub mod controller;
pub mod crd;
pub mod error;
pub mod queue;
pub mod recorder;
pub mod registry;
pub mod signal;
pub mod trace;

#[cfg(test)]
mod testing;
