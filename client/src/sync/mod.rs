//! Deployment status reconciliation

pub mod engine;
pub mod state;
pub mod tracker;
