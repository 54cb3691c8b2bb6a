//! Tenant Sync Library
//!
//! Client-side synchronization for remotely provisioned tenant deployments:
//! session handling, deployment status tracking and pending user actions.

pub mod actions;
pub mod app;
pub mod authn;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod notify;
pub mod storage;
pub mod sync;
#[cfg(any(test, feature = "test"))]
pub mod testing;
pub mod utils;
pub mod workers;
