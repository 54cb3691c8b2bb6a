//! HTTP transport for the provisioning API

pub mod api;
pub mod auth;
pub mod client;
pub mod deployments;
pub mod events;
