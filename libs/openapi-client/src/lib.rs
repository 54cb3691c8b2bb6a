//! Wire models shared with the tenant provisioning API.

pub mod models;
