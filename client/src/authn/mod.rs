//! Session lifecycle: tokens, storage, refresh and account operations

pub mod account;
pub mod session;
pub mod session_mngr;
pub mod store;
