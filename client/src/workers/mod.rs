pub mod keepalive;
pub mod refresher;
