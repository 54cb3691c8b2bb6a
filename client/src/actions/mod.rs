pub mod delete;
pub mod registry;
pub mod scale;
