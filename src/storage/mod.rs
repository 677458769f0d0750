pub mod engine;
pub mod error;
pub mod models;
pub mod reorder;
