pub mod codec;
pub mod config;
pub mod filter;
pub mod model;
