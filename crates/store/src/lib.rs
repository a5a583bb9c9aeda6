pub mod config;
pub mod daily;
