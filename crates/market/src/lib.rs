pub mod error;
pub mod factory;
pub mod history;
pub mod hub;
pub mod index;
pub mod monitor;
pub mod registry;
