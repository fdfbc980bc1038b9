pub mod core;
pub mod configs;
pub mod faas;
pub mod loggers;
pub mod retrieve;

pub use core::error::NgError;
