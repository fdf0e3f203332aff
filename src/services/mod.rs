mod ai;
mod config;
pub mod pipeline;

pub use ai::*;
pub use config::*;

#[cfg(test)]
pub(crate) use ai::testing;
