pub mod audit;
pub mod config;
pub mod error;
pub mod extension;
pub mod filesystem;
pub mod locate;
pub mod materialize;
pub mod naming;
pub mod orchestrator;
pub mod rewrite;
pub mod runtime;

#[cfg(test)]
mod testing;
