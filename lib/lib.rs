pub mod artifact_store;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod queue;
pub mod server;
pub mod state;
pub mod status_service;
pub mod store_service;

#[cfg(test)]
mod test_support;
