pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod external;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod observability;
pub mod services;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
