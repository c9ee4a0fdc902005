pub mod config;
pub mod logging;

pub mod analyze;
pub mod control;
pub mod engine;
pub mod job;
pub mod notify;
pub mod origin_guard;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod tickets;
pub mod url_model;
