// Main library entry point for lock-trace.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;
