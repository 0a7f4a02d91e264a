//! HTTPS front end for the key server.
//!
//! The binary in `main.rs` is a thin shell around [`server::app::Application`];
//! everything it wires together is exposed here so integration tests can run
//! the real router and listener in-process.

pub mod server;
