//! Library crate for host-scan-rs: port spec parsing, concurrent TCP connect
//! scanning, report shaping, and the HTTP API around them.
pub mod logging;
pub mod ports;
pub mod scanner;
pub mod server;
pub mod types;
