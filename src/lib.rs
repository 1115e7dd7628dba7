//! Library crate for net-scout: a consent-gated scan orchestrator that runs
//! discovery, web probing and TLS validation and merges them into one report.
pub mod aggregate;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod netdetect;
pub mod orchestrator;
pub mod ports;
pub mod scanner;
pub mod scope;
pub mod server;
pub mod severity;
pub mod state;
pub mod tls;
pub mod types;
pub mod webprobe;
