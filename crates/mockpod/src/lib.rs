//! `mockpod`: an intercepting HTTP/HTTPS proxy library with rule-based
//! response mocking.
//!
//! This crate is the network-interception core described by the project
//! specification: a proxy front-end and Connection Dispatcher, an on-the-fly
//! certificate authority for TLS MITM, a concurrently-mutable Rule Engine,
//! and a Traffic Bus that reports every completed exchange to subscribers.
//! It has no UI dependency and no required persistence layer; [`ProxyCore`]
//! is the single handle an embedder (a GUI, a CLI, or a test harness)
//! constructs and drives.

pub mod ca;
pub mod config;
pub mod error;
pub mod headers;
pub mod proxy;
pub mod rules;
pub mod store;
pub mod telemetry;
pub mod traffic;

mod core;

pub use crate::core::{ProxyCore, ProxyStats};
