#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod aggregator;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod service;
