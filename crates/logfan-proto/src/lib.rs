#![forbid(unsafe_code)]

/// Wire protocol v0 between `logfan-coordinator` and `logfan-worker`.
pub mod v0 {
    #![allow(clippy::derive_partial_eq_without_eq)]
    tonic::include_proto!("logfan.v0");
}
