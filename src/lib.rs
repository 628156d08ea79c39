//! Library crate for edge-probe-rs: a two-stage probe-and-rank pipeline for CDN edge endpoints.
pub mod candidates;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod geo;
pub mod http;
pub mod net;
pub mod pipeline;
pub mod probe;
pub mod rank;
pub mod speed;
pub mod types;
pub mod upload;
