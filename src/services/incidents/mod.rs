//! Incident grouping and lifecycle

pub mod handlers;
pub mod service;
