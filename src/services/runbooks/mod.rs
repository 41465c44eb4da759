//! Versioned runbooks with approval gating

pub mod executor;
pub mod handlers;
pub mod service;
