//! # Movie Gateway Logic
//!
//! The pieces `server_movies` is assembled from, kept in a library so the
//! integration tests can build the exact same router.

pub mod admission;
pub mod config;
pub mod error;
pub mod logger;
pub mod routes;
pub mod state;
