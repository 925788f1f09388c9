//! Composition root for the user notification bus.
//!
//! - [`config`] -- service settings loaded from the environment.
//! - [`global`] -- the process-wide bus accessor.
//! - [`handlers`] -- log-only handlers for watched users' events.
//! - [`health`] -- periodic broker ping.

pub mod config;
pub mod global;
pub mod handlers;
pub mod health;
