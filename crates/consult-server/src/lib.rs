//! # Consult-Server
//!
//! HTTP front end for [`consult_core`]: REST endpoints for bookings and
//! call events, a server-sent event stream per user and the background
//! sweep that retires expired bookings.

pub mod api;
pub mod config;
pub mod logging;
pub mod scheduler;

pub use api::{create_router, ApiState};
pub use config::ServerConfig;
pub use scheduler::SweepScheduler;
