//! The loopback HTTP/WebSocket dashboard (§4.9): one instance per project
//! directory, started on demand and shared by every `devrigd`/`devrigctl`
//! process pointed at the same project.

pub mod rest;
pub mod server;
pub mod ws;

pub use server::{DashboardHandle, DashboardRegistry};
