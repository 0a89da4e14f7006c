//! Ephemeral port reservation and "kill holder" reclamation (§4.4).

pub mod port_manager;

pub use port_manager::{PortManager, PortReservation};
