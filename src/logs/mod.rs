//! Concurrent log ingestion: per-service ring buffers, rotating file
//! persistence, and the process-wide manager tying them together (§4.1–§4.3).

pub mod file_sink;
pub mod manager;
pub mod ring_buffer;

pub use manager::{LogManager, LogManagerRegistry, ServiceLogs};
pub use ring_buffer::{LogBuffer, SubscriberId};
