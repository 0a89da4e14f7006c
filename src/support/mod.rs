pub mod errors;
pub mod id;
pub mod queue;
pub mod shutdown;
pub mod timestamp;

pub use errors::{AppError, DomainError, InfraError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
