pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use session::ChartSession;
