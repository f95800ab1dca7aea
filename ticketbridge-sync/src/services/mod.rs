pub mod idempotency;
pub mod orchestrator;
pub mod replay;
