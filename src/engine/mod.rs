pub mod channel;
pub mod coordinator;
pub mod ingest;
pub mod session;
pub mod state_machine;
pub mod tracker;
