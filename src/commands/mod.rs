// ABOUTME: Command implementations for each transfer operation
// ABOUTME: Exports the export, load, and verify commands

pub mod export;
pub mod load;
pub mod verify;

pub use export::{export, ExportRequest};
pub use load::{load, LoadRequest};
pub use verify::{verify, VerifyRequest};
