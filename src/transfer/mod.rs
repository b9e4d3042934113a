// ABOUTME: Core chunked transfer pipeline
// ABOUTME: Export, load, resume, manifest, encoding, and checksum verification

pub mod checksum;
pub mod encoding;
pub mod export;
pub mod load;
pub mod manifest;
pub mod resume;
pub mod verify;

pub use checksum::file_sha256;
pub use encoding::{ColumnKind, ColumnValue};
pub use export::{export_table, DataFormat, ExportOptions};
pub use load::{load_chunks_from_manifest, LoadOptions, LoadSummary};
pub use manifest::{short_table_name, ChunkInfo, Manifest};
pub use resume::{log_key, ResumeLog};
pub use verify::{verify_checksums, VerifySummary};
