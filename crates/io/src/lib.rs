// Statement normalization, evidence CSV, and the SQLite store

pub mod evidence;
pub mod networks;
pub mod normalize;
pub mod sqlite;

pub use evidence::{evidence_csv_string, write_evidence_csv, EVIDENCE_HEADER};
pub use networks::{is_supported, SUPPORTED_NETWORKS};
pub use normalize::{normalize, NormalizeError, NormalizeOutput, RowError};
pub use sqlite::SqliteStore;

/// BLAKE3 of a raw payload (hex), recorded in the statement audit table.
pub fn payload_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
