//! `vra-transparency`: canonical auction payloads, signing, and
//! signature verification.

pub mod canonical;
pub mod error;
pub mod keys;
pub mod payload;
pub mod sign;
pub mod verify;

pub use canonical::canonicalize;
pub use error::TransparencyError;
pub use keys::{decode_public_key, key_id, ExplicitKey, KeyRegistry, KeyResolver};
pub use payload::{auction_payload, canonical_auction};
pub use sign::{sign_auction, ALGO_ED25519};
pub use verify::{verify_auction, verify_record, VerificationReport, VerifyStatus};
