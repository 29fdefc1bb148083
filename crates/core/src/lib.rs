//! Shared model for venue revenue assurance.
//!
//! Holds the cross-network statement shape, expected revenue, deltas, the
//! fixed-point [`Micros`] amount type, processing [`Window`]s, and the
//! collaborator traits every job receives its data access through.

pub mod amount;
pub mod auction;
pub mod memory;
pub mod model;
pub mod store;
pub mod window;

pub use amount::{AmountError, Micros, MICRO_UNIT_SCALE};
pub use auction::{AuctionRecord, AuctionWinner, CandidateBid, IntegritySignature};
pub use memory::MemoryStore;
pub use model::{
    CurrencyWindowRate, DailyRatio, Delta, DeltaKind, ExpectedRevenueRow, FxObservation,
    IvtTotals, MatchBucket, MatchResult, NormalizedStatementRow, RawStatementRecord, RevenueEvent,
    TransparencyReceipt, ViewabilityPayload, ViewabilitySample,
};
pub use store::{
    AuctionSource, ReceiptSource, ReconStore, RevenueEventSource, StatementStore, StoreError,
    StoreResult,
};
pub use window::{check_row_limit, format_ts, midnight, Window, WindowError};
