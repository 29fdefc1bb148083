//! Dispute kits: redacted, checksummed evidence bundles.
//!
//! A kit is one JSON document:
//!
//! ```json
//! {
//!   "metadata": { "kit_id": "...", "generated_at": "...", "network": "...",
//!                 "deltas_count": 2, "checksum": "sha256:...", "ttl_sec": 604800,
//!                 "content_type": "application/json" },
//!   "files": { "evidence.csv": "evidence_id,kind,..." }
//! }
//! ```
//!
//! Redaction runs on every `reason_code` before the CSV exists, so nothing
//! unredacted is ever serialized, previewed, or stored.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use vra_core::{Delta, ReconStore};
use vra_io::evidence_csv_string;

use crate::error::ReconError;
use crate::redact::Redactor;
use crate::storage::EvidenceStorage;

pub const KIT_CONTENT_TYPE: &str = "application/json";
pub const EVIDENCE_FILE: &str = "evidence.csv";
/// Returned in place of a storage URI when nothing was written.
pub const DRY_RUN_URI: &str = "dryrun://not-written";
pub const PREVIEW_LINES: usize = 5;
const MAX_TTL_SEC: u64 = 100 * 365 * 86_400;

#[derive(Debug, Clone)]
pub struct KitRequest<'a> {
    pub evidence_ids: &'a [String],
    pub network: &'a str,
    pub dry_run: bool,
    pub ttl_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KitMetadata {
    pub kit_id: String,
    pub generated_at: DateTime<Utc>,
    pub network: String,
    pub deltas_count: usize,
    pub checksum: String,
    pub ttl_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KitDocument {
    pub metadata: KitMetadata,
    pub files: BTreeMap<String, String>,
}

/// Result of a kit build. The metadata is the same block written into the
/// kit document, so a dry run shows exactly what would be stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KitOutcome {
    #[serde(flatten)]
    pub metadata: KitMetadata,
    pub size_bytes: usize,
    pub storage_uri: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<String>>,
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

fn valid_network(network: &str) -> bool {
    !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn object_key(network: &str, kit_id: &str) -> String {
    format!("dispute-kits/{network}/{kit_id}.json")
}

/// Build a kit for the given evidence ids and, unless dry-run, store it.
///
/// Every id must resolve to a stored delta; otherwise nothing is built.
pub fn build_dispute_kit(
    store: &dyn ReconStore,
    storage: &dyn EvidenceStorage,
    req: &KitRequest<'_>,
) -> Result<KitOutcome, ReconError> {
    let network = req.network.trim().to_ascii_lowercase();
    if !valid_network(&network) {
        return Err(ReconError::InvalidArgument(format!("invalid network '{}'", req.network)));
    }
    let ids: Vec<String> = req
        .evidence_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Err(ReconError::InvalidArgument("no evidence ids given".into()));
    }

    let deltas = store.deltas_by_evidence_ids(&ids)?;
    let found: BTreeSet<&str> = deltas.iter().map(|d| d.evidence_id.as_str()).collect();
    let missing: Vec<String> = ids.iter().filter(|id| !found.contains(id.as_str())).cloned().collect();
    if !missing.is_empty() {
        return Err(ReconError::MissingEvidence(missing));
    }

    let redactor = Redactor::new()?;
    let redacted = deltas
        .into_iter()
        .map(|d| {
            Ok(Delta {
                reason_code: redactor.redact(&d.reason_code)?,
                ..d
            })
        })
        .collect::<Result<Vec<_>, ReconError>>()?;

    let csv = evidence_csv_string(&redacted)?;
    let digest = checksum(csv.as_bytes());
    let kit_id = format!("kit_{}", Uuid::new_v4().simple());
    let preview: Option<Vec<String>> = req
        .dry_run
        .then(|| csv.lines().take(PREVIEW_LINES).map(str::to_string).collect());

    let document = KitDocument {
        metadata: KitMetadata {
            kit_id: kit_id.clone(),
            generated_at: Utc::now(),
            network: network.clone(),
            deltas_count: redacted.len(),
            checksum: digest,
            ttl_sec: req.ttl_sec,
            content_type: Some(KIT_CONTENT_TYPE.to_string()),
        },
        files: BTreeMap::from([(EVIDENCE_FILE.to_string(), csv)]),
    };
    let bytes = serde_json::to_vec_pretty(&document)?;

    let storage_uri = if req.dry_run {
        DRY_RUN_URI.to_string()
    } else {
        let key = object_key(&network, &kit_id);
        storage.put_object(&key, &bytes, KIT_CONTENT_TYPE, req.ttl_sec)?
    };
    let KitDocument { metadata, .. } = document;

    info!(
        "dispute kit {kit_id} network={network} deltas={} bytes={} backend={} dry_run={}",
        redacted.len(),
        bytes.len(),
        storage.backend_name(),
        req.dry_run
    );

    Ok(KitOutcome {
        metadata,
        size_bytes: bytes.len(),
        storage_uri,
        dry_run: req.dry_run,
        preview,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KitVerification {
    pub kit_id: String,
    pub valid: bool,
    pub expired: bool,
    pub checksum_expected: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_actual: Option<String>,
}

/// Recompute a stored kit's checksum and check its TTL against `now`.
pub fn verify_kit(document: &[u8], now: DateTime<Utc>) -> Result<KitVerification, ReconError> {
    let doc: KitDocument = serde_json::from_slice(document)?;
    let actual = doc.files.get(EVIDENCE_FILE).map(|csv| checksum(csv.as_bytes()));
    let ttl = Duration::seconds(doc.metadata.ttl_sec.min(MAX_TTL_SEC) as i64);
    let expired = doc
        .metadata
        .generated_at
        .checked_add_signed(ttl)
        .map_or(false, |expires| now > expires);

    Ok(KitVerification {
        valid: actual.as_deref() == Some(doc.metadata.checksum.as_str()),
        expired,
        kit_id: doc.metadata.kit_id,
        checksum_expected: doc.metadata.checksum,
        checksum_actual: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vra_core::{DeltaKind, MemoryStore, Micros, Window};

    use crate::storage::MemoryStorage;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let w = Window::month("2026-01").unwrap();
        store
            .insert_deltas(&[Delta {
                kind: DeltaKind::Underpay,
                amount: Micros::from_units(20),
                currency: "USD".into(),
                reason_code: "underpay flagged by ops@venue.example card 4111111111111111".into(),
                window_start: w.from,
                window_end: w.to,
                evidence_id: "ev_1".into(),
                confidence: 0.75,
            }])
            .unwrap();
        store
    }

    fn request<'a>(ids: &'a [String], dry_run: bool) -> KitRequest<'a> {
        KitRequest {
            evidence_ids: ids,
            network: "AdMob",
            dry_run,
            ttl_sec: 3600,
        }
    }

    #[test]
    fn stores_redacted_kit() {
        let store = seeded();
        let storage = MemoryStorage::new();
        let ids = vec!["ev_1".to_string()];
        let out = build_dispute_kit(&store, &storage, &request(&ids, false)).unwrap();

        assert!(out.metadata.kit_id.starts_with("kit_"));
        assert_eq!(out.storage_uri, format!("memory://dispute-kits/admob/{}.json", out.metadata.kit_id));
        let stored = storage.get(&object_key("admob", &out.metadata.kit_id)).unwrap();
        assert_eq!(stored.content_type, KIT_CONTENT_TYPE);
        assert_eq!(stored.bytes.len(), out.size_bytes);

        let text = String::from_utf8(stored.bytes.clone()).unwrap();
        assert!(!text.contains("ops@venue.example"));
        assert!(!text.contains("4111111111111111"));
        assert!(text.contains("[REDACTED_EMAIL]"));

        let check = verify_kit(&stored.bytes, Utc::now()).unwrap();
        assert!(check.valid);
        assert!(!check.expired);
        assert_eq!(check.checksum_expected, out.metadata.checksum);
    }

    #[test]
    fn dry_run_never_touches_storage() {
        let store = seeded();
        let storage = MemoryStorage::new();
        let ids = vec!["ev_1".to_string()];
        let out = build_dispute_kit(&store, &storage, &request(&ids, true)).unwrap();
        assert_eq!(out.storage_uri, DRY_RUN_URI);
        assert_eq!(storage.put_count(), 0);
        assert_eq!(out.metadata.network, "admob");
        assert_eq!(out.metadata.ttl_sec, 3600);
        assert_eq!(out.metadata.deltas_count, 1);
        assert!(out.metadata.generated_at <= Utc::now());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["network"], "admob");
        assert_eq!(json["ttl_sec"], 3600);
        assert_eq!(json["content_type"], KIT_CONTENT_TYPE);
        assert!(json["generated_at"].is_string());
        let preview = out.preview.unwrap();
        assert_eq!(preview.len(), 2);
        assert!(preview[1].contains("[REDACTED_NUMBER]"));
    }

    #[test]
    fn missing_evidence_is_fatal() {
        let store = seeded();
        let storage = MemoryStorage::new();
        let ids = vec!["ev_1".to_string(), "ev_nope".to_string()];
        match build_dispute_kit(&store, &storage, &request(&ids, false)) {
            Err(ReconError::MissingEvidence(missing)) => assert_eq!(missing, vec!["ev_nope"]),
            other => panic!("expected MissingEvidence, got {other:?}"),
        }
        assert_eq!(storage.put_count(), 0);
    }

    #[test]
    fn tampered_or_expired_kits_are_reported() {
        let store = seeded();
        let storage = MemoryStorage::new();
        let ids = vec!["ev_1".to_string()];
        let out = build_dispute_kit(&store, &storage, &request(&ids, false)).unwrap();
        let bytes = storage.get(&object_key("admob", &out.metadata.kit_id)).unwrap().bytes;

        let later = Utc::now() + Duration::hours(2);
        assert!(verify_kit(&bytes, later).unwrap().expired);

        let mut doc: KitDocument = serde_json::from_slice(&bytes).unwrap();
        doc.files.insert(EVIDENCE_FILE.into(), "evidence_id\nforged\n".into());
        let check = verify_kit(&serde_json::to_vec(&doc).unwrap(), Utc::now()).unwrap();
        assert!(!check.valid);
        assert_ne!(check.checksum_actual.as_deref(), Some(out.metadata.checksum.as_str()));
    }

    #[test]
    fn rejects_bad_network() {
        let store = seeded();
        let ids = vec!["ev_1".to_string()];
        let req = KitRequest {
            network: "../etc",
            ..request(&ids, true)
        };
        assert!(matches!(
            build_dispute_kit(&store, &MemoryStorage::new(), &req),
            Err(ReconError::InvalidArgument(_))
        ));
    }
}
