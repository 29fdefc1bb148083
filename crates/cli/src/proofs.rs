//! `vra issue-proofs` and `vra verify-digest`.

use std::path::Path;

use chrono::Utc;
use log::{info, warn};

use vra_recon::storage::from_settings;
use vra_recon::{build_dispute_kit, verify_kit, EvidenceStorage, KitRequest, StorageBackend};

use crate::exit_codes::{kit_verification_code, EXIT_SUCCESS};
use crate::{CliError, Context};

pub fn cmd_issue_proofs(
    ctx: &Context,
    evidence_ids: &[String],
    network: &str,
    dry_run: bool,
    ttl_sec: Option<u64>,
) -> Result<(), CliError> {
    let storage_settings = &ctx.settings.storage;
    let storage = from_settings(storage_settings)?;
    if !dry_run && storage_settings.backend == StorageBackend::Memory {
        warn!("storage backend is memory; the kit is discarded when vra exits");
    }

    let store = ctx.open_store()?;
    let outcome = build_dispute_kit(
        &store,
        storage.as_ref(),
        &KitRequest {
            evidence_ids,
            network,
            dry_run,
            ttl_sec: ttl_sec.unwrap_or(storage_settings.kit_ttl_sec),
        },
    )?;
    ctx.emit(&outcome)?;

    let meta = &outcome.metadata;
    eprintln!(
        "kit {} ({}): {} deltas, {} bytes, {}, ttl {}s",
        meta.kit_id, meta.network, meta.deltas_count, outcome.size_bytes, meta.checksum, meta.ttl_sec
    );
    if let Some(preview) = &outcome.preview {
        for line in preview {
            eprintln!("  {line}");
        }
    }

    if outcome.dry_run {
        return Err(CliError::warning("preview only: kit not written").with_hint("pass --yes to write the kit"));
    }
    info!("kit {} stored via {}", meta.kit_id, storage.backend_name());
    eprintln!("stored at {}", outcome.storage_uri);
    Ok(())
}

pub fn cmd_verify_digest(ctx: &Context, file: &Path) -> Result<(), CliError> {
    let bytes = std::fs::read(file)
        .map_err(|e| CliError::fatal(format!("cannot read {}: {e}", file.display())))?;
    let report = verify_kit(&bytes, Utc::now())?;
    ctx.emit(&report)?;

    eprintln!(
        "kit {}: checksum {}{}",
        report.kit_id,
        if report.valid { "ok" } else { "MISMATCH" },
        if report.expired { ", expired" } else { "" },
    );

    match kit_verification_code(&report) {
        EXIT_SUCCESS => Ok(()),
        code if !report.valid => Err(CliError::exit(
            code,
            format!(
                "expected {}, found {}",
                report.checksum_expected,
                report.checksum_actual.as_deref().unwrap_or("no evidence file"),
            ),
        )),
        code => Err(CliError::exit(code, "kit has passed its TTL")),
    }
}
