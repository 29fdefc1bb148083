//! `vra transparency-verify`: check an auction record's signature.
//!
//! The public key comes from `--public-key` when given, otherwise from the key
//! registry (`--keys`, then `VRA_TRANSPARENCY_KEYS`). With neither, every
//! signed record reports `unknown_key`.

use std::path::Path;

use log::warn;

use vra_transparency::{decode_public_key, verify_auction, ExplicitKey, KeyRegistry, VerifyStatus};

use crate::exit_codes::{verify_status_code, EXIT_SUCCESS};
use crate::{CliError, Context};

pub fn cmd_transparency_verify(
    ctx: &Context,
    auction_id: &str,
    public_key: Option<&str>,
    keys: Option<&Path>,
) -> Result<(), CliError> {
    let store = ctx.open_store()?;

    let report = match public_key {
        Some(b64) => {
            let key = decode_public_key(b64)?;
            verify_auction(&store, auction_id, &ExplicitKey(key))?
        }
        None => {
            let registry = match keys.or(ctx.settings.transparency_keys.as_deref()) {
                Some(path) => KeyRegistry::load(path)?,
                None => {
                    warn!("no key registry configured (--keys or VRA_TRANSPARENCY_KEYS)");
                    KeyRegistry::new()
                }
            };
            verify_auction(&store, auction_id, &registry)?
        }
    };
    ctx.emit(&report)?;

    eprintln!("auction {}: {}", report.auction_id, report.status);
    let code = verify_status_code(report.status);
    if code == EXIT_SUCCESS {
        return Ok(());
    }
    let message = match (report.status, &report.reason) {
        (VerifyStatus::NotApplicable, _) => "record carries no integrity block".to_string(),
        (VerifyStatus::UnknownKey, _) => format!(
            "no public key for key id {}",
            report.key_id.as_deref().unwrap_or("?")
        ),
        (_, Some(reason)) => reason.clone(),
        (status, None) => status.to_string(),
    };
    Err(CliError::exit(code, message))
}
