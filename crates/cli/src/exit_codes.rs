//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `vra` exit codes.
//! Schedulers and wrappers branch on them, so they are part of the shell contract.
//!
//! | Code | Meaning                                                          |
//! |------|------------------------------------------------------------------|
//! | 0    | Success: the job ran and had an effect                           |
//! | 10   | Warning: no-op, dry run, zero effect, or a soft verification miss |
//! | 20   | Fatal: bad arguments, invalid window, or an execution failure     |
//!
//! Argument parsing errors from clap are folded into 20 as well.

use vra_recon::KitVerification;
use vra_transparency::VerifyStatus;

/// Success - the command completed and changed or verified something.
pub const EXIT_SUCCESS: u8 = 0;

/// Warning - nothing to do, dry run, or the run had no effect.
/// Re-running is safe; inspect stderr for the reason.
pub const EXIT_WARNING: u8 = 10;

/// Fatal - the invocation failed. Fix the cause and re-run.
pub const EXIT_FATAL: u8 = 20;

/// Exit code for an auction signature check.
///
/// A record that was never signed is a warning, not a failure.
pub fn verify_status_code(status: VerifyStatus) -> u8 {
    match status {
        VerifyStatus::Pass => EXIT_SUCCESS,
        VerifyStatus::NotApplicable => EXIT_WARNING,
        VerifyStatus::Fail | VerifyStatus::UnknownKey => EXIT_FATAL,
    }
}

/// Exit code for a dispute kit digest check.
pub fn kit_verification_code(report: &KitVerification) -> u8 {
    if !report.valid {
        EXIT_FATAL
    } else if report.expired {
        EXIT_WARNING
    } else {
        EXIT_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_WARNING);
        assert_ne!(EXIT_WARNING, EXIT_FATAL);
        assert_ne!(EXIT_SUCCESS, EXIT_FATAL);
    }

    #[test]
    fn verify_statuses() {
        assert_eq!(verify_status_code(VerifyStatus::Pass), EXIT_SUCCESS);
        assert_eq!(verify_status_code(VerifyStatus::NotApplicable), EXIT_WARNING);
        assert_eq!(verify_status_code(VerifyStatus::Fail), EXIT_FATAL);
        assert_eq!(verify_status_code(VerifyStatus::UnknownKey), EXIT_FATAL);
    }

    #[test]
    fn kit_checks() {
        let report = |valid, expired| KitVerification {
            kit_id: "kit_x".into(),
            valid,
            expired,
            checksum_expected: "sha256:aa".into(),
            checksum_actual: Some("sha256:aa".into()),
        };
        assert_eq!(kit_verification_code(&report(true, false)), EXIT_SUCCESS);
        assert_eq!(kit_verification_code(&report(true, true)), EXIT_WARNING);
        assert_eq!(kit_verification_code(&report(false, false)), EXIT_FATAL);
        assert_eq!(kit_verification_code(&report(false, true)), EXIT_FATAL);
    }
}
