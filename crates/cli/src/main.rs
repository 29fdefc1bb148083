// vra - venue revenue assurance operator commands
//
// One command per job. Human summaries go to stderr, --json results to stdout.

mod exit_codes;
mod jobs;
mod proofs;
mod transparency;
mod window;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use exit_codes::{EXIT_FATAL, EXIT_SUCCESS, EXIT_WARNING};
use vra_core::{StoreError, WindowError};
use vra_io::SqliteStore;
use vra_recon::{ReconError, ReconSettings, RunFlags, StorageError};
use vra_transparency::TransparencyError;

#[derive(Parser)]
#[command(name = "vra")]
#[command(about = "Venue revenue assurance: statements, expected revenue, deltas, dispute kits")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// SQLite database (overrides VRA_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// TOML settings file; VRA_* environment variables still override it
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the result as one JSON document on stdout
    #[arg(long, global = true)]
    json: bool,
}

/// `--from/--to` or `--month`.
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Window start, RFC 3339 or YYYY-MM-DD (inclusive)
    #[arg(long, value_name = "TS", requires = "to", conflicts_with = "month")]
    pub from: Option<String>,

    /// Window end, RFC 3339 or YYYY-MM-DD (exclusive)
    #[arg(long, value_name = "TS", requires = "from", conflicts_with = "month")]
    pub to: Option<String>,

    /// Whole calendar month
    #[arg(long, value_name = "YYYY-MM")]
    pub month: Option<String>,
}

/// Cap overrides shared by every windowed job.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct CapArgs {
    /// Allow a window or row limit above the configured caps (needs --yes)
    #[arg(long)]
    pub force: bool,

    /// Confirm a forced run
    #[arg(long)]
    pub yes: bool,

    /// Row limit for this run (defaults to the configured cap)
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

impl CapArgs {
    pub fn flags(&self, dry_run: bool) -> RunFlags {
        RunFlags {
            dry_run,
            force: self.force,
            confirm: self.yes,
            limit: self.limit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and store one network statement export
    #[command(after_help = "\
Examples:
  vra ingest --network admob --load-id 2026-01-03 --report-id daily file.csv
  cat export.csv | vra ingest --network unity --schema-version v2 --load-id L7 --report-id R1 -")]
    Ingest {
        /// Network name (admob, applovin, unity, ...)
        #[arg(long)]
        network: String,

        /// Export schema version; unknown versions fall back to the newest known
        #[arg(long, default_value = "v1")]
        schema_version: String,

        /// Load identifier, part of the idempotency key
        #[arg(long)]
        load_id: String,

        /// Report identifier, part of the idempotency key
        #[arg(long)]
        report_id: String,

        /// Statement CSV (- for stdin)
        file: PathBuf,
    },

    /// Join transparency receipts with revenue events into expected revenue rows
    #[command(after_help = "\
Examples:
  vra build-expected --from 2026-01-01 --to 2026-01-04
  vra build-expected --from 2026-01-01 --to 2026-01-04 --dry-run --metrics --json")]
    BuildExpected {
        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        caps: CapArgs,

        /// Join and count without writing
        #[arg(long)]
        dry_run: bool,

        /// Report join metrics
        #[arg(long)]
        metrics: bool,
    },

    /// Match normalized statement rows against expected revenue (read-only)
    Match {
        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        caps: CapArgs,
    },

    /// Classify revenue deltas for a window and store them
    #[command(after_help = "\
Exit code 10 means nothing was written: no expected revenue, a dry run,
or every delta already existed.

Examples:
  vra reconcile --from 2026-01-01 --to 2026-01-04
  vra reconcile --month 2026-01 --force --yes --dry-run --json")]
    Reconcile {
        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        caps: CapArgs,

        /// Classify without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Build a redacted dispute kit from stored deltas
    #[command(after_help = "\
Without --yes the kit is only previewed.

Examples:
  vra issue-proofs --network admob ev_3f2a... ev_91bc...
  vra issue-proofs --network admob --yes --json ev_3f2a...")]
    IssueProofs {
        /// Evidence ids of the deltas to include
        #[arg(required = true, value_name = "EVIDENCE_ID")]
        evidence_ids: Vec<String>,

        /// Network the kit is addressed to
        #[arg(long)]
        network: String,

        /// Preview only, even with --yes
        #[arg(long)]
        dry_run: bool,

        /// Write the kit to the configured storage backend
        #[arg(long)]
        yes: bool,

        /// Kit lifetime in seconds (defaults to VRA_KIT_TTL_SEC)
        #[arg(long, value_name = "SECONDS")]
        ttl_sec: Option<u64>,
    },

    /// Check a stored dispute kit's checksum and expiry
    VerifyDigest {
        /// Kit JSON document
        file: PathBuf,
    },

    /// Verify an auction record's Ed25519 signature
    #[command(after_help = "\
Examples:
  vra transparency-verify --auction-id a-1842
  vra transparency-verify --auction-id a-1842 --public-key MCowBQYDK2VwAyEA...
  vra transparency-verify --auction-id a-1842 --keys keys.json --json")]
    TransparencyVerify {
        #[arg(long)]
        auction_id: String,

        /// Base64 public key; overrides registry lookup
        #[arg(long, value_name = "BASE64", conflicts_with = "keys")]
        public_key: Option<String>,

        /// Key registry JSON (defaults to VRA_TRANSPARENCY_KEYS)
        #[arg(long, value_name = "PATH")]
        keys: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version come through here too.
            let code = if e.use_stderr() { EXIT_FATAL } else { EXIT_SUCCESS };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let result = Context::load(&cli.global).and_then(|ctx| match cli.command {
        Commands::Ingest {
            network,
            schema_version,
            load_id,
            report_id,
            file,
        } => jobs::cmd_ingest(&ctx, &network, &schema_version, &load_id, &report_id, &file),
        Commands::BuildExpected {
            window,
            caps,
            dry_run,
            metrics,
        } => jobs::cmd_build_expected(&ctx, &window, caps.flags(dry_run), metrics),
        Commands::Match { window, caps } => jobs::cmd_match(&ctx, &window, caps.flags(false)),
        Commands::Reconcile {
            window,
            caps,
            dry_run,
        } => jobs::cmd_reconcile(&ctx, &window, caps.flags(dry_run)),
        Commands::IssueProofs {
            evidence_ids,
            network,
            dry_run,
            yes,
            ttl_sec,
        } => proofs::cmd_issue_proofs(&ctx, &evidence_ids, &network, dry_run || !yes, ttl_sec),
        Commands::VerifyDigest { file } => proofs::cmd_verify_digest(&ctx, &file),
        Commands::TransparencyVerify {
            auction_id,
            public_key,
            keys,
        } => transparency::cmd_transparency_verify(&ctx, &auction_id, public_key.as_deref(), keys.as_deref()),
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                let label = if code == EXIT_WARNING { "warning" } else { "error" };
                eprintln!("{label}: {message}");
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {hint}");
            }
            ExitCode::from(code)
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation context
// ---------------------------------------------------------------------------

/// Settings and output mode for one invocation. Settings are read fresh
/// every run so operators can retune thresholds between runs.
pub struct Context {
    pub settings: ReconSettings,
    pub json: bool,
    db_path: PathBuf,
}

impl Context {
    fn load(global: &GlobalArgs) -> Result<Self, CliError> {
        let settings = ReconSettings::load(global.config.as_deref())?;
        let db_path = global.db.clone().unwrap_or_else(|| settings.db_path.clone());
        Ok(Self {
            settings,
            json: global.json,
            db_path,
        })
    }

    pub fn open_store(&self) -> Result<SqliteStore, CliError> {
        SqliteStore::open(&self.db_path).map_err(|e| {
            CliError::fatal(format!("cannot open database {}: {e}", self.db_path.display()))
                .with_hint("set --db or VRA_DB_PATH")
        })
    }

    /// Print `value` as JSON on stdout when `--json` was given.
    pub fn emit<T: Serialize>(&self, value: &T) -> Result<(), CliError> {
        if self.json {
            let text = serde_json::to_string_pretty(value)
                .map_err(|e| CliError::fatal(format!("JSON serialization error: {e}")))?;
            println!("{text}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self { code: EXIT_FATAL, message: msg.into(), hint: None }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self { code: EXIT_WARNING, message: msg.into(), hint: None }
    }

    /// Non-success exit with an explicit code.
    pub fn exit(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<WindowError> for CliError {
    fn from(err: WindowError) -> Self {
        let hint = match &err {
            WindowError::InvalidTimestamp(_) | WindowError::Empty { .. } => {
                Some("windows are half-open: --from 2026-01-01 --to 2026-01-04")
            }
            _ => None,
        };
        Self {
            code: EXIT_FATAL,
            message: err.to_string(),
            hint: hint.map(String::from),
        }
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        match err {
            ReconError::Window(w) => w.into(),
            ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => {
                Self::fatal(err.to_string()).with_hint("check --config and the VRA_* environment variables")
            }
            ReconError::MissingEvidence(_) => {
                Self::fatal(err.to_string()).with_hint("run `vra reconcile` for the window first")
            }
            other => Self::fatal(other.to_string()),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::fatal(err.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(err: StorageError) -> Self {
        Self::fatal(err.to_string()).with_hint("check VRA_STORAGE_BACKEND and its settings")
    }
}

impl From<TransparencyError> for CliError {
    fn from(err: TransparencyError) -> Self {
        Self::fatal(err.to_string())
    }
}
