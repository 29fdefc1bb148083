use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use vra_core::window::{check_row_limit, DEFAULT_MAX_ROWS, DEFAULT_MAX_WINDOW_DAYS};
use vra_core::Window;
use vra_io::SUPPORTED_NETWORKS;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

/// Tunables for one job invocation.
///
/// Built fresh at every entry point (defaults, then an optional TOML file,
/// then `VRA_*` environment variables) so operators can retune between runs
/// without restarting anything.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconSettings {
    pub thresholds: Thresholds,
    pub matching: MatchOptions,
    pub caps: Caps,
    pub ingest: IngestSettings,
    pub storage: StorageSettings,
    pub db_path: PathBuf,
    pub transparency_keys: Option<PathBuf>,
}

impl Default for ReconSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            matching: MatchOptions::default(),
            caps: Caps::default(),
            ingest: IngestSettings::default(),
            storage: StorageSettings::default(),
            db_path: PathBuf::from("vra.db"),
            transparency_keys: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Fraction of expected revenue a residual gap may reach before it is an underpay.
    pub underpay_tolerance: f64,
    /// Added to the baseline p95 IVT ratio (fraction, 0.02 = 2pp).
    pub ivt_band: f64,
    /// Relative FX deviation from the baseline median.
    pub fx_band: f64,
    /// Percentage points between OM-measured and statement viewability.
    pub viewability_gap_pp: f64,
    pub baseline_days: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            underpay_tolerance: 0.02,
            ivt_band: 0.02,
            fx_band: 0.005,
            viewability_gap_pp: 15.0,
            baseline_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchOptions {
    pub time_window_sec: u64,
    pub auto_threshold: f64,
    pub min_confidence: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            time_window_sec: 86_400,
            auto_threshold: 0.8,
            min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Caps {
    pub max_window_days: u32,
    pub max_rows: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_window_days: DEFAULT_MAX_WINDOW_DAYS,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl Caps {
    /// Check a job's window and row limit against the caps. Returns the
    /// effective row limit.
    pub fn admit(&self, window: &Window, flags: &RunFlags) -> Result<usize, ReconError> {
        window.enforce_caps(self.max_window_days, flags.force, flags.confirm)?;
        Ok(check_row_limit(flags.limit, self.max_rows, flags.force, flags.confirm)?)
    }
}

/// Row count to request from a store so that overflow past `limit` is visible.
pub fn fetch_limit(limit: usize) -> usize {
    limit.saturating_add(1)
}

/// Cut rows fetched with [`fetch_limit`] back to `limit`. The flag is true
/// when the window held more rows than the job may process.
pub fn within_limit<T>(mut rows: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let truncated = rows.len() > limit;
    rows.truncate(limit);
    (rows, truncated)
}

/// Per-invocation operator flags shared by the windowed jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub dry_run: bool,
    pub force: bool,
    /// Second half of the cap override; `--yes` on the command line.
    pub confirm: bool,
    pub limit: Option<usize>,
}

impl RunFlags {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSettings {
    pub allowed_networks: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            allowed_networks: SUPPORTED_NETWORKS.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl IngestSettings {
    pub fn allows(&self, network: &str) -> bool {
        self.allowed_networks.iter().any(|n| n.eq_ignore_ascii_case(network))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Fs,
    Object,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Fs => write!(f, "fs"),
            Self::Object => write!(f, "object"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "fs" | "filesystem" => Ok(Self::Fs),
            "object" | "s3" => Ok(Self::Object),
            other => Err(ReconError::ConfigValidation(format!(
                "unknown storage backend '{other}' (expected memory, fs, or object)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub fs_root: PathBuf,
    pub object_endpoint: Option<String>,
    pub object_bucket: Option<String>,
    pub object_token: Option<String>,
    pub kit_ttl_sec: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            fs_root: PathBuf::from("./dispute-kits"),
            object_endpoint: None,
            object_bucket: None,
            object_token: None,
            kit_ttl_sec: 604_800,
        }
    }
}

// ---------------------------------------------------------------------------
// Load: defaults → file → environment
// ---------------------------------------------------------------------------

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T, ReconError> {
    raw.trim()
        .parse()
        .map_err(|_| ReconError::ConfigValidation(format!("{key}: invalid value '{raw}'")))
}

impl ReconSettings {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))
    }

    /// Settings from the process environment and an optional TOML file.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ReconError> {
        Self::load_with(config_file, |key| std::env::var(key).ok())
    }

    /// Like [`ReconSettings::load`] with an explicit variable lookup.
    pub fn load_with(
        config_file: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ReconError> {
        let mut settings = match config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ReconError::ConfigParse(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        settings.apply_env(lookup)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ReconError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("VRA_UNDERPAY_TOLERANCE") {
            self.thresholds.underpay_tolerance = parse_env("VRA_UNDERPAY_TOLERANCE", &v)?;
        }
        if let Some(v) = get("VRA_IVT_BAND") {
            self.thresholds.ivt_band = parse_env("VRA_IVT_BAND", &v)?;
        }
        if let Some(v) = get("VRA_FX_BAND") {
            self.thresholds.fx_band = parse_env("VRA_FX_BAND", &v)?;
        }
        if let Some(v) = get("VRA_VIEWABILITY_GAP_PP") {
            self.thresholds.viewability_gap_pp = parse_env("VRA_VIEWABILITY_GAP_PP", &v)?;
        }
        if let Some(v) = get("VRA_BASELINE_DAYS") {
            self.thresholds.baseline_days = parse_env("VRA_BASELINE_DAYS", &v)?;
        }
        if let Some(v) = get("VRA_ALLOWED_NETWORKS") {
            self.ingest.allowed_networks = v
                .split(',')
                .map(|n| n.trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect();
        }
        if let Some(v) = get("VRA_MAX_WINDOW_DAYS") {
            self.caps.max_window_days = parse_env("VRA_MAX_WINDOW_DAYS", &v)?;
        }
        if let Some(v) = get("VRA_MAX_ROWS") {
            self.caps.max_rows = parse_env("VRA_MAX_ROWS", &v)?;
        }
        if let Some(v) = get("VRA_MATCH_TIME_WINDOW_SEC") {
            self.matching.time_window_sec = parse_env("VRA_MATCH_TIME_WINDOW_SEC", &v)?;
        }
        if let Some(v) = get("VRA_MATCH_AUTO_THRESHOLD") {
            self.matching.auto_threshold = parse_env("VRA_MATCH_AUTO_THRESHOLD", &v)?;
        }
        if let Some(v) = get("VRA_MATCH_MIN_CONFIDENCE") {
            self.matching.min_confidence = parse_env("VRA_MATCH_MIN_CONFIDENCE", &v)?;
        }
        if let Some(v) = get("VRA_KIT_TTL_SEC") {
            self.storage.kit_ttl_sec = parse_env("VRA_KIT_TTL_SEC", &v)?;
        }
        if let Some(v) = get("VRA_STORAGE_BACKEND") {
            self.storage.backend = v.parse()?;
        }
        if let Some(v) = get("VRA_STORAGE_FS_ROOT") {
            self.storage.fs_root = PathBuf::from(v);
        }
        if let Some(v) = get("VRA_OBJECT_ENDPOINT") {
            self.storage.object_endpoint = Some(v);
        }
        if let Some(v) = get("VRA_OBJECT_BUCKET") {
            self.storage.object_bucket = Some(v);
        }
        if let Some(v) = get("VRA_OBJECT_TOKEN") {
            self.storage.object_token = Some(v);
        }
        if let Some(v) = get("VRA_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("VRA_TRANSPARENCY_KEYS") {
            self.transparency_keys = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let bad = |msg: String| Err(ReconError::ConfigValidation(msg));
        let t = &self.thresholds;

        for (name, value) in [
            ("underpay_tolerance", t.underpay_tolerance),
            ("ivt_band", t.ivt_band),
            ("fx_band", t.fx_band),
            ("viewability_gap_pp", t.viewability_gap_pp),
        ] {
            if !value.is_finite() || value < 0.0 {
                return bad(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        if t.baseline_days == 0 {
            return bad("baseline_days must be at least 1".into());
        }

        let m = &self.matching;
        for (name, value) in [
            ("auto_threshold", m.auto_threshold),
            ("min_confidence", m.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return bad(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if m.min_confidence > m.auto_threshold {
            return bad(format!(
                "min_confidence ({}) must not exceed auto_threshold ({})",
                m.min_confidence, m.auto_threshold
            ));
        }

        if self.caps.max_window_days == 0 || self.caps.max_rows == 0 {
            return bad("window and row caps must be positive".into());
        }

        if self.storage.backend == StorageBackend::Object
            && (self.storage.object_endpoint.is_none() || self.storage.object_bucket.is_none())
        {
            return bad("object storage needs VRA_OBJECT_ENDPOINT and VRA_OBJECT_BUCKET".into());
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let s = ReconSettings::load_with(None, env(&[])).unwrap();
        assert_eq!(s.thresholds.underpay_tolerance, 0.02);
        assert_eq!(s.thresholds.viewability_gap_pp, 15.0);
        assert_eq!(s.matching.auto_threshold, 0.8);
        assert_eq!(s.caps.max_window_days, 3);
        assert_eq!(s.caps.max_rows, 10_000);
        assert_eq!(s.storage.backend, StorageBackend::Memory);
        assert_eq!(s.ingest.allowed_networks.len(), 14);
        assert!(s.ingest.allows("AdMob"));
    }

    #[test]
    fn environment_overrides() {
        let s = ReconSettings::load_with(
            None,
            env(&[
                ("VRA_UNDERPAY_TOLERANCE", "0.05"),
                ("VRA_ALLOWED_NETWORKS", "admob, Unity,"),
                ("VRA_STORAGE_BACKEND", "fs"),
                ("VRA_STORAGE_FS_ROOT", "/tmp/kits"),
                ("VRA_MAX_ROWS", ""),
            ]),
        )
        .unwrap();
        assert_eq!(s.thresholds.underpay_tolerance, 0.05);
        assert_eq!(s.ingest.allowed_networks, vec!["admob", "unity"]);
        assert!(!s.ingest.allows("meta"));
        assert_eq!(s.storage.backend, StorageBackend::Fs);
        assert_eq!(s.storage.fs_root, PathBuf::from("/tmp/kits"));
        assert_eq!(s.caps.max_rows, 10_000);
    }

    #[test]
    fn bad_environment_value_names_the_variable() {
        let err = ReconSettings::load_with(None, env(&[("VRA_IVT_BAND", "two")])).unwrap_err();
        assert!(err.to_string().contains("VRA_IVT_BAND"));
    }

    #[test]
    fn toml_then_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vra.toml");
        std::fs::write(
            &path,
            r#"
db_path = "recon.db"

[thresholds]
fx_band = 0.01
baseline_days = 14

[matching]
auto_threshold = 0.9
"#,
        )
        .unwrap();
        let s = ReconSettings::load_with(Some(&path), env(&[("VRA_FX_BAND", "0.02")])).unwrap();
        assert_eq!(s.thresholds.fx_band, 0.02);
        assert_eq!(s.thresholds.baseline_days, 14);
        assert_eq!(s.matching.auto_threshold, 0.9);
        assert_eq!(s.matching.min_confidence, 0.5);
        assert_eq!(s.db_path, PathBuf::from("recon.db"));
    }

    #[test]
    fn caps_admit_with_override() {
        let caps = Caps::default();
        let long = Window::parse_bound("2026-01-01")
            .and_then(|from| Window::parse_bound("2026-01-08").and_then(|to| Window::new(from, to)))
            .unwrap();
        assert!(caps.admit(&long, &RunFlags::default()).is_err());
        let forced = RunFlags {
            force: true,
            confirm: true,
            limit: Some(50_000),
            ..RunFlags::default()
        };
        assert_eq!(caps.admit(&long, &forced).unwrap(), 50_000);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(ReconSettings::from_toml("[thresholds]\nunderpay = 0.1\n").is_err());
    }

    #[test]
    fn validation() {
        let mut s = ReconSettings::default();
        s.matching.min_confidence = 0.9;
        assert!(s.validate().is_err());

        let mut s = ReconSettings::default();
        s.thresholds.ivt_band = -0.01;
        assert!(s.validate().is_err());

        let mut s = ReconSettings::default();
        s.storage.backend = StorageBackend::Object;
        assert!(s.validate().is_err());
        s.storage.object_endpoint = Some("https://objects.example".into());
        s.storage.object_bucket = Some("kits".into());
        assert!(s.validate().is_ok());
    }
}
