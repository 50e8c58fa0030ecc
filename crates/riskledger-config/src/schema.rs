use riskledger_core::{Band, ExecutionContext, RiskLevel, ScopeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::template::KeyTemplate;

/// Upper bound for configured durations (`ttl_secs`, `auto_extend.window_secs`): 100 years.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Root configuration, maps to `riskledger.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLedgerConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for RiskLedgerConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), ProfileConfig::default());
        let mut channels = HashMap::new();
        channels.insert(
            "log".to_string(),
            ChannelConfig {
                channel_type: "log".into(),
                enabled: true,
                url: None,
            },
        );
        Self {
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            channels,
            profiles,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// What a charge resolves to when the store cannot give a definite answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Treat the outcome as insolvency across every resolved bucket.
    #[default]
    Closed,
    /// Let the action proceed, flagged as an unknown outcome.
    Open,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket store backend: "memory" or "sqlite".
    pub backend: StoreBackend,
    /// Path to the SQLite database (sqlite backend only).
    pub db_path: PathBuf,
    /// Upper bound for one authorize-and-burn round trip, in milliseconds.
    pub timeout_ms: u64,
    /// Behavior when the store times out or is unreachable.
    pub fail_mode: FailMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_path: PathBuf::from("riskledger.db"),
            timeout_ms: 500,
            fail_mode: FailMode::Closed,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Notification channels ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Sink type: "log", "webhook", or "event_bus".
    #[serde(rename = "type")]
    pub channel_type: String,
    /// Whether this channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Target URL for webhook channels.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_true() -> bool {
    true
}

// ── Profiles ───────────────────────────────────────────────────

/// A named bundle of bucket specs, band policies, auto-extension and notification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub buckets: Vec<BucketSpec>,
    #[serde(default)]
    pub policies: PolicyTable,
    #[serde(default)]
    pub auto_extend: Option<AutoExtendSpec>,
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            buckets: vec![
                BucketSpec {
                    name: "execution".into(),
                    scope: ScopeKind::Execution,
                    key: "{execution_id}".into(),
                    limit: 1_000,
                    ttl_secs: Some(86_400),
                    thresholds: default_thresholds(),
                },
                BucketSpec {
                    name: "global".into(),
                    scope: ScopeKind::Global,
                    key: "all".into(),
                    limit: 1_000_000,
                    ttl_secs: None,
                    thresholds: default_thresholds(),
                },
            ],
            policies: PolicyTable {
                green: None,
                yellow: Some(Policy {
                    degrade: BTreeMap::from([("model_tier".to_string(), "reduce".to_string())]),
                    ..Policy::default()
                }),
                orange: Some(Policy {
                    blocked_actions: vec!["WRITE".into(), "DEPLOY".into()],
                    degrade: BTreeMap::from([("model_tier".to_string(), "minimal".to_string())]),
                    throttle_ms: Some(1_000),
                    max_retries: Some(1),
                    ..Policy::default()
                }),
                red: Some(Policy {
                    exhaustion: Exhaustion::Halt,
                    emit_mode: EmitMode::PartialResult,
                    fallback: Some("SUMMARY_ONLY".into()),
                    ..Policy::default()
                }),
            },
            auto_extend: None,
            notifications: vec![NotificationRule {
                to: Band::Red,
                channel: "log".into(),
                include_options: false,
            }],
        }
    }
}

/// Template for one budget dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub scope: ScopeKind,
    /// Key template resolved against execution context fields, e.g. `"{agent_id}"`.
    pub key: String,
    /// Initial limit in risk units.
    pub limit: u64,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Fractional spend cutoffs, strictly increasing. Green is implicit below the first.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub band: Band,
    pub at: f64,
}

pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            band: Band::Yellow,
            at: 0.70,
        },
        Threshold {
            band: Band::Orange,
            at: 0.90,
        },
        Threshold {
            band: Band::Red,
            at: 1.00,
        },
    ]
}

/// Per-band policies of a profile. A missing band means "no restrictions".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub green: Option<Policy>,
    pub yellow: Option<Policy>,
    pub orange: Option<Policy>,
    pub red: Option<Policy>,
}

impl PolicyTable {
    pub fn get(&self, band: Band) -> Option<&Policy> {
        match band {
            Band::Green => self.green.as_ref(),
            Band::Yellow => self.yellow.as_ref(),
            Band::Orange => self.orange.as_ref(),
            Band::Red => self.red.as_ref(),
        }
    }
}

/// How a RED bucket ends the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exhaustion {
    /// Surface a governance failure to the caller, with no fallback.
    ThrowException,
    /// Stop gracefully, emitting according to `emit_mode` and `fallback`.
    #[default]
    Halt,
}

/// What a halted execution may still emit. Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitMode {
    #[default]
    Full,
    PartialResult,
    None,
}

/// Behavior bound to one severity band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Allowed action kinds. `None` or a list containing `"*"` allows everything.
    pub allowed_actions: Option<Vec<String>>,
    pub blocked_actions: Vec<String>,
    /// Opaque degradation directives, e.g. `model_tier = "reduce"`.
    pub degrade: BTreeMap<String, String>,
    /// Minimum delay before the next action, in milliseconds.
    pub throttle_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub exhaustion: Exhaustion,
    pub emit_mode: EmitMode,
    /// Opaque fallback token interpreted by the caller, e.g. `"SUMMARY_ONLY"`.
    pub fallback: Option<String>,
}

/// Conditions and bounds for granting extra budget without a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoExtendSpec {
    /// Cumulative extension allowed per bucket within one window.
    pub max_extra: u64,
    pub window_secs: u64,
    /// Extension requires the execution's error rate to be strictly below this.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Extension requires the execution's risk level to be at or below this.
    #[serde(default = "default_max_risk_level")]
    pub max_risk_level: RiskLevel,
    #[serde(default = "default_true")]
    pub require_no_blocked_actions: bool,
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_max_risk_level() -> RiskLevel {
    RiskLevel::Medium
}

/// Notify `channel` whenever a bucket transitions into band `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub to: Band,
    pub channel: String,
    #[serde(default)]
    pub include_options: bool,
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   -> {}", h)?;
        }
        Ok(())
    }
}

impl RiskLedgerConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Store ───
        if self.store.timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "store.timeout_ms".into(),
                message: "timeout is 0, every charge would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 500".into()),
            });
        }
        if self.store.fail_mode == FailMode::Open {
            warnings.push(ConfigWarning {
                field: "store.fail_mode".into(),
                message: "fail-open lets actions proceed when the store is unreachable".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'closed' unless availability matters more than budget".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // ── Channels ───
        let valid_channel_types = ["log", "webhook", "event_bus"];
        for (id, ch) in &self.channels {
            if !valid_channel_types.contains(&ch.channel_type.as_str()) {
                warnings.push(ConfigWarning {
                    field: format!("channels.{}.type", id),
                    message: format!("unknown channel type '{}'", ch.channel_type),
                    severity: WarningSeverity::Error,
                    hint: Some(format!("Supported: {}", valid_channel_types.join(", "))),
                });
            }
            if ch.channel_type == "webhook" && ch.url.as_deref().is_none_or(str::is_empty) {
                warnings.push(ConfigWarning {
                    field: format!("channels.{}.url", id),
                    message: "webhook channel has no url".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        // ── Profiles ───
        if self.profiles.is_empty() {
            warnings.push(ConfigWarning {
                field: "profiles".into(),
                message: "no profiles defined, every charge will fail".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Define at least [profiles.default]".into()),
            });
        }
        for (name, profile) in &self.profiles {
            self.validate_profile(name, profile, &mut warnings);
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }

    fn validate_profile(&self, name: &str, profile: &ProfileConfig, warnings: &mut Vec<ConfigWarning>) {
        if profile.buckets.is_empty() {
            warnings.push(ConfigWarning {
                field: format!("profiles.{name}.buckets"),
                message: "profile has no buckets".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        let mut seen = HashSet::new();
        let mut counters = HashSet::new();
        for bucket in &profile.buckets {
            let field = format!("profiles.{name}.buckets.{}", bucket.name);
            if !seen.insert(bucket.name.as_str()) {
                warnings.push(ConfigWarning {
                    field: field.clone(),
                    message: "duplicate bucket name".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if !counters.insert((bucket.scope.prefix(), bucket.key.as_str())) {
                warnings.push(ConfigWarning {
                    field: format!("{field}.key"),
                    message: format!("another bucket already uses {} key '{}'", bucket.scope.prefix(), bucket.key),
                    severity: WarningSeverity::Error,
                    hint: Some("Each bucket must own its counter; change the scope or key template".into()),
                });
            }
            if bucket.limit == 0 {
                warnings.push(ConfigWarning {
                    field: format!("{field}.limit"),
                    message: "limit is 0, bucket starts exhausted".into(),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
            if bucket.ttl_secs == Some(0) {
                warnings.push(ConfigWarning {
                    field: format!("{field}.ttl_secs"),
                    message: "ttl of 0 expires the bucket immediately".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Omit ttl_secs for a bucket that never expires".into()),
                });
            }
            if bucket.ttl_secs.is_some_and(|ttl| ttl > MAX_DURATION_SECS) {
                warnings.push(ConfigWarning {
                    field: format!("{field}.ttl_secs"),
                    message: format!("ttl exceeds the maximum of {MAX_DURATION_SECS} seconds"),
                    severity: WarningSeverity::Error,
                    hint: Some("Omit ttl_secs for a bucket that never expires".into()),
                });
            }
            match KeyTemplate::parse(&bucket.key) {
                Ok(template) => {
                    for f in template.fields() {
                        if !ExecutionContext::is_known_field(f) {
                            warnings.push(ConfigWarning {
                                field: format!("{field}.key"),
                                message: format!("unknown context field '{f}'"),
                                severity: WarningSeverity::Error,
                                hint: Some("Known: execution_id, agent_id, group_id, team_id, attr.<name>".into()),
                            });
                        }
                    }
                }
                Err(e) => warnings.push(ConfigWarning {
                    field: format!("{field}.key"),
                    message: e,
                    severity: WarningSeverity::Error,
                    hint: None,
                }),
            }
            if let Err(e) = check_thresholds(&bucket.thresholds) {
                warnings.push(ConfigWarning {
                    field: format!("{field}.thresholds"),
                    message: e,
                    severity: WarningSeverity::Error,
                    hint: Some("Use strictly increasing cutoffs in (0, 1], e.g. yellow 0.7, orange 0.9, red 1.0".into()),
                });
            }
        }

        if let Some(ref ext) = profile.auto_extend {
            if ext.max_extra == 0 || ext.window_secs == 0 {
                warnings.push(ConfigWarning {
                    field: format!("profiles.{name}.auto_extend"),
                    message: "max_extra and window_secs must both be positive".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if ext.window_secs > MAX_DURATION_SECS {
                warnings.push(ConfigWarning {
                    field: format!("profiles.{name}.auto_extend.window_secs"),
                    message: format!("window exceeds the maximum of {MAX_DURATION_SECS} seconds"),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if !(0.0..=1.0).contains(&ext.max_error_rate) {
                warnings.push(ConfigWarning {
                    field: format!("profiles.{name}.auto_extend.max_error_rate"),
                    message: format!("error rate {} is out of range", ext.max_error_rate),
                    severity: WarningSeverity::Error,
                    hint: Some("Error rate is a fraction between 0.0 and 1.0".into()),
                });
            }
        }

        for rule in &profile.notifications {
            if !self.channels.contains_key(&rule.channel) {
                warnings.push(ConfigWarning {
                    field: format!("profiles.{name}.notifications"),
                    message: format!("unknown channel '{}'", rule.channel),
                    severity: WarningSeverity::Error,
                    hint: Some("Declare it under [channels.<name>]".into()),
                });
            }
            if rule.to == Band::Green {
                warnings.push(ConfigWarning {
                    field: format!("profiles.{name}.notifications"),
                    message: "bands never transition into green without a reset".into(),
                    severity: WarningSeverity::Info,
                    hint: None,
                });
            }
        }
    }
}

/// Thresholds must be non-green, strictly increasing in both cutoff and band, within (0, 1].
pub fn check_thresholds(thresholds: &[Threshold]) -> Result<(), String> {
    let mut previous: Option<&Threshold> = None;
    for t in thresholds {
        if t.band == Band::Green {
            return Err("green is implicit and cannot have a threshold".into());
        }
        if !(t.at > 0.0 && t.at <= 1.0) {
            return Err(format!("cutoff {} for {} is outside (0, 1]", t.at, t.band));
        }
        if let Some(prev) = previous
            && (t.at <= prev.at || t.band <= prev.band)
        {
            return Err(format!(
                "{} at {} does not follow {} at {}",
                t.band, t.at, prev.band, prev.at
            ));
        }
        previous = Some(t);
    }
    Ok(())
}
