use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::{Protocol, ServiceCategory, Severity};
use crate::rules::ClassificationRule;

pub const TIMEOUT_SECS_RANGE: std::ops::RangeInclusive<u64> = 1..=60;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    pub classify: ClassifyConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub timeout_secs: u64,
    pub protocols: Vec<Protocol>,
    pub min_severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifyConfig {
    pub executables: Vec<ExecutableRule>,
    pub ports: Vec<PortRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableRule {
    pub glob: String,
    pub category: ServiceCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRule {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    pub category: ServiceCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 50,
            },
            scan: ScanConfig {
                timeout_secs: 5,
                protocols: vec![Protocol::Tcp, Protocol::Udp],
                min_severity: Severity::Info,
            },
            classify: ClassifyConfig::default(),
            config_path: None,
        }
    }
}

impl EffectiveConfig {
    /// User classification rules, executables before ports, in file order.
    pub fn classification_rules(&self) -> Vec<ClassificationRule> {
        let executables = self.classify.executables.iter().map(|r| {
            ClassificationRule::executable(
                &r.glob,
                r.category,
                r.service.as_deref().unwrap_or(&r.glob),
            )
        });
        let ports = self.classify.ports.iter().map(|r| {
            let fallback = format!("port {}", r.port);
            ClassificationRule::port(
                r.port,
                r.protocol,
                r.category,
                r.service.as_deref().unwrap_or(&fallback),
            )
        });
        executables.chain(ports).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
    classify: Option<RawClassifyConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    timeout_secs: Option<u64>,
    protocols: Option<Vec<Protocol>>,
    min_severity: Option<Severity>,
}

#[derive(Debug, Deserialize)]
struct RawClassifyConfig {
    executables: Option<Vec<ExecutableRule>>,
    ports: Option<Vec<PortRule>>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/hostaudit/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        bail!("config file not found: {}", path.display());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(timeout_secs) = scan.timeout_secs {
            cfg.scan.timeout_secs = timeout_secs;
        }
        if let Some(protocols) = scan.protocols {
            cfg.scan.protocols = dedup_protocols(protocols);
        }
        if let Some(min_severity) = scan.min_severity {
            cfg.scan.min_severity = min_severity;
        }
    }

    if let Some(classify) = raw.classify {
        if let Some(executables) = classify.executables {
            cfg.classify.executables = executables;
        }
        if let Some(ports) = classify.ports {
            cfg.classify.ports = ports;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("HOSTAUDIT_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).context("HOSTAUDIT_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("HOSTAUDIT_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .context("HOSTAUDIT_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("HOSTAUDIT_SCAN_TIMEOUT_SECS") {
        cfg.scan.timeout_secs = v
            .trim()
            .parse::<u64>()
            .context("HOSTAUDIT_SCAN_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("HOSTAUDIT_SCAN_PROTOCOLS") {
        let protocols = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Protocol>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("HOSTAUDIT_SCAN_PROTOCOLS")?;
        if !protocols.is_empty() {
            cfg.scan.protocols = dedup_protocols(protocols);
        }
    }
    if let Ok(v) = std::env::var("HOSTAUDIT_SCAN_MIN_SEVERITY") {
        cfg.scan.min_severity = v
            .parse::<Severity>()
            .map_err(anyhow::Error::msg)
            .context("HOSTAUDIT_SCAN_MIN_SEVERITY")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if !TIMEOUT_SECS_RANGE.contains(&cfg.scan.timeout_secs) {
        bail!(
            "scan.timeout_secs must be within {}..={} (got {})",
            TIMEOUT_SECS_RANGE.start(),
            TIMEOUT_SECS_RANGE.end(),
            cfg.scan.timeout_secs
        );
    }
    if cfg.scan.protocols.is_empty() {
        bail!("scan.protocols must name at least one of tcp|udp");
    }
    if cfg.ui.max_table_rows == 0 {
        bail!("ui.max_table_rows must be greater than 0");
    }
    Ok(())
}

fn dedup_protocols(mut protocols: Vec<Protocol>) -> Vec<Protocol> {
    protocols.sort();
    protocols.dedup();
    protocols
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_overrides_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
[ui]
max_table_rows = 5

[scan]
timeout_secs = 9
protocols = ["udp", "tcp", "udp"]
min_severity = "medium"

[[classify.executables]]
glob = "myapp*"
category = "WebServer"
service = "MyApp"

[[classify.ports]]
port = 9000
protocol = "tcp"
category = "Database"
"#,
        )
        .expect("parse");
        let mut cfg = EffectiveConfig::default();
        apply_raw_config(&mut cfg, raw);

        assert!(cfg.ui.color);
        assert_eq!(cfg.ui.max_table_rows, 5);
        assert_eq!(cfg.scan.timeout_secs, 9);
        assert_eq!(cfg.scan.protocols, vec![Protocol::Tcp, Protocol::Udp]);
        assert_eq!(cfg.scan.min_severity, Severity::Medium);

        let rules = cfg.classification_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].service, "MyApp");
        assert_eq!(rules[1].category, ServiceCategory::Database);
        assert_eq!(rules[1].service, "port 9000");
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<RawConfig>("[fix]\nrisk = 1\n").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_timeout() {
        let mut cfg = EffectiveConfig::default();
        cfg.scan.timeout_secs = 0;
        assert!(validate(&cfg).is_err());
        cfg.scan.timeout_secs = 61;
        assert!(validate(&cfg).is_err());
        cfg.scan.timeout_secs = 60;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(" Yes ").expect("yes"));
        assert!(!parse_bool("off").expect("off"));
        assert!(parse_bool("maybe").is_err());
    }
}
