//! Configuration for a rollzk proving session.

use std::path::PathBuf;

use anyhow::{bail, Context};
use rollzk_cs::LazifyConfig;
use rollzk_groth16::groth16::{DecodePolicy, Encoding};
use serde::Deserialize;

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub lazify: LazifySection,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding every segment of the session.
    #[serde(default = "StoreConfig::default_dir")]
    pub dir: PathBuf,
    /// Tag embedded in key, vk and proof segment names.
    #[serde(default = "StoreConfig::default_session")]
    pub session: String,
}

impl StoreConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("./rollzk-data")
    }
    fn default_session() -> String {
        "default".to_string()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            session: Self::default_session(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodecConfig {
    /// Point encoding used when writing key and proof segments.
    #[serde(default)]
    pub encoding: Encoding,
    /// Whether decoded points get the subgroup check.
    #[serde(default)]
    pub decode: DecodePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LazifySection {
    #[serde(default = "LazifySection::default_enabled")]
    pub enabled: bool,
    /// Smallest group of identical constraints worth a template.
    #[serde(default = "LazifySection::default_min_occurrences")]
    pub min_occurrences: u32,
}

impl LazifySection {
    fn default_enabled() -> bool {
        true
    }
    fn default_min_occurrences() -> u32 {
        2
    }

    pub fn to_lazify_config(&self) -> LazifyConfig {
        LazifyConfig {
            min_occurrences: self.min_occurrences.max(2),
        }
    }
}

impl Default for LazifySection {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            min_occurrences: Self::default_min_occurrences(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverConfig {
    /// Worker threads for level solving and MSM folds. 0 = all hardware threads.
    #[serde(default)]
    pub threads: u32,
}

impl SolverConfig {
    /// Rayon pool sized by `threads`; every parallel stage runs inside it.
    pub fn thread_pool(&self) -> anyhow::Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads as usize)
            .thread_name(|i| format!("rollzk-{i}"))
            .build()
            .context("failed to build solver thread pool")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Buffered reader/writer capacity per segment (e.g. "64MiB").
    #[serde(default = "MemoryConfig::default_segment_buffer")]
    pub segment_buffer: String,
}

impl MemoryConfig {
    fn default_segment_buffer() -> String {
        "8MiB".to_string()
    }

    pub fn segment_buffer_bytes(&self) -> anyhow::Result<usize> {
        let bytes = parse_size(&self.segment_buffer)?;
        usize::try_from(bytes)
            .with_context(|| format!("segment buffer {:?} too large", self.segment_buffer))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            segment_buffer: Self::default_segment_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub format: Option<String>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

/// Parse a human-readable size string like "64MiB" or "2GB" into bytes.
pub fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    let n: u64 = digits.parse().with_context(|| format!("invalid size {s:?}"))?;
    let scale: u64 = match unit.trim() {
        "" | "B" => 1,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        other => bail!("unknown size unit {other:?} in {s:?}"),
    };
    n.checked_mul(scale).with_context(|| format!("size {s:?} overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("64MiB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("626 MB").unwrap(), 626_000_000);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("5TiB").is_err());
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.store.session, "default");
        assert_eq!(cfg.codec.encoding, Encoding::Compressed);
        assert_eq!(cfg.codec.decode, DecodePolicy::Checked);
        assert!(cfg.lazify.enabled);
        assert_eq!(cfg.memory.segment_buffer_bytes().unwrap(), 8 << 20);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[store]
dir = "/var/lib/rollzk"
session = "batch-7"

[codec]
encoding = "raw"
decode = "unchecked"

[lazify]
min_occurrences = 0

[solver]
threads = 4

[memory]
segment_buffer = "64MiB"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.store.dir, PathBuf::from("/var/lib/rollzk"));
        assert_eq!(cfg.store.session, "batch-7");
        assert_eq!(cfg.codec.encoding, Encoding::Raw);
        assert_eq!(cfg.codec.decode, DecodePolicy::Unchecked);
        assert_eq!(cfg.lazify.to_lazify_config().min_occurrences, 2);
        assert_eq!(cfg.solver.threads, 4);
        assert_eq!(cfg.memory.segment_buffer_bytes().unwrap(), 64 << 20);
        assert_eq!(cfg.logging.level, "info");
    }
}
