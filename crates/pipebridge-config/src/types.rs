use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Human-readable duration (e.g., "200ms", "30s", "5m").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }

    pub fn from_millis(millis: u64) -> Self {
        HumanDuration(std::time::Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(std::time::Duration::from_secs(secs))
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            _ => std::time::Duration::from_secs(num * 3600),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 || millis == 0 {
            write!(f, "{}ms", millis)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Human-readable byte size (e.g., "8kb", "1mb").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanBytes(pub u64);

impl HumanBytes {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for HumanBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if let Some(n) = s.strip_suffix("mb") {
            (n, 1024u64 * 1024)
        } else if let Some(n) = s.strip_suffix("kb") {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix('b') {
            (n, 1u64)
        } else {
            (s.as_str(), 1u64)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in bytes: {}", s))?;

        Ok(HumanBytes(num * multiplier))
    }
}

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
            write!(f, "{}mb", bytes / (1024 * 1024))
        } else if bytes >= 1024 && bytes % 1024 == 0 {
            write!(f, "{}kb", bytes / 1024)
        } else {
            write!(f, "{}b", bytes)
        }
    }
}

impl Serialize for HumanBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Accept both `8192` and `"8kb"`.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(HumanBytes(n)),
            Raw::Str(s) => HumanBytes::from_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Unix permission bits for a FIFO, written in octal (e.g., "0600").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeMode(pub u32);

impl PipeMode {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl FromStr for PipeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0o")
            .or_else(|| s.strip_prefix("0O"))
            .unwrap_or(s);
        u32::from_str_radix(digits, 8)
            .map(PipeMode)
            .map_err(|_| format!("Invalid octal permission mode: {}", s))
    }
}

impl fmt::Display for PipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for PipeMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PipeMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // YAML reads an unquoted 0600 as the decimal integer 600, so integers
        // are reinterpreted through their decimal digits as octal.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => PipeMode::from_str(&n.to_string()).map_err(serde::de::Error::custom),
            Raw::Str(s) => PipeMode::from_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Directory-rooted provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsProviderConfig {
    pub root: String,
}

/// Tagged enum selecting the virtual file provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Fs(FsProviderConfig),
    Memory,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Memory
    }
}

/// Settings for per-session FIFOs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipesConfig {
    /// Directory that generated FIFOs are created in. Defaults to the OS temp dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_pipe_mode")]
    pub mode: PipeMode,
    /// Deadline for the blocking open. `None` waits for a peer indefinitely.
    #[serde(default)]
    pub open_timeout: Option<HumanDuration>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_true")]
    pub remove_on_close: bool,
}

fn default_prefix() -> String {
    "bridge".to_string()
}

fn default_pipe_mode() -> PipeMode {
    PipeMode(0o600)
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_millis(50)
}

fn default_true() -> bool {
    true
}

impl Default for PipesConfig {
    fn default() -> Self {
        PipesConfig {
            dir: None,
            prefix: default_prefix(),
            mode: default_pipe_mode(),
            open_timeout: None,
            poll_interval: default_poll_interval(),
            remove_on_close: true,
        }
    }
}

/// Copy loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: HumanBytes,
}

fn default_chunk_size() -> HumanBytes {
    HumanBytes(8 * 1024)
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Fixed, shared FIFO paths kept for applications that hardcode them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_legacy_mode")]
    pub mode: PipeMode,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

fn default_legacy_mode() -> PipeMode {
    PipeMode(0o666)
}

impl Default for LegacyConfig {
    fn default() -> Self {
        LegacyConfig {
            enabled: false,
            mode: default_legacy_mode(),
            paths: Vec::new(),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pipes: PipesConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parsing() {
        assert_eq!(
            HumanDuration::from_str("200ms").unwrap().as_duration(),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            HumanDuration::from_str("30s").unwrap().as_duration(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            HumanDuration::from_str("2m").unwrap().as_duration(),
            std::time::Duration::from_secs(120)
        );
        assert!(HumanDuration::from_str("soon").is_err());
    }

    #[test]
    fn test_human_duration_display() {
        assert_eq!(HumanDuration::from_millis(50).to_string(), "50ms");
        assert_eq!(HumanDuration::from_millis(1500).to_string(), "1500ms");
        assert_eq!(HumanDuration::from_secs(30).to_string(), "30s");
        assert_eq!(HumanDuration::from_secs(120).to_string(), "2m");
    }

    #[test]
    fn test_human_bytes_parsing() {
        assert_eq!(HumanBytes::from_str("512b").unwrap().as_bytes(), 512);
        assert_eq!(HumanBytes::from_str("8kb").unwrap().as_bytes(), 8192);
        assert_eq!(HumanBytes::from_str("1mb").unwrap().as_bytes(), 1024 * 1024);
        assert_eq!(HumanBytes::from_str("4096").unwrap().as_bytes(), 4096);
    }

    #[test]
    fn test_pipe_mode_parsing() {
        assert_eq!(PipeMode::from_str("0600").unwrap().bits(), 0o600);
        assert_eq!(PipeMode::from_str("0o644").unwrap().bits(), 0o644);
        assert_eq!(PipeMode::from_str("666").unwrap().bits(), 0o666);
        assert!(PipeMode::from_str("0689").is_err());
        assert_eq!(PipeMode(0o600).to_string(), "0600");
    }

    #[test]
    fn test_pipe_mode_from_unquoted_yaml() {
        let mode: PipeMode = serde_yaml::from_str("0640").unwrap();
        assert_eq!(mode.bits(), 0o640);
        let mode: PipeMode = serde_yaml::from_str("\"0640\"").unwrap();
        assert_eq!(mode.bits(), 0o640);
    }
}
