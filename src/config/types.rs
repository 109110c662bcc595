use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TCP port the remote-display server always binds.
pub const VNC_PORT: u16 = 5909;

/// The background services a session can bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Tor,
    Xvfb,
    Redis,
    Vnc,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Tor,
        ServiceKind::Xvfb,
        ServiceKind::Redis,
        ServiceKind::Vnc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Tor => "tor",
            ServiceKind::Xvfb => "xvfb",
            ServiceKind::Redis => "redis",
            ServiceKind::Vnc => "vnc",
        }
    }

    /// Services that must be ready before this one is spawned.
    pub fn depends_on(&self) -> &'static [ServiceKind] {
        match self {
            ServiceKind::Vnc => &[ServiceKind::Xvfb],
            _ => &[],
        }
    }

    /// Launch wave: 0 for services without dependencies, otherwise one past
    /// the deepest dependency.
    pub fn wave(&self) -> usize {
        self.depends_on()
            .iter()
            .map(|dep| dep.wave() + 1)
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown service `{s}` (expected tor, xvfb, redis or vnc)"))
    }
}

/// Retry budget for a readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessBudget {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl ReadinessBudget {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReadinessBudget {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub control_addr: String,
    pub bootstrap_signal: String,
    pub readiness: ReadinessBudget,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            program: "tor".to_string(),
            args: Vec::new(),
            control_addr: "127.0.0.1:9051".to_string(),
            bootstrap_signal: "Bootstrapped 100%".to_string(),
            readiness: ReadinessBudget {
                attempts: 60,
                interval_ms: 1000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub program: String,
    pub display: String,
    pub screen: String,
    pub probe_program: String,
    pub readiness: ReadinessBudget,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            program: "Xvfb".to_string(),
            display: ":1".to_string(),
            screen: "1024x768x24".to_string(),
            probe_program: "xdpyinfo".to_string(),
            readiness: ReadinessBudget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub program: String,
    /// Relative to the repository root.
    pub config_file: PathBuf,
    /// Relative to the repository root.
    pub dump_file: PathBuf,
    pub addr: String,
    pub readiness: ReadinessBudget,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            program: "redis-server".to_string(),
            config_file: PathBuf::from("securedrop/redis.conf"),
            dump_file: PathBuf::from("securedrop/dump.rdb"),
            addr: "127.0.0.1:6379".to_string(),
            readiness: ReadinessBudget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VncConfig {
    pub program: String,
    pub geometry: String,
    pub password: String,
    pub password_file: PathBuf,
    pub readiness: ReadinessBudget,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            program: "x11vnc".to_string(),
            geometry: "1024x768".to_string(),
            password: "freedom".to_string(),
            password_file: PathBuf::from("/tmp/vncpasswd"),
            readiness: ReadinessBudget::default(),
        }
    }
}

/// Paths and entrypoints used by the demo data reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Fixture key files, relative to the repository root. The first entry is
    /// the public key that gets imported into the named keyring.
    pub fixture_keys: Vec<PathBuf>,
    pub keyring_agent_pattern: String,
    pub gpg_program: String,
    pub catalog_compiler: Vec<String>,
    pub database_tool: String,
    pub reset_command: Vec<String>,
    pub loaddata_command: Vec<String>,
    /// Whitespace-delimited, shell-quoted extra arguments for the seed loader.
    pub loaddata_args: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            fixture_keys: vec![
                PathBuf::from("securedrop/tests/files/test_journalist_key.pub"),
                PathBuf::from("securedrop/tests/files/test_journalist_key.sec"),
            ],
            keyring_agent_pattern: "gpg-agent".to_string(),
            gpg_program: "gpg".to_string(),
            catalog_compiler: vec!["pybabel".to_string(), "compile".to_string()],
            database_tool: "sqlite3".to_string(),
            reset_command: vec!["./manage.py".to_string(), "reset".to_string()],
            loaddata_command: vec!["./loaddata.py".to_string()],
            loaddata_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Services `up` starts when `--only` is not given.
    pub services: Vec<ServiceKind>,
    pub data_dir: PathBuf,
    pub capture_dir: PathBuf,
    /// Application directory, relative to the repository root.
    pub app_dir: PathBuf,
    /// Marker artifact gating one-time config generation, relative to the root.
    pub config_marker: PathBuf,
    pub config_build_command: Vec<String>,
    /// Translation sources, relative to the application directory.
    pub translations_dir: PathBuf,
    /// Uploaded branding asset, relative to the application directory.
    pub custom_logo: PathBuf,
    pub use_sudo: bool,
    /// Seconds a service gets between SIGTERM and SIGKILL.
    pub stop_grace_secs: u64,
    pub tor: TorConfig,
    pub display: DisplayConfig,
    pub redis: RedisConfig,
    pub vnc: VncConfig,
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: ServiceKind::ALL.to_vec(),
            data_dir: PathBuf::from("/var/lib/securedrop"),
            capture_dir: PathBuf::from("/tmp"),
            app_dir: PathBuf::from("securedrop"),
            config_marker: PathBuf::from("securedrop/config.py"),
            config_build_command: vec!["make".to_string(), "test-config".to_string()],
            translations_dir: PathBuf::from("translations"),
            custom_logo: PathBuf::from("static/i/custom_logo.png"),
            use_sudo: true,
            stop_grace_secs: 5,
            tor: TorConfig::default(),
            display: DisplayConfig::default(),
            redis: RedisConfig::default(),
            vnc: VncConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    pub fn capture_path(&self, kind: ServiceKind) -> PathBuf {
        self.capture_dir.join(format!("{}.log", kind.as_str()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.capture_dir.join("devstack-session.json")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vnc_waits_for_the_display() {
        assert_eq!(ServiceKind::Vnc.depends_on(), &[ServiceKind::Xvfb]);
        assert_eq!(ServiceKind::Vnc.wave(), 1);
        assert_eq!(ServiceKind::Xvfb.wave(), 0);
        assert_eq!(ServiceKind::Tor.wave(), 0);
        assert_eq!(ServiceKind::Redis.wave(), 0);
    }

    #[test]
    fn service_kind_parses_case_insensitively() {
        assert_eq!("Xvfb".parse::<ServiceKind>(), Ok(ServiceKind::Xvfb));
        assert_eq!("redis".parse::<ServiceKind>(), Ok(ServiceKind::Redis));
        assert!("postgres".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn display_defaults_to_ten_one_second_attempts() {
        let cfg = Config::default();
        assert_eq!(cfg.display.readiness.attempts, 10);
        assert_eq!(
            cfg.display.readiness.interval(),
            std::time::Duration::from_secs(1)
        );
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let yaml = "services: [redis]\nredis:\n  addr: 127.0.0.1:6400\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.services, vec![ServiceKind::Redis]);
        assert_eq!(cfg.redis.addr, "127.0.0.1:6400");
        assert_eq!(cfg.redis.program, "redis-server");
        assert_eq!(cfg.display.display, ":1");
        assert!(cfg.use_sudo);
    }

    #[test]
    fn partial_readiness_budget_keeps_the_other_field() {
        let yaml = "display:\n  readiness: {attempts: 3}\nredis:\n  readiness: {interval_ms: 250}\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.display.readiness,
            ReadinessBudget {
                attempts: 3,
                interval_ms: 1000
            }
        );
        assert_eq!(
            cfg.redis.readiness,
            ReadinessBudget {
                attempts: 10,
                interval_ms: 250
            }
        );
    }

    #[test]
    fn capture_paths_live_in_capture_dir() {
        let cfg = Config {
            capture_dir: PathBuf::from("/scratch"),
            ..Config::default()
        };
        assert_eq!(
            cfg.capture_path(ServiceKind::Xvfb),
            PathBuf::from("/scratch/xvfb.log")
        );
        assert_eq!(
            cfg.manifest_path(),
            PathBuf::from("/scratch/devstack-session.json")
        );
    }
}
