//! Cluster-wide configuration knobs
//!
//! Shared by proxies and targets; binaries overlay a toml file and CLI args
//! on these defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root cluster configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeout: TimeoutConf,
    #[serde(default)]
    pub mirror: MirrorDefaults,
    #[serde(default)]
    pub ec: EcTuning,
    #[serde(default)]
    pub xaction: XactionConf,
}

/// Operation timeouts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConf {
    /// Budget for one control-plane broadcast (txn begin/abort)
    #[serde(with = "duration_ms")]
    pub cplane_operation: Duration,
    /// Upper bound for critical commits (create-bucket)
    #[serde(with = "duration_ms")]
    pub max_keepalive: Duration,
    /// Commit broadcasts for long-running follow-ups
    #[serde(with = "duration_ms")]
    pub long_timeout: Duration,
    /// Bounded wait for slice/metafile responses
    #[serde(with = "duration_ms")]
    pub send_file: Duration,
}

impl Default for TimeoutConf {
    fn default() -> Self {
        Self {
            cplane_operation: Duration::from_secs(2),
            max_keepalive: Duration::from_secs(4),
            long_timeout: Duration::from_secs(30),
            send_file: Duration::from_secs(5),
        }
    }
}

/// Cluster defaults for mirroring
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorDefaults {
    /// Copies applied when a bucket enables mirroring without a count
    pub copies: i64,
}

impl Default for MirrorDefaults {
    fn default() -> Self {
        Self { copies: 2 }
    }
}

/// EC data-plane tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EcTuning {
    /// When the buffers needed to encode an object exceed this many bytes,
    /// slices are staged through mountpath workfiles instead of memory
    pub mem_threshold: u64,
    /// Concurrent in-flight restores per mountpath
    pub restore_concurrency: usize,
}

impl Default for EcTuning {
    fn default() -> Self {
        Self {
            mem_threshold: 256 * 1024 * 1024,
            restore_concurrency: 8,
        }
    }
}

/// Xaction lifecycle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct XactionConf {
    /// Idle duration after which a demand xaction self-terminates
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Finished xactions are reaped from the registry after this grace period
    #[serde(with = "duration_ms")]
    pub reap_after: Duration,
}

impl Default for XactionConf {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            reap_after: Duration::from_secs(600),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.mirror.copies, 2);
        assert!(cfg.timeout.long_timeout > cfg.timeout.cplane_operation);
    }

    #[test]
    fn toml_roundtrip_durations() {
        let cfg = Config::default();
        let js = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&js).unwrap();
        assert_eq!(back.timeout.cplane_operation, cfg.timeout.cplane_operation);
        assert_eq!(back.xaction.idle_timeout, cfg.xaction.idle_timeout);
    }
}
