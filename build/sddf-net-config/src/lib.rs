//! Build-time TOML configuration for an sDDF-style networking deployment.
//!
//! Mirrors the teacher's `build/net`: a `GlobalConfig`/`SddfNetConfig`
//! `serde::Deserialize` schema loaded through `sddf_build_util::config`, with
//! every cross-field invariant checked once here rather than deferred to a
//! runtime `Result` a task would have to handle. A deployment's `app.toml` is
//! baked into each task binary at build time; there is no runtime config
//! parsing anywhere in this system.

use anyhow::{bail, Result};
use serde::Deserialize;

/// Top-level app configuration, of which only the `[net]` table concerns
/// this crate; a real deployment's TOML may carry sibling tables for other
/// subsystems that `sddf-net-config` does not know about.
#[derive(Deserialize, Clone, Debug)]
pub struct GlobalConfig {
    pub net: SddfNetConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SddfNetConfig {
    pub num_clients: usize,
    #[serde(default = "default_buffer_count")]
    pub rx_buffers: u32,
    #[serde(default = "default_buffer_count")]
    pub tx_buffers: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    pub copy_shim_enabled_rx: Vec<bool>,
    pub copy_shim_enabled_tx: Vec<bool>,
    pub tx_policy: TxPolicyConfig,
    pub mac_table: Vec<ConfigMac>,
    #[serde(default)]
    pub promiscuous: bool,
    #[serde(default)]
    pub broadcast_policy: BroadcastPolicyConfig,
}

/// Who receives a frame addressed to the broadcast MAC. Defaults to a single
/// designated client (client 0) rather than replicating to everyone, since
/// replication means every broadcast costs `num_clients` used-ring slots.
#[derive(Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum BroadcastPolicyConfig {
    DesignatedClient { client: usize },
    ReplicateToAll,
}

impl Default for BroadcastPolicyConfig {
    fn default() -> Self {
        BroadcastPolicyConfig::DesignatedClient { client: 0 }
    }
}

fn default_buffer_count() -> u32 {
    512
}

fn default_buffer_size() -> u32 {
    sddf_pool::BUFFER_SIZE as u32
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum TxPolicyConfig {
    StrictPriority { client_priority_order: Vec<usize> },
    BandwidthLimited { windows: Vec<BandwidthWindowConfig> },
}

#[derive(Deserialize, Clone, Copy, Debug)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BandwidthWindowConfig {
    pub bits_per_window: u64,
    pub window_us: u64,
}

/// A MAC address as written in TOML (`"52:54:01:00:00:01"`), converted to
/// `sddf_abi::MacAddr` on load. `sddf-abi` itself stays free of a `serde`
/// dependency since it is shared with `no_std` task binaries; the TOML-facing
/// parsing lives here instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigMac(pub sddf_abi::MacAddr);

impl<'de> Deserialize<'de> for ConfigMac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_mac(&s).map(ConfigMac).map_err(serde::de::Error::custom)
    }
}

fn parse_mac(s: &str) -> Result<sddf_abi::MacAddr, String> {
    let octets: Vec<&str> = s.split(':').collect();
    if octets.len() != 6 {
        return Err(format!("MAC address {s:?} must have exactly 6 colon-separated octets"));
    }
    let mut out = [0u8; 6];
    for (i, part) in octets.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16).map_err(|e| format!("invalid octet {part:?} in MAC {s:?}: {e}"))?;
    }
    Ok(sddf_abi::MacAddr(out))
}

/// Loads and validates the `[net]` table from the app-wide build-time
/// configuration. Panics (failing the build) if the configuration cannot be
/// parsed or violates a cross-field invariant: there is no runtime path that
/// recovers from a misconfigured deployment.
pub fn load_net_config() -> SddfNetConfig {
    let global: GlobalConfig = sddf_build_util::config().expect("failed to load sDDF net config from SDDF_APP_CONFIG");
    if let Err(e) = validate(&global.net) {
        panic!("invalid sDDF net configuration: {e:#}");
    }
    global.net
}

fn validate(cfg: &SddfNetConfig) -> Result<()> {
    if cfg.num_clients < 1 {
        bail!("num_clients must be at least 1, got {}", cfg.num_clients);
    }
    validate_buffer_count("rx_buffers", cfg.rx_buffers)?;
    validate_buffer_count("tx_buffers", cfg.tx_buffers)?;

    if cfg.copy_shim_enabled_rx.len() != cfg.num_clients {
        bail!(
            "copy_shim_enabled_rx has {} entries, expected num_clients = {}",
            cfg.copy_shim_enabled_rx.len(),
            cfg.num_clients
        );
    }
    if cfg.copy_shim_enabled_tx.len() != cfg.num_clients {
        bail!(
            "copy_shim_enabled_tx has {} entries, expected num_clients = {}",
            cfg.copy_shim_enabled_tx.len(),
            cfg.num_clients
        );
    }
    if cfg.mac_table.len() != cfg.num_clients {
        bail!("mac_table has {} entries, expected num_clients = {}", cfg.mac_table.len(), cfg.num_clients);
    }
    if let BroadcastPolicyConfig::DesignatedClient { client } = cfg.broadcast_policy {
        if client >= cfg.num_clients {
            bail!("broadcast_policy designates client {client}, out of range for {} clients", cfg.num_clients);
        }
    }

    match &cfg.tx_policy {
        TxPolicyConfig::StrictPriority { client_priority_order } => {
            if client_priority_order.len() != cfg.num_clients {
                bail!(
                    "client_priority_order has {} entries, expected num_clients = {}",
                    client_priority_order.len(),
                    cfg.num_clients
                );
            }
            let mut seen = vec![false; cfg.num_clients];
            for &idx in client_priority_order {
                if idx >= cfg.num_clients {
                    bail!("client_priority_order entry {idx} is out of range for {} clients", cfg.num_clients);
                }
                if seen[idx] {
                    bail!("client_priority_order must be a permutation of 0..num_clients; {idx} repeats");
                }
                seen[idx] = true;
            }
        }
        TxPolicyConfig::BandwidthLimited { windows } => {
            if windows.len() != cfg.num_clients {
                bail!("bandwidth_limited.windows has {} entries, expected num_clients = {}", windows.len(), cfg.num_clients);
            }
            for (i, w) in windows.iter().enumerate() {
                if w.bits_per_window == 0 || w.window_us == 0 {
                    bail!("client {i}'s bandwidth window must have a nonzero cap and duration");
                }
            }
        }
    }
    Ok(())
}

fn validate_buffer_count(name: &str, count: u32) -> Result<()> {
    if count == 0 || !count.is_power_of_two() {
        bail!("{name} must be a nonzero power of two, got {count}");
    }
    if count > sddf_ring::CAPACITY as u32 {
        bail!("{name} = {count} exceeds the ring substrate's fixed capacity of {}", sddf_ring::CAPACITY);
    }
    Ok(())
}
