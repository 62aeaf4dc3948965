//! Node-wide configuration (§6, §10.4). Aggregates every subsystem's own
//! `*Config` behind one builder-style struct, the way this workspace's
//! per-crate configs are themselves composed of smaller config structs.

use mesh_connection::ConnectionConfig;
use mesh_gateway::GatewayConfig;
use mesh_ota::OtaConfig;
use mesh_timesync::TimeSyncConfig;

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_NODE_SYNC_INTERVAL_MS: u64 = 600_000;

/// Everything needed to bring up one mesh node (§6). Defaults follow §6's
/// table; subsystem tunables live in their own config structs and are
/// embedded here rather than flattened, so `with_connection`/`with_ota`/etc.
/// can swap a whole subsystem's tunables at once.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub mesh_prefix: String,
    pub mesh_password: String,
    pub port: u16,
    /// 0 = auto-select, matching the source's "match a router in
    /// bridge/shared-gateway mode" behavior (§6). Unused on a host build
    /// where there is no WiFi channel to select; carried for config fidelity.
    pub channel: u8,
    pub contains_root: bool,
    pub is_root: bool,
    pub node_sync_interval_ms: u64,
    /// Implementation-defined (§9 decision 3): disabled by default, matching
    /// the source's permissive "stale offset persists" behavior.
    pub max_offset_staleness_ms: Option<u64>,
    pub connection: ConnectionConfig,
    pub time_sync: TimeSyncConfig,
    pub ota: OtaConfig,
    pub gateway: Option<GatewayConfig>,
    /// This node's OTA identity (§4.7): firmware only installs across nodes
    /// sharing `(role, hardware)`.
    pub ota_role: String,
    pub ota_hardware: String,
    pub ota_running_md5: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mesh_prefix: "painlessMesh".to_string(),
            mesh_password: "somethingSneaky".to_string(),
            port: DEFAULT_PORT,
            channel: 0,
            contains_root: false,
            is_root: false,
            node_sync_interval_ms: DEFAULT_NODE_SYNC_INTERVAL_MS,
            max_offset_staleness_ms: None,
            connection: ConnectionConfig::default(),
            time_sync: TimeSyncConfig::default(),
            ota: OtaConfig::default(),
            gateway: None,
            ota_role: "default".to_string(),
            ota_hardware: "unknown".to_string(),
            ota_running_md5: String::new(),
        }
    }
}

impl NodeConfig {
    pub fn with_mesh_credentials(mut self, prefix: impl Into<String>, password: impl Into<String>) -> Self {
        self.mesh_prefix = prefix.into();
        self.mesh_password = password.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self.contains_root = self.contains_root || is_root;
        self
    }

    pub fn with_node_sync_interval_ms(mut self, ms: u64) -> Self {
        self.node_sync_interval_ms = ms;
        self
    }

    pub fn with_max_offset_staleness_ms(mut self, ms: u64) -> Self {
        self.max_offset_staleness_ms = Some(ms);
        self
    }

    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    pub fn with_time_sync_config(mut self, config: TimeSyncConfig) -> Self {
        self.time_sync = config;
        self
    }

    pub fn with_ota_config(mut self, config: OtaConfig) -> Self {
        self.ota = config;
        self
    }

    pub fn with_gateway_config(mut self, config: GatewayConfig) -> Self {
        self.gateway = Some(config);
        self
    }

    pub fn with_ota_identity(
        mut self,
        role: impl Into<String>,
        hardware: impl Into<String>,
        running_md5: impl Into<String>,
    ) -> Self {
        self.ota_role = role.into();
        self.ota_hardware = hardware.into();
        self.ota_running_md5 = running_md5.into();
        self
    }
}
