use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    path::PathBuf,
    time::Duration,
};

use anyhow::bail;
use clap::{ArgAction, Parser};
use leafid::{CoordinatorConfig, SegmentConfig};

/// Runtime configuration for the `leafid-server` binary.
///
/// Every value can be given as a CLI argument or an environment variable
/// (optionally through a `.env` file). Segment and Snowflake modes are
/// configured independently and either can be switched off.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leafid-server",
    version,
    about = "An HTTP service issuing segment and Snowflake ids"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Serve segment ids. When disabled every segment request returns `0`.
    ///
    /// Environment variable: `SEGMENT_ENABLED`
    #[arg(long, env = "SEGMENT_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub segment_enabled: bool,

    /// JSON file holding the allocation rows.
    ///
    /// Environment variable: `SEGMENT_STORE_PATH`
    #[arg(long, env = "SEGMENT_STORE_PATH", default_value = "leaf_alloc.json")]
    pub segment_store_path: PathBuf,

    /// Seconds between key-set syncs with the allocation store.
    ///
    /// Environment variable: `SEGMENT_SYNC_INTERVAL_SECS`
    #[arg(long, env = "SEGMENT_SYNC_INTERVAL_SECS", default_value_t = 60)]
    pub segment_sync_interval_secs: u64,

    /// Fraction of the active segment that may be consumed before the
    /// standby segment is refilled.
    ///
    /// Environment variable: `SEGMENT_REFILL_THRESHOLD`
    #[arg(long, env = "SEGMENT_REFILL_THRESHOLD", default_value_t = 0.9)]
    pub segment_refill_threshold: f64,

    /// Upper bound on refills talking to the store at once.
    ///
    /// Environment variable: `SEGMENT_MAX_REFILLS`
    #[arg(long, env = "SEGMENT_MAX_REFILLS", default_value_t = 32)]
    pub segment_max_refills: usize,

    /// Serve Snowflake ids. When disabled every Snowflake request returns `0`.
    ///
    /// Environment variable: `SNOWFLAKE_ENABLED`
    #[arg(long, env = "SNOWFLAKE_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub snowflake_enabled: bool,

    /// Shared directory acting as the coordination node store.
    ///
    /// Every server taking part in worker-id assignment must see the same
    /// directory.
    ///
    /// Environment variable: `COORDINATION_ROOT`
    #[arg(long, env = "COORDINATION_ROOT", default_value = "leaf-coordination")]
    pub coordination_root: PathBuf,

    /// Namespace of this deployment's registrations.
    ///
    /// Environment variable: `SERVICE_NAME`
    #[arg(long, env = "SERVICE_NAME", default_value_t = String::from("leaf"))]
    pub service_name: String,

    /// Address this server registers under. Detected from the outbound
    /// interface when absent.
    ///
    /// Environment variable: `SNOWFLAKE_IP`
    #[arg(long, env = "SNOWFLAKE_IP")]
    pub snowflake_ip: Option<IpAddr>,

    /// Port this server registers under. Together with the ip it identifies
    /// the worker across restarts.
    ///
    /// Environment variable: `SNOWFLAKE_PORT`
    #[arg(long, env = "SNOWFLAKE_PORT", default_value_t = 8080)]
    pub snowflake_port: u16,

    /// Root of the local worker-id cache. Defaults to the system temp dir.
    ///
    /// Environment variable: `WORKER_ID_CACHE_DIR`
    #[arg(long, env = "WORKER_ID_CACHE_DIR")]
    pub worker_id_cache_dir: Option<PathBuf>,

    /// Seconds between registration heartbeats.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 3)]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub segment_enabled: bool,
    pub segment_store_path: PathBuf,
    pub segment: SegmentConfig,
    pub snowflake_enabled: bool,
    pub coordination_root: PathBuf,
    pub coordinator: CoordinatorConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.segment_sync_interval_secs == 0 {
            bail!("SEGMENT_SYNC_INTERVAL_SECS must be greater than 0");
        }

        if !(args.segment_refill_threshold > 0.0 && args.segment_refill_threshold <= 1.0) {
            bail!(
                "SEGMENT_REFILL_THRESHOLD ({}) must be within (0, 1]",
                args.segment_refill_threshold
            );
        }

        if args.segment_max_refills == 0 {
            bail!("SEGMENT_MAX_REFILLS must be greater than 0");
        }

        if args.service_name.is_empty() || args.service_name.contains('/') {
            bail!(
                "SERVICE_NAME ({:?}) must be non-empty and must not contain '/'",
                args.service_name
            );
        }

        if args.heartbeat_interval_secs == 0 {
            bail!("HEARTBEAT_INTERVAL_SECS must be greater than 0");
        }

        let segment = SegmentConfig {
            sync_interval: Duration::from_secs(args.segment_sync_interval_secs),
            refill_threshold: args.segment_refill_threshold,
            max_concurrent_refills: args.segment_max_refills,
            ..SegmentConfig::default()
        };

        let ip = args.snowflake_ip.unwrap_or_else(detect_local_ip);
        let coordinator = CoordinatorConfig {
            service_name: args.service_name,
            ip: ip.to_string(),
            port: args.snowflake_port,
            cache_dir: args
                .worker_id_cache_dir
                .unwrap_or_else(std::env::temp_dir),
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            ..CoordinatorConfig::default()
        };

        Ok(Self {
            server_addr: args.server_addr,
            segment_enabled: args.segment_enabled,
            segment_store_path: args.segment_store_path,
            segment,
            snowflake_enabled: args.snowflake_enabled,
            coordination_root: args.coordination_root,
            coordinator,
        })
    }
}

/// Address of the interface that routes outbound traffic.
///
/// Connecting a UDP socket only selects a route; nothing is sent. Falls back
/// to loopback on hosts without a route.
pub fn detect_local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests;
