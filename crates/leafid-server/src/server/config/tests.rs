use std::{net::IpAddr, time::Duration};

use clap::Parser;

use super::{CliArgs, ServerConfig, detect_local_ip};

fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
    let argv = std::iter::once("leafid-server").chain(args.iter().copied());
    ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
}

#[test]
fn explicit_arguments_flow_into_component_configs() {
    let config = parse(&[
        "--segment-sync-interval-secs",
        "5",
        "--segment-refill-threshold",
        "0.5",
        "--snowflake-ip",
        "10.0.0.7",
        "--snowflake-port",
        "9090",
        "--service-name",
        "orders",
        "--worker-id-cache-dir",
        "/var/cache/leaf",
        "--snowflake-enabled",
        "false",
    ])
    .unwrap();

    assert_eq!(config.segment.sync_interval, Duration::from_secs(5));
    assert_eq!(config.segment.refill_threshold, 0.5);
    assert_eq!(config.coordinator.address(), "10.0.0.7:9090");
    assert_eq!(config.coordinator.root_path(), "/snowflake/orders");
    assert_eq!(
        config.coordinator.cache_dir,
        std::path::PathBuf::from("/var/cache/leaf")
    );
    assert!(config.segment_enabled);
    assert!(!config.snowflake_enabled);
}

#[test]
fn rejects_out_of_range_values() {
    assert!(parse(&["--segment-refill-threshold", "0"]).is_err());
    assert!(parse(&["--segment-refill-threshold", "1.5"]).is_err());
    assert!(parse(&["--segment-sync-interval-secs", "0"]).is_err());
    assert!(parse(&["--segment-max-refills", "0"]).is_err());
    assert!(parse(&["--heartbeat-interval-secs", "0"]).is_err());
    assert!(parse(&["--service-name", "a/b"]).is_err());
    assert!(parse(&["--snowflake-ip", "not-an-ip"]).is_err());
}

#[test]
fn detected_ip_is_never_unspecified() {
    let ip: IpAddr = detect_local_ip();
    assert!(!ip.is_unspecified());
}
