//! Command line configuration.
//!
//! Flags are parsed once into [`Cli`] and resolved into an immutable
//! [`Settings`]. Addresses follow the Go listener convention: `host:port`
//! where the host may be a name, `:8080` binds every interface and `0` (or an
//! empty string) disables the listener. Host names are resolved when the
//! listener binds, not here.
//! Durations use Go syntax such as `10m`, `1h30m` or `250ms`.

use std::num::NonZeroU16;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use manager_runtime::client::ClientOptions;
use manager_runtime::leader::LeaderElectionOptions;
use manager_runtime::{BootMode, ManagerOptions};
use thiserror::Error;

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Errors resolving flags into settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An address flag could not be parsed
    #[error("invalid --{flag} {value:?}: {reason}")]
    InvalidAddress {
        /// Flag name
        flag: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },

    /// A duration flag that must be positive was zero
    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Cluster lifecycle controller manager.
#[derive(Debug, Parser)]
#[command(name = "capi-manager", version, about)]
pub struct Cli {
    /// Address the metrics endpoint binds to
    #[arg(long, default_value = ":8080")]
    pub metrics_addr: String,

    /// Address the probe endpoint binds to
    #[arg(long, default_value = ":9440")]
    pub health_addr: String,

    /// Address of the diagnostics endpoint, empty disables it
    #[arg(long, default_value = "")]
    pub profiler_address: String,

    /// Hold a lease so only one replica reconciles at a time
    #[arg(long)]
    pub enable_leader_election: bool,

    /// Name of the leader election lease
    #[arg(long, default_value = "controller-leader-election-capi")]
    pub leader_election_id: String,

    /// Namespace of the leader election lease
    #[arg(long, env = "POD_NAMESPACE")]
    pub leader_election_namespace: Option<String>,

    /// Namespace to watch, empty watches every namespace
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Number of clusters to reconcile concurrently
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub cluster_concurrency: u16,

    /// Number of machines to reconcile concurrently
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub machine_concurrency: u16,

    /// Number of machine sets to reconcile concurrently
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub machineset_concurrency: u16,

    /// Number of machine deployments to reconcile concurrently
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub machinedeployment_concurrency: u16,

    /// Number of machine pools to reconcile concurrently
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub machinepool_concurrency: u16,

    /// Minimum interval at which watched objects are reconciled
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    pub sync_period: Duration,

    /// Webhook server port, 0 runs the reconcilers instead
    #[arg(long, default_value_t = 0)]
    pub webhook_port: u16,

    /// Directory holding the webhook serving certificate
    #[arg(long, default_value = "/tmp/k8s-webhook-server/serving-certs")]
    pub webhook_cert_dir: PathBuf,

    /// How long to wait for the initial list of every kind
    #[arg(long, default_value = "2m", value_parser = parse_duration)]
    pub cache_sync_timeout: Duration,

    /// How long in-flight reconciles may take to finish on shutdown
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub graceful_shutdown_timeout: Duration,
}

/// Per-kind worker pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyBounds {
    pub cluster: u16,
    pub machine: u16,
    pub machine_set: u16,
    pub machine_deployment: u16,
    pub machine_pool: u16,
}

impl Default for ConcurrencyBounds {
    fn default() -> Self {
        Self {
            cluster: 10,
            machine: 10,
            machine_set: 10,
            machine_deployment: 10,
            machine_pool: 10,
        }
    }
}

/// Startup parameters, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: BootMode,
    pub metrics_addr: Option<String>,
    pub health_addr: Option<String>,
    pub profiler_addr: Option<String>,
    pub namespace: Option<String>,
    pub leader_election: Option<LeaderElectionOptions>,
    pub concurrency: ConcurrencyBounds,
    pub sync_period: Duration,
    pub cache_sync_timeout: Duration,
    pub graceful_shutdown_timeout: Duration,
}

impl Settings {
    /// Resolves parsed flags, reading pod identity from the environment.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let host = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok();
        Self::resolve(cli, host, Path::new(SERVICE_ACCOUNT_NAMESPACE))
    }

    fn resolve(cli: Cli, host: Option<String>, sa_namespace: &Path) -> Result<Self, ConfigError> {
        if cli.sync_period.is_zero() {
            return Err(ConfigError::ZeroDuration("sync-period"));
        }

        let mode = match NonZeroU16::new(cli.webhook_port) {
            None => BootMode::Reconcile,
            Some(port) => BootMode::Webhook {
                port,
                cert_dir: cli.webhook_cert_dir,
            },
        };

        let leader_election = cli.enable_leader_election.then(|| {
            let namespace = cli
                .leader_election_namespace
                .filter(|ns| !ns.is_empty())
                .or_else(|| {
                    std::fs::read_to_string(sa_namespace)
                        .ok()
                        .map(|ns| ns.trim().to_string())
                        .filter(|ns| !ns.is_empty())
                })
                .unwrap_or_else(|| "default".to_string());
            LeaderElectionOptions::new(cli.leader_election_id, namespace, identity(host))
        });

        Ok(Self {
            mode,
            metrics_addr: parse_addr("metrics-addr", &cli.metrics_addr)?,
            health_addr: parse_addr("health-addr", &cli.health_addr)?,
            // a bad diagnostics address only fails the detached endpoint
            profiler_addr: listen_addr(&cli.profiler_address),
            namespace: Some(cli.namespace).filter(|ns| !ns.is_empty()),
            leader_election,
            concurrency: ConcurrencyBounds {
                cluster: cli.cluster_concurrency,
                machine: cli.machine_concurrency,
                machine_set: cli.machineset_concurrency,
                machine_deployment: cli.machinedeployment_concurrency,
                machine_pool: cli.machinepool_concurrency,
            },
            sync_period: cli.sync_period,
            cache_sync_timeout: cli.cache_sync_timeout,
            graceful_shutdown_timeout: cli.graceful_shutdown_timeout,
        })
    }

    /// Options handed to the manager.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            mode: self.mode.clone(),
            namespace: self.namespace.clone(),
            metrics_addr: self.metrics_addr.clone(),
            health_addr: self.health_addr.clone(),
            sync_period: self.sync_period,
            cache_sync_timeout: self.cache_sync_timeout,
            graceful_shutdown_timeout: self.graceful_shutdown_timeout,
            leader_election: self.leader_election.clone(),
            client_options: ClientOptions::default(),
            ..ManagerOptions::default()
        }
    }
}

/// Lease holder identity: `<host>_<uuid>`.
fn identity(host: Option<String>) -> String {
    let host = host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "capi-manager".to_string());
    format!("{host}_{}", uuid::Uuid::new_v4())
}

/// Normalizes a Go style listen address; `None` disables the listener.
fn listen_addr(value: &str) -> Option<String> {
    match value.trim() {
        "" | "0" => None,
        v if v.starts_with(':') => Some(format!("0.0.0.0{v}")),
        v => Some(v.to_string()),
    }
}

/// Checks a Go style listen address has a numeric port.
fn parse_addr(flag: &'static str, value: &str) -> Result<Option<String>, ConfigError> {
    let Some(addr) = listen_addr(value) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::InvalidAddress {
        flag,
        value: value.to_string(),
        reason,
    };
    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port".to_string()))?;
    port.parse::<u16>().map_err(|e| invalid(e.to_string()))?;
    Ok(Some(addr))
}

/// Parses a Go style duration (`1h30m`, `45s`, `1.5m`, `250ms`).
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let input = value.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {value:?}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {value:?}"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {value:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            unit => return Err(format!("unknown unit {unit:?} in duration {value:?}")),
        };
        total += number * seconds;
        rest = &rest[unit_len..];
    }
    Duration::try_from_secs_f64(total).map_err(|e| format!("duration {value:?} out of range: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["capi-manager"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn resolve(args: &[&str]) -> Settings {
        Settings::resolve(cli(args), Some("node-a".to_string()), Path::new("/nonexistent")).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("10").is_err(), "unit is required");
        assert!(parse_duration("5d").is_err(), "days are not a Go unit");
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr("metrics-addr", ":8080").unwrap().as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(
            parse_addr("metrics-addr", "127.0.0.1:9000").unwrap().as_deref(),
            Some("127.0.0.1:9000")
        );
        assert_eq!(
            parse_addr("health-addr", "localhost:9440").unwrap().as_deref(),
            Some("localhost:9440")
        );
        assert_eq!(parse_addr("metrics-addr", "[::1]:8080").unwrap().as_deref(), Some("[::1]:8080"));
        assert_eq!(parse_addr("metrics-addr", "0").unwrap(), None);
        assert!(matches!(
            parse_addr("health-addr", "localhost"),
            Err(ConfigError::InvalidAddress { flag: "health-addr", .. })
        ));
        assert!(parse_addr("health-addr", "localhost:http").is_err());
    }

    #[test]
    fn test_profiler_host_name_does_not_fail_boot() {
        let settings = resolve(&["--profiler-address", "localhost:6060"]);
        assert_eq!(settings.profiler_addr.as_deref(), Some("localhost:6060"));

        let settings = resolve(&["--profiler-address", "not an address"]);
        assert_eq!(settings.profiler_addr.as_deref(), Some("not an address"));
        assert_eq!(resolve(&[]).profiler_addr, None);
    }

    #[test]
    fn test_defaults_select_reconcile_mode() {
        let settings = resolve(&[]);

        assert_eq!(settings.mode, BootMode::Reconcile);
        assert_eq!(settings.concurrency, ConcurrencyBounds::default());
        assert_eq!(settings.sync_period, Duration::from_secs(600));
        assert_eq!(settings.metrics_addr.as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(settings.health_addr.as_deref(), Some("0.0.0.0:9440"));
        assert_eq!(settings.profiler_addr, None);
        assert!(settings.leader_election.is_none());
    }

    #[test]
    fn test_nonzero_webhook_port_selects_webhook_mode() {
        let settings = resolve(&["--webhook-port", "9443", "--webhook-cert-dir", "/certs"]);

        assert_eq!(
            settings.mode,
            BootMode::Webhook {
                port: NonZeroU16::new(9443).unwrap(),
                cert_dir: PathBuf::from("/certs"),
            }
        );
    }

    #[test]
    fn test_concurrency_flags() {
        let settings = resolve(&["--machine-concurrency", "3", "--machinepool-concurrency", "1"]);
        assert_eq!(settings.concurrency.machine, 3);
        assert_eq!(settings.concurrency.machine_pool, 1);
        assert_eq!(settings.concurrency.cluster, 10);

        let zero = Cli::try_parse_from(["capi-manager", "--cluster-concurrency", "0"]);
        assert!(zero.is_err(), "a bound of zero should be rejected");
    }

    #[test]
    fn test_zero_sync_period_is_rejected() {
        let result = Settings::resolve(cli(&["--sync-period", "0"]), None, Path::new("/nonexistent"));
        assert!(matches!(result, Err(ConfigError::ZeroDuration("sync-period"))));
    }

    #[test]
    fn test_leader_election_settings() {
        let settings = resolve(&[
            "--enable-leader-election",
            "--leader-election-namespace",
            "capi-system",
        ]);

        let lease = settings.leader_election.as_ref().unwrap();
        assert_eq!(lease.lease_name, "controller-leader-election-capi");
        assert_eq!(lease.namespace, "capi-system");
        assert!(lease.identity.starts_with("node-a_"), "identity was {}", lease.identity);
        assert_eq!(settings.manager_options().leader_election.unwrap().namespace, "capi-system");
    }

    #[test]
    fn test_namespace_filter() {
        assert_eq!(resolve(&["--namespace", "tenant-a"]).namespace.as_deref(), Some("tenant-a"));
        assert_eq!(resolve(&["--namespace", ""]).namespace, None);
    }
}
