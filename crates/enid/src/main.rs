// # enid - ENI Reconciler Daemon
//
// This daemon is a THIN integration layer:
// - No reconciliation, ordering or compensation logic lives here
// - All of that is in eni-core
// - Configuration is via environment variables ONLY
//
// The enid daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the control plane, local identity and capacity table
// 4. Running one reconcile or release, or reconciling periodically
//
// ## Configuration
//
// ### Control Plane
// - `ENI_REGION`: Region to operate in (required)
// - `ENI_ENDPOINT_URL`: Endpoint override (optional)
// - `ENI_PROFILE`: Named credentials profile (optional)
// - `ENI_MODE`: `live` (default) or `dry-run`
//
// ### Command
// - `ENI_COMMAND`: `reconcile` (default) or `release`
// - `ENI_RELEASE_ADDRESS`: Private address to release (for release)
// - `ENI_REATTACH`: Bind a new public address after releasing (true/false)
// - `ENI_RECONCILE_INTERVAL_SECS`: Reconcile periodically instead of once
//
// ### Engine
// - `ENI_CAPACITY_FILE`: JSON file with capacity overrides by hardware class
// - `ENI_RELEASE_UNASSOCIATED`: Release allocations whose binding failed (true/false)
// - `ENI_IDENTITY_LINK_INDEX`: Only read local addresses from this interface index (optional)
// - `ENI_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export ENI_REGION=us-east-1
// export ENI_RECONCILE_INTERVAL_SECS=300
// export ENI_RELEASE_UNASSOCIATED=true
//
// enid
// ```

use anyhow::{Context, Result};
use eni_core::{
    ControlPlane, ControlPlaneConfig, EngineConfig, EngineEvent, EniConfig, EniEngine,
    LocalIdentity, ReleaseOutcome, StaticCapacityTable,
};
use std::env;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum EnidExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<EnidExitCode> for ExitCode {
    fn from(code: EnidExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What the daemon was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Converge interfaces and bindings
    Reconcile,
    /// Release the public address bound to a private address
    Release { address: Ipv4Addr, reattach: bool },
}

/// Application configuration
#[derive(Debug)]
struct Config {
    region: String,
    endpoint_url: Option<String>,
    profile: Option<String>,
    command: String,
    release_address: Option<String>,
    reattach: bool,
    capacity_file: Option<String>,
    release_unassociated: bool,
    reconcile_interval_secs: Option<u64>,
    identity_link_index: Option<u32>,
    mode: String,
    log_level: String,
}

/// Parse a boolean flag; anything but true/1/yes is false
fn parse_flag(value: Option<String>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from a variable lookup
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            region: var("ENI_REGION").unwrap_or_default(),
            endpoint_url: var("ENI_ENDPOINT_URL").filter(|s| !s.is_empty()),
            profile: var("ENI_PROFILE").filter(|s| !s.is_empty()),
            command: var("ENI_COMMAND").unwrap_or_else(|| "reconcile".to_string()),
            release_address: var("ENI_RELEASE_ADDRESS"),
            reattach: parse_flag(var("ENI_REATTACH")),
            capacity_file: var("ENI_CAPACITY_FILE").filter(|s| !s.is_empty()),
            release_unassociated: parse_flag(var("ENI_RELEASE_UNASSOCIATED")),
            reconcile_interval_secs: var("ENI_RECONCILE_INTERVAL_SECS")
                .map(|s| s.parse())
                .transpose()
                .context("ENI_RECONCILE_INTERVAL_SECS must be a whole number of seconds")?,
            identity_link_index: var("ENI_IDENTITY_LINK_INDEX")
                .filter(|s| !s.is_empty())
                .map(|s| s.parse())
                .transpose()
                .context("ENI_IDENTITY_LINK_INDEX must be an interface index")?,
            mode: var("ENI_MODE").unwrap_or_else(|| "live".to_string()),
            log_level: var("ENI_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// The region is never defaulted; a missing region is a startup error.
    fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            anyhow::bail!(
                "ENI_REGION is required. \
                Set it via: export ENI_REGION=us-east-1"
            );
        }

        if let Some(ref url) = self.endpoint_url
            && !url.starts_with("https://")
            && !url.starts_with("http://")
        {
            anyhow::bail!(
                "ENI_ENDPOINT_URL must use HTTP or HTTPS scheme. Got: {}",
                url
            );
        }

        match self.mode.to_lowercase().as_str() {
            "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "ENI_MODE '{}' is not valid. Valid modes: live, dry-run",
                self.mode
            ),
        }

        let command = self.command()?;

        if matches!(command, Command::Release { .. }) && self.reconcile_interval_secs.is_some() {
            anyhow::bail!("ENI_RECONCILE_INTERVAL_SECS cannot be combined with ENI_COMMAND=release");
        }

        if let Some(interval) = self.reconcile_interval_secs
            && !(10..=86400).contains(&interval)
        {
            anyhow::bail!(
                "ENI_RECONCILE_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                interval
            );
        }

        if let Some(ref path) = self.capacity_file
            && !std::path::Path::new(path).is_file()
        {
            anyhow::bail!("ENI_CAPACITY_FILE does not exist: {}", path);
        }

        if self.identity_link_index == Some(0) {
            anyhow::bail!("ENI_IDENTITY_LINK_INDEX must be a positive interface index");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ENI_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// The requested command
    fn command(&self) -> Result<Command> {
        match self.command.to_lowercase().as_str() {
            "reconcile" => Ok(Command::Reconcile),
            "release" => {
                let raw = self
                    .release_address
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .context("ENI_RELEASE_ADDRESS is required when ENI_COMMAND=release")?;
                let address = raw.trim().parse().with_context(|| {
                    format!("ENI_RELEASE_ADDRESS is not an IPv4 address: {}", raw)
                })?;
                Ok(Command::Release {
                    address,
                    reattach: self.reattach,
                })
            }
            other => anyhow::bail!(
                "ENI_COMMAND '{}' is not supported. Supported commands: reconcile, release",
                other
            ),
        }
    }

    fn dry_run(&self) -> bool {
        self.mode.eq_ignore_ascii_case("dry-run")
    }

    /// Library configuration built from the environment
    fn eni_config(&self) -> Result<EniConfig> {
        let capacity_overrides = match self.capacity_file {
            Some(ref path) => EniConfig::capacity_overrides_from_json_file(path)
                .with_context(|| format!("Failed to read capacity overrides from {}", path))?,
            None => Default::default(),
        };

        let config = EniConfig {
            control_plane: ControlPlaneConfig::Ec2 {
                region: self.region.clone(),
                endpoint_url: self.endpoint_url.clone(),
                profile: self.profile.clone(),
                dry_run: self.dry_run(),
            },
            capacity_overrides,
            engine: EngineConfig {
                release_unassociated_allocations: self.release_unassociated,
                ..EngineConfig::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return EnidExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return EnidExitCode::ConfigError.into();
    }

    let eni_config = match config.eni_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return EnidExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return EnidExitCode::ConfigError.into();
    }

    info!("Starting enid daemon");
    info!(
        "Region: {} (mode: {}, capacity overrides: {})",
        config.region,
        config.mode,
        eni_config.capacity_overrides.len()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return EnidExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, eni_config).await {
            error!("Daemon error: {:#}", e);
            EnidExitCode::RuntimeError
        } else {
            EnidExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the control-plane client
#[cfg(feature = "ec2")]
async fn create_control_plane(config: &ControlPlaneConfig) -> Result<Box<dyn ControlPlane>> {
    use eni_core::ControlPlaneFactory;

    info!("Creating EC2 control plane");
    Ok(eni_provider_ec2::Ec2Factory.create(config).await?)
}

#[cfg(not(feature = "ec2"))]
async fn create_control_plane(_config: &ControlPlaneConfig) -> Result<Box<dyn ControlPlane>> {
    anyhow::bail!("No control plane is available in this build (enable the `ec2` feature)")
}

/// Build the local identity resolver
fn create_identity(link_index: Option<u32>) -> Box<dyn LocalIdentity> {
    #[cfg(feature = "netlink")]
    {
        match link_index {
            Some(index) => {
                info!("Using Netlink local identity on interface index {}", index);
                Box::new(eni_ip_netlink::NetlinkIdentity::for_link(index))
            }
            None => {
                info!("Using Netlink local identity");
                Box::new(eni_ip_netlink::NetlinkIdentity::new())
            }
        }
    }

    #[cfg(not(feature = "netlink"))]
    {
        if link_index.is_some() {
            warn!("ENI_IDENTITY_LINK_INDEX ignored; Netlink feature disabled");
        }
        warn!("Netlink feature disabled; the primary address cannot be protected");
        Box::new(eni_core::StaticIdentity::default())
    }
}

/// Run the daemon
async fn run_daemon(config: Config, eni_config: EniConfig) -> Result<()> {
    let command = config.command()?;

    let control_plane = create_control_plane(&eni_config.control_plane).await?;
    let identity = create_identity(config.identity_link_index);
    let capacity = StaticCapacityTable::builtin().with_overrides(eni_config.capacity_overrides);

    let (engine, event_rx) = EniEngine::new(
        control_plane,
        identity,
        Box::new(capacity),
        eni_config.engine,
    )?;

    // Ends once the engine (and its sender) is dropped.
    let event_logger = tokio::spawn(log_events(event_rx));

    let result = match (command, config.reconcile_interval_secs) {
        (Command::Reconcile, None) => reconcile_once(&engine).await,
        (Command::Reconcile, Some(secs)) => {
            reconcile_periodically(&engine, Duration::from_secs(secs)).await
        }
        (Command::Release { address, reattach }, _) => release(&engine, address, reattach).await,
    };

    drop(engine);
    if let Err(e) = event_logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    result
}

/// Run a single reconciliation cycle
async fn reconcile_once(engine: &EniEngine) -> Result<()> {
    let report = engine.run_cycle().await?;
    if report.is_noop() {
        info!("Instance {} already at capacity", report.instance_id);
    }
    Ok(())
}

/// Reconcile on a fixed interval until SIGTERM or SIGINT
///
/// A failed cycle is logged and the next tick tries again; partial progress
/// is picked up by the next snapshot.
async fn reconcile_periodically(engine: &EniEngine, period: Duration) -> Result<()> {
    info!("Reconciling every {:?}", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!("Received shutdown signal: {}", signal);
                info!("Shutting down daemon");
                return Ok(());
            }
            tick = ticks.next() => {
                if tick.is_none() {
                    return Ok(());
                }
                match engine.run_cycle().await {
                    Ok(report) => debug!(
                        "Cycle for {} issued {} mutation(s)",
                        report.instance_id,
                        report.mutation_count()
                    ),
                    Err(e) => error!("Reconciliation cycle failed: {}", e),
                }
            }
        }
    }
}

/// Release (and optionally replace) the public address on one private address
async fn release(engine: &EniEngine, address: Ipv4Addr, reattach: bool) -> Result<()> {
    let snapshot = engine.load().await?;

    match engine.release(&snapshot, address, reattach).await? {
        ReleaseOutcome::Released { allocation_id, .. } => {
            info!("Released {} from {}", allocation_id, address);
        }
        ReleaseOutcome::Reattached {
            released_allocation_id,
            record,
            ..
        } => {
            info!(
                "Replaced {} with {} ({}) on {}",
                released_allocation_id, record.public_address, record.allocation_id, address
            );
        }
        ReleaseOutcome::PrimaryAddressProtected { address } => {
            warn!("{} is the primary address; nothing was released", address);
        }
    }

    Ok(())
}

/// Log engine events until the channel closes
async fn log_events(mut event_rx: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::AllocationLeaked {
                allocation_id,
                private_address,
                error,
            } => warn!(
                "Allocation {} is unassociated (binding {} failed: {})",
                allocation_id, private_address, error
            ),
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_region_is_required() {
        let config = config(&[]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_to_single_reconcile() {
        let config = config(&[("ENI_REGION", "us-east-1")]).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.command().unwrap(), Command::Reconcile);
        assert!(!config.dry_run());
        assert!(!config.release_unassociated);
        assert_eq!(config.reconcile_interval_secs, None);
    }

    #[test]
    fn test_release_requires_an_ipv4_address() {
        let missing = config(&[("ENI_REGION", "us-east-1"), ("ENI_COMMAND", "release")]).unwrap();
        assert!(missing.validate().is_err());

        let bad = config(&[
            ("ENI_REGION", "us-east-1"),
            ("ENI_COMMAND", "release"),
            ("ENI_RELEASE_ADDRESS", "10.0.0"),
        ])
        .unwrap();
        assert!(bad.validate().is_err());

        let good = config(&[
            ("ENI_REGION", "us-east-1"),
            ("ENI_COMMAND", "release"),
            ("ENI_RELEASE_ADDRESS", "10.0.0.11"),
            ("ENI_REATTACH", "true"),
        ])
        .unwrap();
        assert!(good.validate().is_ok());
        assert_eq!(
            good.command().unwrap(),
            Command::Release {
                address: Ipv4Addr::new(10, 0, 0, 11),
                reattach: true,
            }
        );
    }

    #[test]
    fn test_interval_bounds() {
        let too_short = config(&[
            ("ENI_REGION", "us-east-1"),
            ("ENI_RECONCILE_INTERVAL_SECS", "5"),
        ])
        .unwrap();
        assert!(too_short.validate().is_err());

        assert!(
            config(&[
                ("ENI_REGION", "us-east-1"),
                ("ENI_RECONCILE_INTERVAL_SECS", "soon"),
            ])
            .is_err()
        );
    }

    #[test]
    fn test_identity_link_index() {
        let all = config(&[("ENI_REGION", "us-east-1")]).unwrap();
        assert_eq!(all.identity_link_index, None);

        let one = config(&[("ENI_REGION", "us-east-1"), ("ENI_IDENTITY_LINK_INDEX", "2")]).unwrap();
        assert_eq!(one.identity_link_index, Some(2));
        assert!(one.validate().is_ok());

        let zero = config(&[("ENI_REGION", "us-east-1"), ("ENI_IDENTITY_LINK_INDEX", "0")]).unwrap();
        assert!(zero.validate().is_err());

        assert!(config(&[("ENI_REGION", "us-east-1"), ("ENI_IDENTITY_LINK_INDEX", "eth0")]).is_err());
    }

    #[test]
    fn test_unknown_mode_and_command_rejected() {
        let mode = config(&[("ENI_REGION", "us-east-1"), ("ENI_MODE", "yolo")]).unwrap();
        assert!(mode.validate().is_err());

        let command = config(&[("ENI_REGION", "us-east-1"), ("ENI_COMMAND", "destroy")]).unwrap();
        assert!(command.validate().is_err());
    }

    #[test]
    fn test_eni_config_carries_flags() {
        let config = config(&[
            ("ENI_REGION", "eu-west-1"),
            ("ENI_MODE", "dry-run"),
            ("ENI_RELEASE_UNASSOCIATED", "yes"),
        ])
        .unwrap();
        let eni_config = config.eni_config().unwrap();

        assert!(eni_config.engine.release_unassociated_allocations);
        match eni_config.control_plane {
            ControlPlaneConfig::Ec2 {
                region, dry_run, ..
            } => {
                assert_eq!(region, "eu-west-1");
                assert!(dry_run);
            }
            other => panic!("unexpected control plane: {other:?}"),
        }
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("TRUE".to_string())));
        assert!(parse_flag(Some("1".to_string())));
        assert!(!parse_flag(Some("false".to_string())));
        assert!(!parse_flag(None));
    }
}
