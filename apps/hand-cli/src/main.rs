use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use can_transport as can;
use can_transport::{CanBus, SharedBus};
use hand_driver::{
    load_hand_config, load_hand_configs_dir, probe_order, DriverMetrics, FollowLoop, HandConfig,
    HandDriver, HandRegistry, JsonlTargets, Side,
};
use hand_protocol::sim::{SimBus, SimulatedHand};
use hand_protocol::{ChannelError, ParamChannel, ParamKind};

#[derive(Parser, Debug)]
#[command(
    name = "handctl",
    version,
    about = "Control multi-joint robotic hands over CAN",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the simulated bus (hands 50 left and 51 right)
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// CAN backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true)]
    backend: Backend,

    /// Interface: serial port for slcan, interface name for socketcan
    #[arg(long, global = true)]
    device: Option<String>,

    /// Bitrate for SLCAN
    #[arg(long, value_enum, global = true)]
    bitrate: Option<Bitrate>,

    /// Hand configuration YAML
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bind this device id instead of scanning
    #[arg(long, global = true)]
    can_id: Option<u8>,

    /// Only bind a hand of this side
    #[arg(long, global = true)]
    side: Option<Side>,

    /// Print driver metrics after the command
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Slcan,
    Socketcan,
}

impl Backend {
    fn default_device(self) -> &'static str {
        match self {
            Backend::Mock => "sim0",
            Backend::Slcan => "/dev/ttyACM0",
            Backend::Socketcan => "can0",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available CAN interfaces
    CanList,
    /// Probe every device id and list the hands that answer
    Scan,
    /// Print identity and joint readings of one hand
    Info {
        /// Emit JSON instead of text
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Enable the joint motors
    Enable,
    /// Disable the joint motors
    Disable,
    /// Blend a named grasp, 0 = open, 1 = closed
    Grasp { name: String, t: f32 },
    /// Command every joint, radians
    SetPositions {
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        values: Vec<f32>,
    },
    /// Command one joint (1-based id), radians
    SetJoint {
        joint: u8,
        #[arg(allow_negative_numbers = true)]
        value: f32,
    },
    /// Read, or with a value set, the torque limit in [0, 1]
    TorqueLimit { value: Option<f32> },
    /// Move the hand to a new device id
    SetId { new_id: u8 },
    /// Store which side the hand is
    SetSide { side: Side },
    /// Stream joint targets from a JSON-lines file
    Follow {
        #[arg(long)]
        from: PathBuf,
        #[arg(long, default_value_t = FollowLoop::DEFAULT_RATE_HZ)]
        rate_hz: f32,
        /// Give up after this many consecutive dropped cycles
        #[arg(long, default_value_t = FollowLoop::DEFAULT_MAX_CONSECUTIVE_DROPS)]
        max_drops: u32,
    },
    /// Validate a hand config file, or every config in a directory
    ConfigValidate { path: Option<PathBuf> },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let backend = if cli.mock { Backend::Mock } else { cli.backend };

    match &cli.command {
        Commands::CanList => return can_list(backend),
        Commands::ConfigValidate { path } => {
            let path = path
                .as_deref()
                .or(cli.config.as_deref())
                .ok_or_else(|| anyhow::anyhow!("config-validate needs a path or --config"))?;
            return config_validate(path);
        }
        _ => {}
    }

    let metrics = DriverMetrics::new().context("initialising metrics")?;
    let device = cli
        .device
        .clone()
        .unwrap_or_else(|| backend.default_device().to_string());
    match backend {
        Backend::Mock => run(SharedBus::new(mock_bus()), &cli, &metrics)?,
        Backend::Slcan => {
            let br = cli.bitrate.map(|b| b.into_transport());
            let bus = can::SlcanBus::open_with(&device, br)
                .with_context(|| format!("opening slcan on {device}"))?;
            run(SharedBus::new(bus), &cli, &metrics)?
        }
        Backend::Socketcan => run_socketcan(&device, &cli, &metrics)?,
    }

    if cli.metrics {
        print!("{}", metrics.encode_text());
    }
    Ok(())
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn mock_bus() -> SimBus {
    SimBus::new()
        .with_device(SimulatedHand::new(50, Side::Left))
        .with_device(SimulatedHand::new(51, Side::Right))
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn run_socketcan(device: &str, cli: &Cli, metrics: &DriverMetrics) -> Result<()> {
    let bus = can::SocketCanBus::open(device)
        .with_context(|| format!("opening socketcan interface {device}"))?;
    run(SharedBus::new(bus), cli, metrics)
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn run_socketcan(_device: &str, _cli: &Cli, _metrics: &DriverMetrics) -> Result<()> {
    anyhow::bail!("handctl was built without SocketCAN support (feature `socketcan`, Linux only)")
}

fn can_list(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => SimBus::list()?,
        Backend::Slcan => can::SlcanBus::list()?,
        Backend::Socketcan => socketcan_list()?,
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn socketcan_list() -> Result<Vec<can::BusInfo>> {
    Ok(can::SocketCanBus::list()?)
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn socketcan_list() -> Result<Vec<can::BusInfo>> {
    anyhow::bail!("handctl was built without SocketCAN support (feature `socketcan`, Linux only)")
}

fn hand_config(cli: &Cli) -> Result<HandConfig> {
    let mut config = match &cli.config {
        Some(path) => load_hand_config(path)?,
        None => HandConfig::default(),
    };
    if cli.can_id.is_some() {
        config.device_id = cli.can_id;
    }
    if cli.side.is_some() {
        config.side = cli.side;
    }
    config.validate().context("checking command-line overrides")?;
    Ok(config)
}

fn run<B: CanBus>(bus: SharedBus<B>, cli: &Cli, metrics: &DriverMetrics) -> Result<()> {
    let config = hand_config(cli)?;
    if let Commands::Scan = cli.command {
        return scan(&bus, &config);
    }

    let registry = HandRegistry::new();
    let mut hand = HandDriver::connect(bus, &config, &registry)?.with_metrics(metrics.clone());
    match &cli.command {
        Commands::Info { json } => info_cmd(&mut hand, *json)?,
        Commands::Enable => hand.enable()?,
        Commands::Disable => hand.disable()?,
        Commands::Grasp { name, t } => hand.set_grasp(name, *t)?,
        Commands::SetPositions { values } => hand.set_positions(values)?,
        Commands::SetJoint { joint, value } => hand.set_single_position(*joint, *value)?,
        Commands::TorqueLimit { value: Some(v) } => hand.set_torque_limit(*v)?,
        Commands::TorqueLimit { value: None } => println!("{:.3}", hand.torque_limit()?),
        Commands::SetId { new_id } => {
            let old = hand.device_id();
            hand.set_device_id(*new_id)?;
            println!("device id {old} -> {new_id}");
        }
        Commands::SetSide { side } => hand.set_side(*side)?,
        Commands::Follow {
            from,
            rate_hz,
            max_drops,
        } => {
            let mut source = JsonlTargets::open(from)?;
            let report = FollowLoop::new(*rate_hz)?
                .with_max_consecutive_drops(*max_drops)
                .run(&mut hand, &mut source)?;
            println!("cycles={} dropped={}", report.cycles, report.dropped);
        }
        Commands::CanList | Commands::Scan | Commands::ConfigValidate { .. } => {}
    }
    Ok(())
}

/// One pass over the id space, listing every hand that answers.
fn scan<B: CanBus>(bus: &SharedBus<B>, config: &HandConfig) -> Result<()> {
    let probe = config
        .channel_config()?
        .with_timeout(config.discovery_timeout());
    let mut guard = bus.lock()?;
    let mut found = 0usize;
    for id in probe_order() {
        match ParamChannel::new(&mut *guard, probe.for_device(id)?).read(ParamKind::HandSide) {
            Ok(raw) => {
                let side = Side::from_wire(raw);
                if config.side.map_or(true, |s| s == side) {
                    println!("{id}\t{side}");
                    found += 1;
                }
            }
            Err(e) if e.is_recoverable() => {}
            Err(e @ ChannelError::Transport(_)) => return Err(e.into()),
            Err(e) => warn!(id, error = %e, "hand answered with an error"),
        }
    }
    info!(found, "scan complete");
    if found == 0 {
        println!("no hands found");
    }
    Ok(())
}

fn info_cmd<B: CanBus>(hand: &mut HandDriver<B>, json: bool) -> Result<()> {
    let side = hand.side()?;
    let version = hand.version()?;
    let uptime = hand.start_time()?;
    let torque_limit = hand.torque_limit()?;
    let status = hand.status()?;
    let joints = hand.joint_info()?;
    if json {
        let doc = serde_json::json!({
            "side": side,
            "version": version,
            "start_time_s": uptime,
            "torque_limit": torque_limit,
            "status": status,
            "joints": joints,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }
    println!("device_id:    {}", status.device_id);
    println!("side:         {side}");
    println!("version:      {version}");
    println!("start_time:   {uptime:.1} s");
    println!("enabled:      {}", status.enabled);
    println!("torque_limit: {torque_limit:.3}");
    println!("joint\tposition\ttorque\ttemp");
    for j in joints {
        println!(
            "{}\t{:.3}\t\t{:.2}\t{:.1}",
            j.id, j.position, j.torque, j.temperature
        );
    }
    Ok(())
}

fn config_validate(path: &Path) -> Result<()> {
    if path.is_dir() {
        let loaded = load_hand_configs_dir(path)?;
        for (p, cfg) in &loaded {
            println!("ok\t{}\t{}", p.display(), describe(cfg));
        }
        println!("{} config(s) valid", loaded.len());
    } else {
        let cfg = load_hand_config(path)?;
        println!("ok\t{}\t{}", path.display(), describe(&cfg));
    }
    Ok(())
}

fn describe(cfg: &HandConfig) -> String {
    let id = cfg
        .device_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "scan".to_string());
    let side = cfg
        .side
        .map(|s| s.to_string())
        .unwrap_or_else(|| "any".to_string());
    format!("device={id} side={side} joints={}", cfg.joint_count)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Bitrate {
    #[value(name = "10k")]
    B10k,
    #[value(name = "20k")]
    B20k,
    #[value(name = "50k")]
    B50k,
    #[value(name = "100k")]
    B100k,
    #[value(name = "125k")]
    B125k,
    #[value(name = "250k")]
    B250k,
    #[value(name = "500k")]
    B500k,
    #[value(name = "800k")]
    B800k,
    #[value(name = "1m")]
    B1M,
}

impl Bitrate {
    fn into_transport(self) -> can::SlcanBitrate {
        match self {
            Bitrate::B10k => can::SlcanBitrate::B10k,
            Bitrate::B20k => can::SlcanBitrate::B20k,
            Bitrate::B50k => can::SlcanBitrate::B50k,
            Bitrate::B100k => can::SlcanBitrate::B100k,
            Bitrate::B125k => can::SlcanBitrate::B125k,
            Bitrate::B250k => can::SlcanBitrate::B250k,
            Bitrate::B500k => can::SlcanBitrate::B500k,
            Bitrate::B800k => can::SlcanBitrate::B800k,
            Bitrate::B1M => can::SlcanBitrate::B1M,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_negative_positions() {
        let cli = Cli::try_parse_from([
            "handctl", "--mock", "--can-id", "50", "set-positions", "0.1", "-0.05",
        ])
        .unwrap();
        assert!(cli.mock);
        assert_eq!(cli.can_id, Some(50));
        match cli.command {
            Commands::SetPositions { values } => assert_eq!(values, vec![0.1, -0.05]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_side_argument() {
        let cli = Cli::try_parse_from(["handctl", "--side", "right", "enable"]).unwrap();
        assert_eq!(cli.side, Some(Side::Right));
    }

    #[test]
    fn test_mock_grasp_runs() {
        let cli =
            Cli::try_parse_from(["handctl", "--mock", "--side", "right", "grasp", "tip", "0.5"])
                .unwrap();
        let metrics = DriverMetrics::new().unwrap();
        run(SharedBus::new(mock_bus()), &cli, &metrics).unwrap();
        assert!(metrics.encode_text().contains("set_positions"));
    }
}
