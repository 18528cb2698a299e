//! Location Relay daemon
//!
//! CLI for running and managing the location-to-SMS tracking service.

use clap::{Args, Parser, Subcommand};
use location_relay::config::{Config, RelaySettings};
use location_relay::error::Error;
use location_relay::foreground::{host_for, ForegroundHost};
use location_relay::location::{CommandLocationProvider, LocationSample};
use location_relay::phone::{is_valid_phone, normalize_phone};
use location_relay::sms::{format_location_message, CommandTransport};
use location_relay::tracker::{send_message, ServiceState, TrackerOptions, TrackingService};
use location_relay::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BOOT_SCRIPT: &str = "location-relay";
const TEST_MESSAGE: &str = "Location Tracker test message";

/// Location Relay - text your location on a schedule
#[derive(Parser)]
#[command(name = "location-relay")]
#[command(about = "Relay periodic location fixes to a phone number by SMS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct SessionArgs {
    /// Recipient phone number (overrides the config file)
    #[arg(long, env = "LOCATION_RELAY_TO")]
    to: Option<String>,

    /// Minimum milliseconds between fixes (overrides the config file)
    #[arg(long, env = "LOCATION_RELAY_INTERVAL_MS")]
    interval_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the background
    Start(SessionArgs),

    /// Stop the daemon
    Stop,

    /// Restart the daemon
    Restart(SessionArgs),

    /// Show daemon status
    Status,

    /// Tail the log file
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,

        /// Don't follow the log
        #[arg(long = "no-follow")]
        no_follow: bool,
    },

    /// Run the tracking service in the foreground
    Run(SessionArgs),

    /// Print a single location fix
    Locate,

    /// Send a test SMS
    SendTest {
        /// Recipient phone number (defaults to the configured one)
        #[arg(long)]
        to: Option<String>,

        /// Message text
        #[arg(default_value = TEST_MESSAGE)]
        message: String,
    },

    /// Print the update message for a coordinate
    Format {
        #[arg(allow_hyphen_values = true)]
        latitude: f64,

        #[arg(allow_hyphen_values = true)]
        longitude: f64,
    },

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Install a Termux:Boot script for auto-start
    Install,

    /// Remove the Termux:Boot script
    Uninstall,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // init-config must work even when the existing file is broken
    let mut config = match cli.command {
        Commands::InitConfig { .. } => Config::default(),
        _ => Config::load()?,
    };

    match cli.command {
        Commands::Start(args) => cmd_start(&config, &args),
        Commands::Stop => cmd_stop(&config),
        Commands::Restart(args) => cmd_restart(&config, &args),
        Commands::Status => cmd_status(&config),
        Commands::Logs { lines, no_follow } => cmd_logs(&config, lines, !no_follow),
        Commands::Run(args) => cmd_run(&mut config, &args),
        Commands::Locate => cmd_locate(&config),
        Commands::SendTest { to, message } => cmd_send_test(&config, to, &message),
        Commands::Format {
            latitude,
            longitude,
        } => cmd_format(latitude, longitude),
        Commands::InitConfig { force } => cmd_init_config(&config, force),
        Commands::Install => cmd_install(&config),
        Commands::Uninstall => cmd_uninstall(&config),
    }
}

// ============================================================================
// Daemon management
// ============================================================================

fn get_pid(config: &Config) -> Option<u32> {
    if !config.pid_file.exists() {
        return None;
    }

    let content = fs::read_to_string(&config.pid_file).ok()?;
    let pid: u32 = content.trim().parse().ok()?;

    if process_alive(pid) {
        Some(pid)
    } else {
        // PID file exists but process is dead
        let _ = fs::remove_file(&config.pid_file);
        None
    }
}

fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn session_flags(args: &SessionArgs) -> Vec<String> {
    let mut flags = Vec::new();
    if let Some(to) = &args.to {
        flags.push("--to".to_string());
        flags.push(to.clone());
    }
    if let Some(ms) = args.interval_ms {
        flags.push("--interval-ms".to_string());
        flags.push(ms.to_string());
    }
    flags
}

fn cmd_start(config: &Config, args: &SessionArgs) -> Result<()> {
    if let Some(pid) = get_pid(config) {
        println!("Daemon already running (PID {})", pid);
        return Ok(());
    }

    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.logs_dir)?;

    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;

    let exe = std::env::current_exe()?;

    let child = Command::new(&exe)
        .arg("run")
        .args(session_flags(args))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;

    fs::write(&config.pid_file, child.id().to_string())?;

    println!("Daemon started (PID {})", child.id());
    println!("Logs: {}", config.log_file.display());

    Ok(())
}

fn cmd_stop(config: &Config) -> Result<()> {
    let pid = match get_pid(config) {
        Some(p) => p,
        None => {
            println!("Daemon not running");
            return Ok(());
        }
    };

    println!("Stopping daemon (PID {})...", pid);

    // SIGTERM lets the service release its subscription and notice
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    for _ in 0..10 {
        std::thread::sleep(Duration::from_millis(500));
        if !process_alive(pid) {
            break;
        }
    }

    if process_alive(pid) {
        println!("Force killing...");
        let _ = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status();
    }

    let _ = fs::remove_file(&config.pid_file);

    println!("Daemon stopped");
    Ok(())
}

fn cmd_restart(config: &Config, args: &SessionArgs) -> Result<()> {
    if get_pid(config).is_some() {
        cmd_stop(config)?;
        std::thread::sleep(Duration::from_secs(1));
    }
    cmd_start(config, args)
}

fn cmd_status(config: &Config) -> Result<()> {
    if let Some(pid) = get_pid(config) {
        let result = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "etime="])
            .output();

        match result {
            Ok(output) if output.status.success() => {
                let uptime = String::from_utf8_lossy(&output.stdout);
                println!("Daemon running (PID {}, uptime {})", pid, uptime.trim());
            }
            _ => println!("Daemon running (PID {})", pid),
        }
    } else {
        println!("Daemon not running");
    }

    let settings = &config.settings;
    println!(
        "Recipient: {}",
        settings.recipient.as_deref().unwrap_or("(not configured)")
    );
    println!("Interval: {} ms", settings.interval_ms);
    println!("Config: {}", config.config_file.display());

    Ok(())
}

fn cmd_logs(config: &Config, lines: u32, follow: bool) -> Result<()> {
    if !config.log_file.exists() {
        println!("Log file not found: {}", config.log_file.display());
        return Ok(());
    }

    let mut cmd = Command::new("tail");
    if follow {
        cmd.arg("-f");
    }
    cmd.arg("-n").arg(lines.to_string()).arg(&config.log_file);

    let _ = cmd.status();
    Ok(())
}

fn cmd_install(config: &Config) -> Result<()> {
    let exe = std::env::current_exe()?;
    let script_path = config.boot_dir.join(BOOT_SCRIPT);

    let script = format!(
        "#!/data/data/com.termux/files/usr/bin/sh\ntermux-wake-lock\nexec \"{}\" start\n",
        exe.display()
    );

    fs::create_dir_all(&config.boot_dir)?;
    fs::write(&script_path, script)?;
    fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;

    println!("Installed: {}", script_path.display());
    println!("Termux:Boot will start the daemon after reboot");

    Ok(())
}

fn cmd_uninstall(config: &Config) -> Result<()> {
    let script_path = config.boot_dir.join(BOOT_SCRIPT);

    if !script_path.exists() {
        println!("Boot script not installed");
        return Ok(());
    }

    fs::remove_file(&script_path)?;
    println!("Boot script removed");

    Ok(())
}

// ============================================================================
// Tracking
// ============================================================================

/// Normalize a CLI-supplied number; implausible ones pass through with a warning
fn prepare_recipient(recipient: Option<String>) -> Option<String> {
    recipient.map(|r| {
        if is_valid_phone(&r) {
            normalize_phone(&r)
        } else {
            warn!("Recipient {:?} does not look like a phone number", r);
            r
        }
    })
}

/// Wire the command-backed collaborators selected in settings
fn build_service(settings: &RelaySettings) -> TrackingService {
    let provider = Arc::new(CommandLocationProvider::from_settings(settings));
    let transport = Arc::new(CommandTransport::from_settings(settings));
    let host: Arc<dyn ForegroundHost> = Arc::from(host_for(settings));

    TrackingService::new(
        provider,
        transport,
        host,
        TrackerOptions {
            allow_restart: settings.allow_restart,
            tap_action: settings.tap_action.clone(),
        },
    )
}

/// Re-read the config file and replace the running service with one built
/// from it. The old service is stopped before the new one starts.
fn reload_service(
    config: &mut Config,
    service: &mut TrackingService,
    recipient: Option<String>,
    interval_ms: Option<u64>,
) -> Result<()> {
    config.reload()?;

    let session = config.settings.session(recipient, interval_ms);
    service.stop();
    *service = build_service(&config.settings);
    service.start(session)?;

    info!(
        interval_ms = service.session().map(|s| s.interval.as_millis() as u64),
        "Applied reloaded config"
    );
    Ok(())
}

fn cmd_run(config: &mut Config, args: &SessionArgs) -> Result<()> {
    info!("Location relay starting");

    let mut service = build_service(&config.settings);
    let recipient = prepare_recipient(args.to.clone());
    service.start(config.settings.session(recipient.clone(), args.interval_ms))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading config");
                    if let Err(e) = reload_service(config, &mut service, recipient.clone(), args.interval_ms) {
                        if service.state() != ServiceState::Running {
                            error!("Failed to apply reloaded config: {}", e);
                            return Err(e);
                        }
                        error!("Failed to reload config, keeping current settings: {}", e);
                    }
                }
            }
        }

        Ok::<(), Error>(())
    })?;

    service.stop();
    info!("Location relay exiting");
    Ok(())
}

fn cmd_locate(config: &Config) -> Result<()> {
    let provider = CommandLocationProvider::from_settings(&config.settings);
    let sample: LocationSample = provider.fetch()?;
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

fn cmd_send_test(config: &Config, to: Option<String>, message: &str) -> Result<()> {
    let recipient = prepare_recipient(to)
        .or_else(|| config.settings.recipient.clone())
        .ok_or_else(|| Error::Config("no recipient: pass --to or set one in the config".to_string()))?;

    let transport = CommandTransport::from_settings(&config.settings);
    send_message(&transport, &recipient, message)?;

    println!("Test message sent to {}", recipient);
    Ok(())
}

fn cmd_format(latitude: f64, longitude: f64) -> Result<()> {
    println!(
        "{}",
        format_location_message(&LocationSample::new(latitude, longitude))
    );
    Ok(())
}

fn cmd_init_config(config: &Config, force: bool) -> Result<()> {
    if config.config_file.exists() && !force {
        println!(
            "Config already exists: {} (use --force to overwrite)",
            config.config_file.display()
        );
        return Ok(());
    }

    config.save()?;
    println!("Wrote {}", config.config_file.display());
    Ok(())
}
