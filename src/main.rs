//! fanoutd - session core inspection tool

use clap::{Parser, Subcommand};
use fanoutd_core::{classify, Candidate, Config, OperPolicy, Server};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info};

/// Session lifecycle, admission control and fanout core for an IRC daemon
#[derive(Parser)]
#[command(name = "fanoutd")]
#[command(about = "Session lifecycle, admission control and fanout core for an IRC daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Validate the configuration and list connect classes
    Check,
    /// Show which connect class a connection would be admitted to
    Classify {
        /// Peer address
        #[arg(short, long)]
        address: IpAddr,
        /// Resolved host name, defaults to the address
        #[arg(long)]
        host: Option<String>,
        /// Local port the connection arrived on
        #[arg(short, long)]
        port: Option<u16>,
        /// Look the class up by name instead of scanning
        #[arg(long)]
        class: Option<String>,
    },
    /// Show what an operator type is granted
    OperType {
        /// Operator type name
        name: String,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Config { output }) => generate_config(&output),
        Some(Commands::Version) => {
            show_version();
            Ok(())
        }
        Some(Commands::Check) | None => {
            let config = load_config(&cli.config)?;
            check(config)
        }
        Some(Commands::Classify {
            address,
            host,
            port,
            class,
        }) => {
            let config = load_config(&cli.config)?;
            show_class(config, address, host, port, class)
        }
        Some(Commands::OperType { name }) => {
            let config = load_config(&cli.config)?;
            show_oper_type(&config, &name)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let config = if path.exists() {
        info!("Loading configuration from {:?}", path);
        Config::from_file(path)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

fn check(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config)?;
    info!("Configuration is valid");

    println!("{:<16} {:<6} {:>9} {:>6}", "class", "kind", "occupancy", "limit");
    for stats in server.classes().get_all_stats() {
        println!(
            "{:<16} {:<6} {:>9} {:>6}",
            stats.class_name,
            format!("{:?}", stats.kind).to_lowercase(),
            stats.occupancy,
            stats.limit
        );
    }
    Ok(())
}

fn show_class(
    config: Config,
    address: IpAddr,
    host: Option<String>,
    port: Option<u16>,
    class: Option<String>,
) -> anyhow::Result<()> {
    let server = Server::new(config)?;
    let host = host.unwrap_or_else(|| address.to_string());
    let candidate = Candidate::new(address, &host, port);

    match classify(server.classes(), &candidate, class.as_deref(), None) {
        Ok(handle) => {
            let class = handle.read();
            println!("{} is admitted to class {}", host, class.name);
            println!("  sendq: {} soft / {} hard", class.sendq_soft, class.sendq_hard);
            println!("  recvq: {}", class.recvq);
            println!(
                "  ping every {}s, register within {}s",
                class.ping_interval, class.registration_timeout
            );
            println!("  per address: {} local / {} global", class.max_local, class.max_global);
        }
        Err(e) => {
            error!("{} is refused: {}", host, e);
            println!("{}", e.rejection_line(&host));
        }
    }
    Ok(())
}

fn show_oper_type(config: &Config, name: &str) -> anyhow::Result<()> {
    let policy = OperPolicy::new(&config.oper_types, &config.oper_classes);
    let Some(grants) = policy.resolve(name) else {
        anyhow::bail!("Operator type {} is not defined", name);
    };

    let mut commands: Vec<_> = grants.commands.iter().cloned().collect();
    commands.sort();
    let mut privileges: Vec<_> = grants.privileges.iter().cloned().collect();
    privileges.sort();

    println!("Operator type {}", name);
    println!("  commands:   {}", commands.join(" "));
    println!("  privileges: {}", privileges.join(" "));
    println!("  user modes: {}", grants.user_modes);
    println!("  chan modes: {}", grants.chan_modes);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("fanoutd {}", env!("CARGO_PKG_VERSION"));
}
