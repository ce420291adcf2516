//! tunhost - uid attribution and lifecycle host for an embedded traffic engine.

mod cli;

use crate::cli::{Args, Command};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tunhost::attribution::{ConnectionTuple, Protocol, UidBridge, UidResolver};
use tunhost::config::{self, Config};
use tunhost::context::HostContext;
use tunhost::engine::NullEngine;
use tunhost::error::{Error, Result};
use tunhost::ipc::{
    ControlServer, Request, Response, ServiceCommand, ServiceControl, ServiceController,
    SocketTransport,
};
use tunhost::lifecycle::Host;
use tunhost::process::{current_process_name, PackageCache, ProcessRole};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    match &args.command {
        Some(Command::Version) => {
            print_version();
            return Ok(());
        }
        Some(Command::Validate) => {
            return validate_config(&args);
        }
        Some(Command::ShowConfig { format }) => {
            return show_config(&args, format);
        }
        _ => {}
    }

    // Load configuration early so we can use its log_level
    let config = load_config(&args)?;
    init_logging(&args, &config.host.log_level);

    match &args.command {
        Some(Command::Start) => send_command(&config, ServiceCommand::Start).await,
        Some(Command::Reload) => send_command(&config, ServiceCommand::Reload).await,
        Some(Command::Stop) => send_command(&config, ServiceCommand::Close).await,
        Some(Command::Status) => show_status(&config).await,
        Some(Command::ResolveUid { uid, json }) => resolve_uid(&args, config, *uid, *json),
        Some(Command::LookupConnection {
            protocol,
            source,
            destination,
        }) => {
            let protocol: Protocol = protocol.parse()?;
            let tuple = ConnectionTuple::new(protocol, *source, *destination);
            lookup_connection(&args, config, &tuple)
        }
        Some(Command::Run) | None => run_host(&args, config).await,
        Some(Command::Version) | Some(Command::Validate) | Some(Command::ShowConfig { .. }) => {
            Ok(())
        }
    }
}

async fn run_host(args: &Args, config: Config) -> Result<()> {
    let process_name = process_name(args);
    tracing::info!("tunhost v{} starting as '{}'", VERSION, process_name);

    let socket_path = config.host.socket_path.clone();
    let application_id = config.host.application_id.clone();
    let context = HostContext::from_config(config, process_name);
    let host = Host::new(context, Arc::new(NullEngine::new()));

    if let Err(e) = host.initialize() {
        tracing::error!("Host initialization failed: {}", e);
        return Err(e);
    }

    // Only the background process receives service commands.
    let server_handle = if host.role() == ProcessRole::Background {
        let controller = Arc::new(ServiceController::new(application_id));
        let server = ControlServer::new(&socket_path, controller.clone()).await?;
        tracing::info!("Control socket: {}", socket_path.display());

        let mut events = controller.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::debug!("Service event {}: {:?}", event.id, event.transition);
            }
        });

        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("Control server error: {}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("Host ready ({} process)", host.role());

    setup_signal_handler().await;
    tracing::info!("Received shutdown signal");

    if let Some(handle) = server_handle {
        handle.abort();
    }
    tracing::info!("tunhost stopped");

    Ok(())
}

async fn send_command(config: &Config, command: ServiceCommand) -> Result<()> {
    let control = ServiceControl::new(
        config.host.application_id.clone(),
        SocketTransport::new(&config.host.socket_path),
    );
    match command {
        ServiceCommand::Start => control.send_start().await?,
        ServiceCommand::Reload => control.send_reload().await?,
        ServiceCommand::Close => control.send_stop().await?,
    }
    println!("Sent {} to {}", command, config.host.application_id);
    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    println!("tunhost Status\n");

    let socket_exists = config.host.socket_path.exists();
    println!(
        "Background process running: {}",
        if socket_exists { "Yes" } else { "No" }
    );
    println!("Socket: {}", config.host.socket_path.display());

    if socket_exists {
        let transport = SocketTransport::new(&config.host.socket_path);
        match transport.request(&Request::Status).await {
            Ok(Response::State { state, uptime_secs }) => {
                println!();
                println!("Service: {}", state);
                println!("Uptime: {}s", uptime_secs);
            }
            Ok(other) => println!("Unexpected response: {:?}", other),
            Err(e) => println!("Could not connect to background process: {}", e),
        }
    }

    Ok(())
}

fn resolve_uid(args: &Args, config: Config, uid: u32, json: bool) -> Result<()> {
    let context = HostContext::from_config(config, process_name(args));
    let cache = Arc::new(PackageCache::new(context.packages.clone()));
    cache.register_and_load();
    let bridge = UidBridge::new(cache);

    let identity = bridge.resolve_identity(uid)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&identity)?);
    } else {
        println!("uid:     {}", identity.uid);
        println!("package: {}", identity.package_name);
        println!("label:   {}", identity.label);
    }
    Ok(())
}

fn lookup_connection(args: &Args, config: Config, tuple: &ConnectionTuple) -> Result<()> {
    let context = HostContext::from_config(config, process_name(args));
    let cache = Arc::new(PackageCache::new(context.packages.clone()));
    let mut bridge = UidBridge::new(cache);
    match context.connection_lookup() {
        Some(lookup) => bridge = bridge.with_connection_lookup(lookup),
        None => {
            return Err(Error::unsupported(format!(
                "connection-ownership lookup needs platform {} or later (configured: {})",
                tunhost::attribution::CONNECTION_OWNER_MIN_VERSION,
                context.platform_version()
            )))
        }
    }

    let uid = bridge.resolve_uid_from_connection(tuple)?;
    println!("{} -> uid {}", tuple, uid);
    match bridge.resolve_identity(uid) {
        Ok(identity) => println!("package: {} ({})", identity.package_name, identity.label),
        Err(e) => println!("package: unknown ({})", e),
    }
    Ok(())
}

fn print_version() {
    println!("tunhost {}", VERSION);
    println!();
    println!("Build info:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS: {}", std::env::consts::OS);
    println!(
        "  Connection lookup: /proc/net (platform {}+)",
        tunhost::attribution::CONNECTION_OWNER_MIN_VERSION
    );
}

fn validate_config(args: &Args) -> Result<()> {
    println!("Validating configuration...\n");

    let config = match load_config(args) {
        Ok(c) => {
            println!("  ✓ Configuration loaded successfully");
            c
        }
        Err(e) => {
            println!("  ✗ Configuration error: {}", e);
            return Err(e);
        }
    };

    println!("\nConfiguration summary:");
    println!("  Host:");
    println!("    Application id: {}", config.host.application_id);
    println!(
        "    Background process: {}",
        config.host.background_process_name()
    );
    println!("    Platform version: {}", config.host.platform_version);
    println!("    Log level: {}", config.host.log_level);
    println!("    Files: {}", config.host.files_dir.display());
    println!("    Assets: {}", config.host.external_assets_dir().display());
    println!("    Cache: {}", config.host.cache_dir.display());
    println!("    Socket: {}", config.host.socket_path.display());
    println!("    Settings: {}", config.host.settings_path.display());

    println!("  Packages:");
    println!("    List: {}", config.packages.packages_list.display());
    println!("    Labels: {}", config.packages.labels.len());

    if args.verbose {
        println!("\nLabels:");
        for (package, label) in &config.packages.labels {
            println!("  {} = {}", package, label);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

fn show_config(args: &Args, format: &str) -> Result<()> {
    let config = load_config(args)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {
            // Default to TOML format
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| Error::config(e.to_string()))?
            );
        }
    }

    Ok(())
}

fn process_name(args: &Args) -> String {
    args.process_name
        .clone()
        .unwrap_or_else(current_process_name)
}

fn init_logging(args: &Args, config_log_level: &str) {
    // CLI flags take precedence, then config, then default to info
    let filter = if args.debug {
        "debug,rusqlite=warn"
    } else if args.verbose {
        "info,rusqlite=warn"
    } else {
        match config_log_level {
            "trace" => "trace,rusqlite=warn",
            "debug" => "debug,rusqlite=warn",
            "info" => "info,rusqlite=warn",
            "warn" => "warn",
            "error" => "error",
            _ => "info,rusqlite=warn",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => config::load_config(path),
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn setup_signal_handler() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to register signal handlers, falling back to ctrl-c");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
