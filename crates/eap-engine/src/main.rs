use clap::Parser;
use eap_engine::engine::build_method_table;
use eap_engine::{
    EapEngine, EngineConfig, MemoryStateManager, MethodConfiguration, RadiusAdapter, RadiusServer,
};
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// EAP Engine - EAP-TLS, PEAP, MSCHAPv2 and GTC over RADIUS
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "eap-engine")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "eap-engine.json")]
    config_path: String,

    /// Validate configuration and certificates, then exit
    #[arg(long)]
    validate: bool,

    /// Write an example configuration to CONFIG and exit
    #[arg(long)]
    write_example: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.write_example {
        if let Err(e) = EngineConfig::example().to_file(&cli.config_path) {
            eprintln!("Error writing example config: {}", e);
            process::exit(1);
        }
        println!("Example configuration written to {}", cli.config_path);
        process::exit(0);
    }

    let config = match EngineConfig::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Could not load {}: {}", cli.config_path, e);
            eprintln!("Run with --write-example to create one");
            process::exit(1);
        }
    };

    let table = match build_method_table(&config) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully");
        println!();
        println!("Configuration summary:");
        println!("  Listen: {}", config.listen_address);
        println!("  Methods: {:?}", config.method_priority);
        println!("  PEAP inner methods: {:?}", config.peap_inner_priority);
        println!("  Fragment size: {}", config.fragment_size);
        println!("  Users: {}", config.users.len());
        println!("  Log level: {}", config.log_level);
        if let Some(ref tls) = config.tls {
            println!("  Certificate: {}", tls.cert_path);
        }
        process::exit(0);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("EAP Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);
    info!(methods = ?config.method_priority, "Offering EAP methods");

    let store = Arc::new(
        MemoryStateManager::new(MethodConfiguration::new(config.method_priority.clone()))
            .with_ttl(config.session_ttl()),
    );
    let engine = Arc::new(EapEngine::new(store.clone(), table));

    let cleanup_store = Arc::clone(&store);
    let cleanup_engine = Arc::clone(&engine);
    let mut interval = tokio::time::interval(config.session_ttl());
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            let removed = cleanup_store.cleanup_expired().await;
            cleanup_engine.prune_locks();
            if removed > 0 {
                info!(removed, "Expired EAP sessions removed");
            }
        }
    });

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address: {}", e);
            process::exit(1);
        }
    };

    let adapter = Arc::new(RadiusAdapter::new(engine));
    let server = match RadiusServer::new(addr, adapter, config.secret.clone()).await {
        Ok(srv) => srv,
        Err(e) => {
            error!("Failed to create server: {}", e);
            process::exit(1);
        }
    };

    info!("Server started successfully");

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
