//! Parley chat server
//!
//! Usage:
//!   cargo run -- server                    # Run on the default port
//!   cargo run -- server --port 4433        # Run on a specific port

use std::env;
use std::sync::Arc;

use parley::store::{MemoryStore, Room, StoreGateway};
use parley::{ChatServer, ServerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Parley - QUIC Chat Room Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 1000)");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    1000
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let port = parse_port(args);
    let max_connections = parse_max_connections(args);

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        ..Default::default()
    };

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - History window: {}s", config.history_max_age_secs);
    info!("  - History limit: {} messages", config.history_limit);

    let store = Arc::new(MemoryStore::with_rooms([
        Room::new("room-private", "Private"),
        Room::new("room-general", "General"),
        Room::new("room-major", "Major"),
    ])) as Arc<dyn StoreGateway>;

    let mut server = ChatServer::new(store, config);

    if let Err(e) = server.start().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
