//! # Courier Server
//!
//! Real-time 1:1 messaging server with durable conversations, read-state
//! tracking, notification fan-out, and live delivery over WebSockets.

use anyhow::Result;
use clap::Parser;
use courier_server::handlers;
use courier_server::state::{AppState, SharedState};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server bind address
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// SQLite database file path
    #[arg(short = 'd', long, default_value = "courier.db")]
    database: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting Courier server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    info!("Initializing database: {}", args.database);
    let state: SharedState = Arc::new(AppState::new(&args.database).await?);

    let app = handlers::router(state);

    println!("📨 Courier server starting...");
    println!("📡 Listening on {}:{}", args.host, args.port);
    println!();
    println!("Endpoints:");
    println!("  GET    /health                 - Health check");
    println!("  POST   /register               - Register a user, returns a token");
    println!("  POST   /auth                   - Resolve a token to its user");
    println!("  GET    /messages               - List conversations (?keyword=&page=&limit=)");
    println!("  GET    /messages/:id           - Conversation history, marks incoming read");
    println!("  GET    /notifications          - List notifications (?page=&limit=)");
    println!("  POST   /notifications/read     - Mark all notifications read");
    println!("  POST   /notifications/:id/read - Mark one notification read");
    println!("  DELETE /notifications/:id      - Delete one notification");
    println!("  WS     /ws                     - Live messaging (?token=)");
    println!();

    let listener = tokio::net::TcpListener::bind(&format!("{}:{}", args.host, args.port)).await?;
    info!("Server successfully bound to {}:{}", args.host, args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
