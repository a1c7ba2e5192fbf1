// Expense Approvals - Web Server
// REST API with Axum over the approval workflow

use anyhow::{Context, Result};
use expense_approvals::api::{router, AppState};
use expense_approvals::{init_tracing, AppConfig, Database};

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    println!("🌐 Expense Approvals - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db = Database::open(&config.database_path, config.busy_timeout)?;
    println!("✓ Database opened: {:?}", config.database_path);

    let app = router(AppState::new(db));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "server listening");
    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API: http://{}/api/queue/pending", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}
