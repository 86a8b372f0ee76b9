/// Approval engine server entry point
///
/// Serves:
/// - Approval API at /api/approvals/*, /api/tasks/*, /api/users/*
/// - Definition management at /api/definitions/*
/// - Demo entity upserts at /api/entities/*
/// - Health check at /healthz

use approval_engine::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes from APPROVAL_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
