//! Relay server command

use agent_relay::{error::Result, ApiServer, ProcessAgent, RelayConfig, RelayError, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Handle server startup command
pub async fn handle(
    mut config: RelayConfig,
    addr: Option<String>,
    agent_command: Option<String>,
) -> Result<()> {
    debug!("Starting relay server...");

    if let Some(addr) = addr {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", addr, e))?;
        config.server.addr = socket_addr;
    }
    if let Some(command) = agent_command {
        config.agent.command = command;
    }

    println!();
    println!("Agent Relay");
    println!("   One agent session, many observers");
    println!();
    println!("   Address: http://{}", config.server.addr);
    println!(
        "   Agent: {} {}",
        config.agent.command,
        config.agent.args.join(" ")
    );
    println!("   History: {} messages", config.ledger.max_history);
    println!();
    println!("   Endpoints:");
    println!("   - GET  /events - Server-Sent Events stream");
    println!("   - GET  /messages - Paginated history");
    println!("   - POST /messages - Send a message to the agent");
    println!("   - POST /action - Answer the pending question");
    println!("   - POST /plan - Approve or reject the pending plan");
    println!("   - POST /stop - Interrupt the agent");
    println!("   - GET  /status - Run state");
    println!("   - GET  /tools/active - Tool calls in flight");
    println!("   - GET  /health - Health check");
    println!();

    let agent = Arc::new(ProcessAgent::new(config.agent.clone()));
    let session = Session::from_config(&config, agent);
    let server = ApiServer::new(
        config.server.clone(),
        session,
        config.broadcaster.channel_capacity,
    );
    server.serve().await.map_err(RelayError::from)?;

    Ok(())
}
