//! Application orchestrator: wires the device link and WebSocket server.

use std::sync::Arc;

use xcom_bridge_server::{BridgeHandler, BridgeServer, SessionController};
use xcom_serial::{DeviceLink, SerialTransport, Transport};

use crate::config::BridgeConfig;

/// Runs the bridge until ctrl-c or a fatal server error.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    // -- Device link --
    let transport = Arc::new(SerialTransport::new(config.serial_config()));
    let state = transport.connect().await;
    if state.connected {
        tracing::info!(
            port = state.port.as_deref().unwrap_or_default(),
            baud = config.baud,
            "device ready"
        );
    } else {
        tracing::warn!(
            reason = state.reason.as_deref().unwrap_or_default(),
            "device not connected, uploads are refused until it is reachable"
        );
    }
    let link = Arc::new(DeviceLink::new(transport));

    // -- WS server --
    let handler = BridgeHandler::new(link, SessionController::new(config.pacing()), config.baud);
    let server = BridgeServer::new(config.server_config(), handler);
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    // -- Main loop: wait for shutdown --
    tokio::select! {
        result = &mut server_task => {
            result??;
            return Ok(());
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    server_task.await??;
    Ok(())
}
