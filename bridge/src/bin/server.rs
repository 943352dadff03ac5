use courier_bridge::{HttpBridgeConfig, HttpMessenger};
use courier_core::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    telemetry::init();

    let config = HttpBridgeConfig::from_env();
    let bridge = HttpMessenger::bind(config).await?;

    let channel = std::env::var("COURIER_ECHO_CHANNEL").unwrap_or_else(|_| "echo".into());
    let echo = bridge.messenger().req_resp_channel::<String, String>(&channel)?;
    echo.response_handler(|request| {
        tracing::debug!(target: "http_bridge", len = request.len(), "Echoing request");
        Some(request)
    })?;

    tracing::info!(
        addr = %bridge.local_addr(),
        channel = %channel,
        "Echo responder running; Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    echo.close();
    bridge.close();
    bridge.join().await;
    Ok(())
}
