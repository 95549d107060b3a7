pub mod serial;
pub mod device;
pub mod server;
pub mod config;
pub mod cli;

use anyhow::Context;
use futures_util::future::{BoxFuture, FutureExt};

use config::BridgeSettings;
use device::{event_channel, DeviceManager};
use serial::{SerialBackend, SystemSerial};
use server::{ConnectionServer, ProtocolTranslator};

/// Run the bridge until ctrl-c, a server failure, or (with `select_port`)
/// the chosen device going away.
pub async fn run(settings: BridgeSettings, select_port: bool) -> anyhow::Result<()> {
    settings.validate()?;
    let (events, status_rx) = event_channel(settings.event_capacity);
    tokio::spawn(cli::print_status_events(status_rx));

    let backend = SystemSerial::new(settings.baud_rate);
    let mut manager = DeviceManager::new(
        backend.clone(),
        settings.scan_interval(),
        settings.probe_timeout(),
        events.clone(),
    );

    if select_port {
        let candidates = backend.list_candidates().context("Failed to list serial ports")?;
        let chosen = tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            cli::prompt_for_port(&candidates, &mut stdin.lock(), &mut stdout)
        })
        .await?
        .context("No TCode device chosen")?;

        manager
            .adopt_fixed(chosen.clone())
            .await
            .with_context(|| format!("Error opening port {}", chosen.port_name))?;
        log::info!("Using {} port as TCode device.", chosen.port_name);
    }

    let translator = ProtocolTranslator::new(settings.server_name.clone(), manager.binding(), events.clone());
    let server = ConnectionServer::bind(
        settings.listen_addr(),
        translator,
        settings.heartbeat_interval(),
        events,
    )
    .await?;

    let discovery: BoxFuture<'static, anyhow::Result<()>> = if select_port {
        async move {
            manager.wait_for_close().await;
            Err::<(), _>(anyhow::anyhow!("TCode device disconnected"))
        }
        .boxed()
    } else {
        async move {
            manager.run().await;
            Ok(())
        }
        .boxed()
    };

    tokio::select! {
        result = server.run() => result.context("WebSocket server stopped"),
        result = discovery => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            Ok(())
        }
    }
}
