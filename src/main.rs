use anyhow::Context;
use native_bridge_shell::bridge::host::ChannelHost;
use native_bridge_shell::domain::settings::SettingsService;
use native_bridge_shell::infrastructure::logging::init_logger;
use native_bridge_shell::{NativePorts, NativeShell};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Stdio host: each stdin line is a message posted by the page, each stdout
/// line a script the page would evaluate.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;
    let settings = settings_service.get().clone();

    // Keep the guard alive for the whole program
    let _log_guard = init_logger(&settings.log_settings).context("Failed to initialize logging")?;

    info!("Starting Native Bridge Shell");
    info!("Settings file: {}", settings_service.path().display());

    let (host, mut scripts) = ChannelHost::new();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(script) = scripts.recv().await {
            stdout.write_all(script.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let shell = NativeShell::new(settings, NativePorts::simulated(), Arc::new(host));
    info!("Loading {}", shell.web_url());
    shell.start().await;
    shell.on_page_loaded().context("Failed to inject bridge client")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read page message")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => shell.handle_message(line.trim()),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    shell.shutdown().await;
    drop(shell);

    match tokio::time::timeout(Duration::from_secs(1), writer).await {
        Ok(joined) => joined.context("Script writer panicked")??,
        Err(_) => warn!("Dropping scripts still in flight at exit"),
    }

    info!("Application shutting down");
    Ok(())
}
