use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use obex_push::domain::models::{MessageSeverity, StatusMessage};
use obex_push::domain::settings::{Settings, SettingsService};
use obex_push::infrastructure::bluetooth::{
    DiscoveryAgent, DiscoveryCoordinator, DiscoveryOptions, Scenario, SimulatedRadio,
};
use obex_push::infrastructure::logging::init_logger;
use obex_push::infrastructure::obex::{ObexClient, PushObject, TcpObexTransport};
use obex_push::presentation::console::{render_event, Console};

fn status(severity: MessageSeverity, message: impl Into<String>) -> StatusMessage {
    StatusMessage {
        message: message.into(),
        severity,
    }
}

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging_guard = init_logger(&settings.log_settings)?;
    info!(
        "Starting object push (settings: {})",
        settings_service.path().display()
    );

    let scenario = match &settings.simulation.scenario_path {
        Some(path) => Scenario::load(Path::new(path))?,
        None => Scenario::demo(),
    };
    let radio = SimulatedRadio::new(
        scenario,
        Duration::from_millis(settings.simulation.event_delay_ms),
    )?;
    let options = DiscoveryOptions::try_from(&settings.discovery)
        .context("Invalid discovery settings")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let printer = thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            // stderr, like the log lines, so progress never splits a prompt.
            while let Some(event) = event_rx.blocking_recv() {
                eprintln!("{}", render_event(&event));
            }
        })?;

    let coordinator = DiscoveryCoordinator::with_events(radio, options, event_tx);
    let mut console = Console::new(io::stdin().lock(), io::stdout());
    let result = run(&coordinator, &mut console, &settings);

    // Dropping the coordinator closes the channel and ends the printer.
    drop(coordinator);
    if printer.join().is_err() {
        warn!("Progress printer panicked");
    }
    result
}

fn run<A, R, W>(
    coordinator: &DiscoveryCoordinator<A>,
    console: &mut Console<R, W>,
    settings: &Settings,
) -> anyhow::Result<()>
where
    A: DiscoveryAgent,
    R: BufRead,
    W: Write,
{
    let attempts = settings.discovery.max_inquiry_attempts.max(1);
    let mut devices = Vec::new();
    for attempt in 1..=attempts {
        console.line(format!(
            "Searching for devices (attempt {}/{})...",
            attempt, attempts
        ))?;
        let outcome = coordinator.discover_devices()?;
        if !outcome.started() {
            warn!("Inquiry could not be started");
        }
        devices = coordinator.devices();
        if !devices.is_empty() {
            break;
        }
    }
    if devices.is_empty() {
        console.status(&status(MessageSeverity::Warning, "No devices found"))?;
        return Ok(());
    }

    let labels: Vec<String> = devices
        .iter()
        .map(|d| format!("{} [{}]", coordinator.display_name(d), d.address()))
        .collect();
    let Some(index) = console.choose("Devices:", &labels)? else {
        return Ok(());
    };
    let device = &devices[index];

    console.line(format!("Searching for services on {}...", labels[index]))?;
    coordinator.discover_endpoints(device)?;
    let endpoints = coordinator.endpoints(device);
    if endpoints.is_empty() {
        console.status(&status(
            MessageSeverity::Warning,
            format!("No services found on {}", labels[index]),
        ))?;
        return Ok(());
    }

    let urls: Vec<&str> = endpoints.iter().map(|e| e.url.as_str()).collect();
    let Some(index) = console.choose("Services:", &urls)? else {
        return Ok(());
    };
    let url = urls[index];

    let object = PushObject::text(
        settings.push.object_name.as_str(),
        settings.push.media_type.as_str(),
        &settings.push.payload_text,
    );
    let client = ObexClient::new(TcpObexTransport::new(Duration::from_millis(
        settings.push.connect_timeout_ms,
    )));

    let mut session = match client.connect(url) {
        Ok(session) => session,
        Err(e) => {
            error!("Connect failed: {}", e);
            console.status(&status(
                MessageSeverity::Error,
                format!("Could not connect to {}: {}", url, e),
            ))?;
            return Ok(());
        }
    };

    match session.push_object(&object) {
        Ok(code) => {
            if let Err(e) = session.disconnect() {
                warn!("Disconnect failed: {}", e);
            }
            console.status(&status(
                MessageSeverity::Success,
                format!("Sent {} to {} ({})", object.name, url, code),
            ))?;
        }
        Err(e) => {
            error!("Push failed: {}", e);
            console.status(&status(
                MessageSeverity::Error,
                format!("Could not send {} to {}: {}", object.name, url, e),
            ))?;
        }
    }
    Ok(())
}
