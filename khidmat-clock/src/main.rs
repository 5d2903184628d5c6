use anyhow::{Context, Result};
use colored::Colorize;
use khidmat::prelude::*;
use khidmat::ENGINE_NAME;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load configuration: first argument, then KHIDMAT_CONFIG, then env only.
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("KHIDMAT_CONFIG").ok())
        .map(PathBuf::from);
    let config = KhidmatConfig::load(path.as_deref()).context("failed to load configuration")?;

    // 3. Pick the collaborators.
    let provider = FixedTimesProvider::new(config.schedule.times());
    let command = config.audio.command.as_deref().and_then(CommandPlayer::parse);
    let player: Arc<dyn SoundPlayer> = match command {
        Some(player) => Arc::new(player),
        None => Arc::new(LogPlayer),
    };
    let settings_file = config.engine.settings_file.clone();

    // 4. Create the DisplayEngine instance.
    let mut engine = DisplayEngine::new(
        config,
        Arc::new(SystemWallClock),
        Arc::new(provider),
        player,
    );
    if let Some(file) = settings_file {
        info!(path = %file.display(), "Watching settings file");
        engine = engine.with_settings_source(Arc::new(FileSettingsSource::new(file)));
    }

    // 5. Print what the screen would show.
    spawn_event_listeners(&engine);

    // 6. Run the engine.
    info!("Starting {}...", ENGINE_NAME);
    engine.run().await?;

    Ok(())
}

/// Spawns one task per event stream.
fn spawn_event_listeners(engine: &DisplayEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut phase_rx = engine.subscribe_phase_events();
    tokio::spawn(async move {
        while let Ok(event) = phase_rx.recv().await {
            info!("[PHASE] => {:?}", event);
        }
    });

    let mut render_rx = engine.subscribe_render();
    tokio::spawn(async move {
        let mut last_shown: Option<RenderFrame> = None;
        while let Ok(frame) = render_rx.recv().await {
            if last_shown.as_ref() == Some(&frame) {
                continue;
            }
            println!("{}", describe(&frame));
            last_shown = Some(frame);
        }
    });
}

fn describe(frame: &RenderFrame) -> String {
    let projection = &frame.projection;
    let label = match frame.state.kind {
        DisplayKind::Idle => projection.label.dimmed(),
        DisplayKind::Preview => projection.label.blue(),
        DisplayKind::Adhan | DisplayKind::PreSalatAlarm => projection.label.yellow().bold(),
        DisplayKind::IqamahCountdown => projection.label.cyan(),
        DisplayKind::Salat => projection.label.green(),
    };
    let marker = if frame.state.is_simulated {
        " [SIM]".magenta().to_string()
    } else {
        String::new()
    };
    if frame.state.is_idle() {
        format!("{label}{marker}")
    } else {
        format!(
            "{label}{marker} {} ({:.0}%)",
            projection.clock,
            projection.progress * 100.0
        )
    }
}
