use anyhow::Result;
use colored::Colorize;
use khidmat::control::send_udp;
use khidmat::prelude::*;
use khidmat::simulation::DURATION_PRESETS;
use khidmat::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

/// Where simulation commands go.
enum Target {
    /// An engine running inside this process.
    Local(DisplayEngine),
    /// A display process listening for control datagrams.
    Remote {
        addr: SocketAddr,
        settings: PrayerSettings,
    },
}

impl Target {
    async fn send(&self, message: &ControlMessage) -> Result<()> {
        match self {
            Target::Local(engine) => engine.control().publish(message)?,
            Target::Remote { addr, .. } => send_udp(*addr, message).await?,
        }
        Ok(())
    }

    async fn sounds(&self) -> SoundConfig {
        match self {
            Target::Local(engine) => SoundConfig::from(&engine.settings().await),
            Target::Remote { settings, .. } => SoundConfig::from(settings),
        }
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    const LOGO_TEXT: &str = include_str!("../logo.log");
    println!("{}", LOGO_TEXT.cyan());

    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(79).dimmed());

    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";

    println!("{}", version_string);
    println!("{}", license_blurb.dimmed());
    println!("{}", "-".repeat(79).dimmed());
}

/// Spawns the listeners that echo engine output into the shell.
fn spawn_event_listeners(engine: &DisplayEngine, is_watching: Arc<AtomicBool>) {
    let mut phase_rx = engine.subscribe_phase_events();
    tokio::spawn(async move {
        while let Ok(event) = phase_rx.recv().await {
            match event {
                PhaseEvent::SimulationStarted { run, prayer } => {
                    println!("\n<-- [SIM] Run #{} started for {}\n>> ", run.0, prayer)
                }
                PhaseEvent::SimulationStopped { run } => {
                    println!("\n<-- [SIM] Run #{} stopped\n>> ", run.0)
                }
                PhaseEvent::SimulationCompleted { run } => {
                    println!("\n<-- [SIM] Run #{} completed\n>> ", run.0)
                }
                PhaseEvent::AlarmFired { key, outcome, .. } => {
                    println!("\n<-- [ALARM] {} ({:?})\n>> ", key, outcome)
                }
                _ => {}
            }
        }
    });

    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            if !matches!(event, SystemEvent::EngineStarted { .. }) {
                println!("\n<-- [SYSTEM EVENT] {:?}\n>> ", event);
            }
        }
    });

    // Render listener, controlled by the shared flag.
    let mut render_rx = engine.subscribe_render();
    tokio::spawn(async move {
        while let Ok(frame) = render_rx.recv().await {
            if is_watching.load(Ordering::Relaxed) {
                println!("<-- [FRAME] {}", format_frame(&frame));
            }
        }
    });
}

fn format_frame(frame: &RenderFrame) -> String {
    let sim = if frame.state.is_simulated { " [SIM]" } else { "" };
    if frame.state.is_idle() {
        format!("{}{}", frame.projection.label, sim)
    } else {
        format!(
            "{}{} {} ({:.0}%)",
            frame.projection.label,
            sim,
            frame.projection.clock,
            frame.projection.progress * 100.0
        )
    }
}

/// Parses `sim start <PRAYER> <IQAMAH> <SALAT>` arguments.
fn parse_sim_start(args: &[&str]) -> std::result::Result<(PrayerName, u32, u32), String> {
    let [prayer, iqamah, salat] = args else {
        return Err("Usage: sim start <PRAYER> <IQAMAH_SECS> <SALAT_SECS>".to_string());
    };
    let prayer = PrayerName::parse(prayer).ok_or_else(|| {
        format!("'{}' is not a prayer. Try Subuh, Dzuhur, Ashar, Maghrib or Isya.", prayer)
    })?;
    let preset = |raw: &str| -> std::result::Result<u32, String> {
        raw.parse::<u32>()
            .ok()
            .filter(|secs| DURATION_PRESETS.contains(secs))
            .ok_or_else(|| {
                format!(
                    "'{}' is not a preset; choose one of {:?}.",
                    raw, DURATION_PRESETS
                )
            })
    };
    Ok((prayer, preset(*iqamah)?, preset(*salat)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let config_path = env::var("KHIDMAT_CONFIG").ok().map(PathBuf::from);
    let config = KhidmatConfig::load(config_path.as_deref())?;

    let is_watching = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let target = match env::var("KHIDMAT_REMOTE") {
        Ok(remote) => {
            let addr: SocketAddr = remote.parse()?;
            println!("Sending simulation commands to {}.", addr.to_string().cyan());
            Target::Remote {
                addr,
                settings: config.settings.clone(),
            }
        }
        Err(_) => {
            let provider = FixedTimesProvider::new(config.schedule.times());
            let engine = DisplayEngine::new(
                config,
                Arc::new(SystemWallClock),
                Arc::new(provider),
                Arc::new(LogPlayer),
            );
            spawn_event_listeners(&engine, is_watching.clone());

            info!("Spawning {} in the background...", ENGINE_NAME.cyan());
            let runner = engine.clone();
            tokio::spawn(async move {
                let shutdown = async {
                    stop_rx.await.ok();
                    Ok::<(), anyhow::Error>(())
                };
                if let Err(e) = runner.run_until(shutdown).await {
                    eprintln!("\nEngine stopped with an error: {}", e);
                }
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            Target::Local(engine)
        }
    };

    let mut rl = Editor::new()?;
    let helper = MyHighlighter {};
    rl.set_helper(Some(helper));

    println!("{} shell ready. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "sim" => match args.get(1) {
                            Some(&"start") => match parse_sim_start(&args[2..]) {
                                Ok((prayer, iqamah, salat)) => {
                                    let request = SimulationRequest {
                                        prayer,
                                        iqamah_duration_secs: iqamah,
                                        salat_duration_secs: salat,
                                        sounds: target.sounds().await,
                                    };
                                    match target.send(&ControlMessage::start(&request)).await {
                                        Ok(()) => println!(
                                            "--> Simulating {} ({}s iqamah, {}s salat).",
                                            prayer, iqamah, salat
                                        ),
                                        Err(e) => println!("Error: {}", e),
                                    }
                                }
                                Err(usage) => println!("{}", usage),
                            },
                            Some(&"stop") => match target.send(&ControlMessage::StopSim).await {
                                Ok(()) => println!("--> Stop requested."),
                                Err(e) => println!("Error: {}", e),
                            },
                            _ => println!("Unknown 'sim' command. Try 'sim start' or 'sim stop'."),
                        },
                        "status" => match &target {
                            Target::Local(engine) => {
                                let frame = engine.snapshot().await;
                                println!("Now showing: {}", format_frame(&frame));
                                if let Some(next) = engine.next_prayer().await {
                                    let tz = engine.config().mosque.timezone;
                                    println!(
                                        "Next prayer: {} at {}",
                                        next.name,
                                        next.timestamp.with_timezone(&tz).format("%H:%M")
                                    );
                                }
                            }
                            Target::Remote { .. } => {
                                println!("Status is only available for a local engine.")
                            }
                        },
                        "schedule" => match &target {
                            Target::Local(engine) => match engine.schedule().await {
                                Some(schedule) => {
                                    let tz = engine.config().mosque.timezone;
                                    println!("Schedule for {}:", schedule.date);
                                    for slot in schedule.slots {
                                        println!(
                                            "  {:<8} {}",
                                            slot.name,
                                            slot.timestamp.with_timezone(&tz).format("%H:%M:%S")
                                        );
                                    }
                                }
                                None => println!("No schedule yet. Are coordinates configured?"),
                            },
                            Target::Remote { .. } => {
                                println!("The schedule is only available for a local engine.")
                            }
                        },
                        "watch" => match args.get(1) {
                            Some(&"on") => {
                                is_watching.store(true, Ordering::Relaxed);
                                println!("--> Started printing render frames.");
                            }
                            Some(&"off") => {
                                is_watching.store(false, Ordering::Relaxed);
                                println!("--> Stopped printing render frames.");
                            }
                            _ => println!("Usage: watch on|off"),
                        },
                        "help" => {
                            println!("Available commands:");
                            println!("  sim start <P> <I> <S>  - Simulates prayer P with I/S second iqamah/salat ({:?}).", DURATION_PRESETS);
                            println!("  sim stop               - Stops the running simulation.");
                            println!("  status                 - Shows the current frame and next prayer.");
                            println!("  schedule               - Lists today's prayer times.");
                            println!("  watch on|off           - Toggles printing of every render frame.");
                            println!("  exit                   - Quits the shell.");
                        }
                        "exit" => break,
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => {
                println!("Exiting khidmat-shell...");
                break;
            }
        }
    }

    stop_tx.send(()).ok();
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
