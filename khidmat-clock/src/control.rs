//! Simulation control channel.
//!
//! Frames are JSON objects tagged by `type`, carried as raw strings on a
//! broadcast bus so frames from any source (the shell, a UDP peer, tests) go
//! through the same decoder. Delivery is at-most-once; a frame that fails to
//! decode is dropped with a warning.

use crate::common::PrayerName;
use crate::display::RenderFrame;
use crate::error::{KhidmatError, Result};
use crate::simulation::{SimulationRequest, SoundConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const MAX_FRAME_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "START_SIM", rename_all = "camelCase")]
    StartSim {
        prayer: PrayerName,
        iqamah_duration_sec: u32,
        salat_duration_sec: u32,
        adhan_sound_path: String,
        iqamah_sound_path: String,
        adhan_alarm_enabled: bool,
        iqamah_alarm_enabled: bool,
    },
    #[serde(rename = "STOP_SIM")]
    StopSim,
}

impl ControlMessage {
    pub fn start(request: &SimulationRequest) -> Self {
        ControlMessage::StartSim {
            prayer: request.prayer,
            iqamah_duration_sec: request.iqamah_duration_secs,
            salat_duration_sec: request.salat_duration_secs,
            adhan_sound_path: request.sounds.adhan_sound_path.clone(),
            iqamah_sound_path: request.sounds.iqamah_sound_path.clone(),
            adhan_alarm_enabled: request.sounds.adhan_alarm_enabled,
            iqamah_alarm_enabled: request.sounds.iqamah_alarm_enabled,
        }
    }

    /// Parses a frame. Durations must be positive.
    pub fn decode(frame: &str) -> Result<Self> {
        let message: ControlMessage = serde_json::from_str(frame)
            .map_err(|e| KhidmatError::MalformedControlMessage(e.to_string()))?;
        if let ControlMessage::StartSim {
            iqamah_duration_sec,
            salat_duration_sec,
            ..
        } = &message
        {
            if *iqamah_duration_sec == 0 || *salat_duration_sec == 0 {
                return Err(KhidmatError::MalformedControlMessage(
                    "simulation durations must be positive".to_string(),
                ));
            }
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| KhidmatError::MalformedControlMessage(e.to_string()))
    }

    /// The simulation request carried by a `START_SIM` frame.
    pub fn into_request(self) -> Option<SimulationRequest> {
        match self {
            ControlMessage::StartSim {
                prayer,
                iqamah_duration_sec,
                salat_duration_sec,
                adhan_sound_path,
                iqamah_sound_path,
                adhan_alarm_enabled,
                iqamah_alarm_enabled,
            } => Some(SimulationRequest {
                prayer,
                iqamah_duration_secs: iqamah_duration_sec,
                salat_duration_secs: salat_duration_sec,
                sounds: SoundConfig {
                    adhan_sound_path,
                    iqamah_sound_path,
                    adhan_alarm_enabled,
                    iqamah_alarm_enabled,
                },
            }),
            ControlMessage::StopSim => None,
        }
    }
}

/// A named broadcast channel of raw control frames.
#[derive(Debug, Clone)]
pub struct ControlBus {
    channel: Arc<str>,
    sender: broadcast::Sender<String>,
}

impl ControlBus {
    pub fn new(channel: &str) -> Self {
        let (sender, _) = broadcast::channel(32);
        Self {
            channel: Arc::from(channel),
            sender,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn publish(&self, message: &ControlMessage) -> Result<()> {
        self.publish_raw(message.encode()?);
        Ok(())
    }

    /// Publishes an undecoded frame. Returns `false` if nobody is listening.
    pub fn publish_raw(&self, frame: String) -> bool {
        debug!(channel = %self.channel, %frame, "Control frame published");
        self.sender.send(frame).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

/// Receives control frames over UDP and republishes them on a bus.
pub struct UdpControlListener {
    socket: UdpSocket,
}

impl UdpControlListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, bus: ControlBus, mut shutdown_rx: broadcast::Receiver<()>) {
        let local = self.socket.local_addr().ok();
        info!(?local, channel = bus.channel(), "UDP control listener started.");
        let mut buf = vec![0u8; MAX_FRAME_BYTES];
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let frame = String::from_utf8_lossy(&buf[..len]).into_owned();
                        debug!(%peer, len, "Control datagram received");
                        bus.publish_raw(frame);
                    }
                    Err(e) => warn!(error = %e, "UDP control receive failed"),
                },
            }
        }
        info!("UDP control listener stopped.");
    }
}

/// Sends one control frame to a remote display.
pub async fn send_udp(target: SocketAddr, message: &ControlMessage) -> Result<()> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(message.encode()?.as_bytes(), target).await?;
    Ok(())
}

/// Mirrors every render frame to `peer` as JSON, until shutdown.
pub async fn mirror_frames(
    peer: SocketAddr,
    mut frames: broadcast::Receiver<RenderFrame>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    info!(%peer, "Mirroring display state.");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let payload = serde_json::to_vec(&frame)
                        .map_err(|e| KhidmatError::MalformedControlMessage(e.to_string()))?;
                    if let Err(e) = socket.send_to(&payload, peer).await {
                        warn!(error = %e, "State mirror send failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "State mirror lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
