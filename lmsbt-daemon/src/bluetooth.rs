/*!
 * Bluetooth Event Listener
 * Normalizes BlueZ MediaPlayer1 signals into playback events
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dbus::arg::{PropMap, RefArg};
use dbus::message::MatchRule;
use dbus::nonblock::{MsgMatch, Proxy, SyncConnection};
use dbus::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BluetoothConfig;

const BLUEZ_SERVICE: &str = "org.bluez";
const MEDIA_PLAYER_IFACE: &str = "org.bluez.MediaPlayer1";
const OBJECT_MANAGER_IFACE: &str = "org.freedesktop.DBus.ObjectManager";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// One normalized notification from the Bluetooth stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    DeviceConnected,
    DeviceDisconnected,
    StreamStarted,
    StreamStopped,
}

/// Watches the system bus for BlueZ media player objects and their
/// playback status, yielding one event per qualifying signal. Everything
/// else on the bus is dropped.
pub struct BluetoothListener {
    conn: Arc<SyncConnection>,
    pump: EventPump,
    _matches: Vec<MsgMatch>,
}

/// Receiving half of the listener: classified events plus the handle of
/// the bus I/O task, which only completes when the connection is lost.
struct EventPump {
    events: mpsc::UnboundedReceiver<PlaybackEvent>,
    io_task: JoinHandle<String>,
    io_failure: Option<String>,
}

impl EventPump {
    async fn next(&mut self) -> Result<PlaybackEvent> {
        loop {
            // Once the connection is gone no more sends can happen, so
            // whatever is buffered is drained before the loss surfaces.
            if let Some(err) = self.io_failure.as_deref() {
                return match self.events.try_recv() {
                    Ok(event) => Ok(event),
                    Err(_) => Err(anyhow!("lost connection to the system D-Bus: {}", err)),
                };
            }
            tokio::select! {
                maybe = self.events.recv() => {
                    return maybe.ok_or_else(|| anyhow!("bluetooth event channel closed"));
                }
                res = &mut self.io_task => {
                    self.io_failure = Some(match res {
                        Ok(err) => err,
                        Err(e) => format!("D-Bus I/O task failed: {}", e),
                    });
                }
            }
        }
    }
}

impl BluetoothListener {
    pub async fn connect(config: &BluetoothConfig) -> Result<Self> {
        let (resource, conn) = dbus_tokio::connection::new_system_sync()
            .map_err(|e| anyhow!("failed to connect to the system D-Bus: {}", e))?;

        // The resource drives all bus I/O and only resolves when the
        // connection is lost.
        let io_task = tokio::spawn(async move {
            let err = resource.await;
            err.to_string()
        });

        let (tx, events) = mpsc::unbounded_channel();

        let rule = MatchRule::new_signal(OBJECT_MANAGER_IFACE, "InterfacesAdded")
            .with_sender(BLUEZ_SERVICE);
        let tx_added = tx.clone();
        let added = conn.add_match(rule).await.map_err(subscribe_err)?.msg_cb(move |msg| {
            if let Some(event) = classify_interfaces_added(&msg) {
                let _ = tx_added.send(event);
            }
            true
        });

        let rule = MatchRule::new_signal(OBJECT_MANAGER_IFACE, "InterfacesRemoved")
            .with_sender(BLUEZ_SERVICE);
        let tx_removed = tx.clone();
        let removed = conn.add_match(rule).await.map_err(subscribe_err)?.msg_cb(move |msg| {
            if let Some(event) = classify_interfaces_removed(&msg) {
                let _ = tx_removed.send(event);
            }
            true
        });

        let rule = MatchRule::new_signal(PROPERTIES_IFACE, "PropertiesChanged")
            .with_sender(BLUEZ_SERVICE);
        let metadata_path = config.metadata_path.clone();
        let properties = conn.add_match(rule).await.map_err(subscribe_err)?.msg_cb(move |msg| {
            if let Some(event) = classify_properties_changed(&msg) {
                let _ = tx.send(event);
            }
            if !metadata_path.is_empty() {
                if let Some(info) = extract_track(&msg) {
                    debug!("track changed: {:?}", info);
                    let _ = dump_track(&metadata_path, info);
                }
            }
            true
        });

        Ok(Self {
            conn,
            pump: EventPump {
                events,
                io_task,
                io_failure: None,
            },
            _matches: vec![added, removed, properties],
        })
    }

    /// One-shot probe for a media player that was already connected when
    /// the daemon started.
    pub async fn scan(&self) -> Result<Option<PlaybackEvent>> {
        let proxy = Proxy::new(
            BLUEZ_SERVICE,
            "/",
            Duration::from_secs(5),
            self.conn.clone(),
        );
        let (objects,): (HashMap<dbus::Path<'static>, HashMap<String, PropMap>>,) = proxy
            .method_call(OBJECT_MANAGER_IFACE, "GetManagedObjects", ())
            .await
            .map_err(|e| anyhow!("GetManagedObjects call to BlueZ failed: {}", e))?;

        for (path, interfaces) in &objects {
            if let Some(props) = interfaces.get(MEDIA_PLAYER_IFACE) {
                debug!("found media player on {}", path);
                let event = match props.get("Status").and_then(|v| v.0.as_str()) {
                    Some("playing") => PlaybackEvent::StreamStarted,
                    _ => PlaybackEvent::DeviceConnected,
                };
                return Ok(Some(event));
            }
        }
        debug!("no media player connected at startup");
        Ok(None)
    }

    /// Next event from the bus. Events classified before a connection
    /// loss are still delivered; after that the error is permanent and
    /// the caller is expected to exit.
    pub async fn next_event(&mut self) -> Result<PlaybackEvent> {
        self.pump.next().await
    }
}

fn subscribe_err(e: dbus::Error) -> anyhow::Error {
    anyhow!("failed to subscribe to BlueZ signals: {}", e)
}

fn classify_interfaces_added(msg: &Message) -> Option<PlaybackEvent> {
    let (path, interfaces): (dbus::Path, HashMap<String, PropMap>) = msg.read2().ok()?;
    if !interfaces.contains_key(MEDIA_PLAYER_IFACE) {
        return None;
    }
    debug!("media player appeared on {}", path);
    Some(PlaybackEvent::DeviceConnected)
}

fn classify_interfaces_removed(msg: &Message) -> Option<PlaybackEvent> {
    let (path, interfaces): (dbus::Path, Vec<String>) = msg.read2().ok()?;
    if !interfaces.iter().any(|name| name == MEDIA_PLAYER_IFACE) {
        return None;
    }
    debug!("media player vanished from {}", path);
    Some(PlaybackEvent::DeviceDisconnected)
}

fn classify_properties_changed(msg: &Message) -> Option<PlaybackEvent> {
    let (interface, changed): (String, PropMap) = msg.read2().ok()?;
    if interface != MEDIA_PLAYER_IFACE {
        return None;
    }
    let status = changed.get("Status")?.0.as_str()?;
    status_event(status)
}

fn status_event(status: &str) -> Option<PlaybackEvent> {
    match status {
        "playing" => Some(PlaybackEvent::StreamStarted),
        "paused" | "stopped" => Some(PlaybackEvent::StreamStopped),
        other => {
            debug!("ignoring media player status {:?}", other);
            None
        }
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct TrackInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Milliseconds, as reported by BlueZ.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

fn extract_track(msg: &Message) -> Option<TrackInfo> {
    let (interface, changed): (String, PropMap) = msg.read2().ok()?;
    if interface != MEDIA_PLAYER_IFACE {
        return None;
    }
    let track = changed.get("Track")?;
    Some(track_info(&*track.0))
}

fn track_info(track: &dyn RefArg) -> TrackInfo {
    let mut info = TrackInfo::default();
    let Some(mut entries) = track.as_iter() else {
        return info;
    };
    // Dict RefArgs iterate as alternating keys and values.
    while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
        match key.as_str() {
            Some("Title") => info.title = value.as_str().map(str::to_string),
            Some("Artist") => info.artist = value.as_str().map(str::to_string),
            Some("Album") => info.album = value.as_str().map(str::to_string),
            Some("Duration") => info.duration = value.as_u64(),
            _ => {}
        }
    }
    info
}

/// The callback runs on the bus dispatch task, so the file write is
/// handed off rather than done inline.
fn dump_track(path: &str, info: TrackInfo) -> JoinHandle<()> {
    let path = path.to_string();
    tokio::task::spawn_blocking(move || write_track_info(&path, &info))
}

fn write_track_info(path: &str, info: &TrackInfo) {
    match serde_json::to_string_pretty(info) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("failed to write track metadata to {}: {}", path, e);
            }
        }
        Err(e) => warn!("failed to encode track metadata: {}", e),
    }
}
