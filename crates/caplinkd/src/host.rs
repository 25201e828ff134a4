//! Host bridge: newline-delimited JSON in, newline-delimited JSON out.
//!
//! The roster, presence source and discovery layer live in the host
//! application. It reports to us one JSON object per line on stdin:
//!
//! ```text
//! {"type":"roster_add","peer":"alice@example.org"}
//! {"type":"presence","session":"alice@example.org/phone","reachability":"online","priority":5}
//! {"type":"caps","session":"alice@example.org/phone","features":["urn:xmpp:jingle:1"]}
//! {"type":"caps_removed","session":"alice@example.org/phone"}
//! {"type":"refresh","peer":"alice@example.org"}
//! {"type":"typing","enabled":false}
//! {"type":"roster_remove","peer":"alice@example.org"}
//! ```
//!
//! Every `CapabilitiesChanged` is written back as one JSON line on stdout.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use caplink_core::{BareAddress, CapabilitiesChanged, FeatureSet, FullAddress, Reachability};
use caplink_services::{CapabilityRegistry, DiscoveryCache, Dispatcher, PeerDirectory};

/// One line of host input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostNotification {
    RosterAdd {
        peer: BareAddress,
    },
    RosterRemove {
        peer: BareAddress,
    },
    Presence {
        session: FullAddress,
        reachability: Reachability,
        #[serde(default)]
        priority: i32,
    },
    Caps {
        session: FullAddress,
        features: Vec<String>,
    },
    CapsRemoved {
        session: FullAddress,
    },
    Refresh {
        peer: BareAddress,
    },
    Typing {
        enabled: bool,
    },
}

/// Everything a host notification can touch.
#[derive(Clone)]
pub struct Host {
    pub registry: CapabilityRegistry,
    pub directory: PeerDirectory,
    pub discovery: DiscoveryCache,
    pub dispatcher: Dispatcher,
}

impl Host {
    pub fn apply(&self, notification: HostNotification) {
        match notification {
            HostNotification::RosterAdd { peer } => {
                if self.directory.add(peer.clone()) {
                    tracing::info!(peer = %peer, "peer added to roster");
                }
            }
            HostNotification::RosterRemove { peer } => {
                for session in self.directory.sessions(&peer) {
                    self.discovery.forget(&session);
                }
                self.dispatcher.forget(&peer);
                if self.directory.remove(&peer).is_some() {
                    tracing::info!(peer = %peer, "peer removed from roster");
                }
            }
            HostNotification::Presence {
                session,
                reachability,
                priority,
            } => {
                self.dispatcher.on_presence(session, reachability, priority);
            }
            HostNotification::Caps { session, features } => {
                let features: FeatureSet = features.into_iter().collect();
                if let Some(change) = self.discovery.record(session, features) {
                    self.dispatcher.on_caps_changed(change);
                }
            }
            HostNotification::CapsRemoved { session } => {
                if let Some(change) = self.discovery.forget(&session) {
                    self.dispatcher.on_caps_changed(change);
                }
            }
            HostNotification::Refresh { peer } => {
                self.dispatcher.refresh(&peer);
            }
            HostNotification::Typing { enabled } => {
                self.registry.set_typing_notifications(enabled);
            }
        }
    }
}

/// Read host notifications until EOF.
///
/// Malformed lines are logged and skipped; only I/O errors end the loop.
pub async fn input_loop<R>(host: Host, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    tracing::info!("host input loop starting");

    while let Some(line) = lines.next_line().await.context("failed to read host input")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostNotification>(line) {
            Ok(notification) => {
                tracing::trace!(line = line_no, ?notification, "host notification");
                host.apply(notification);
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "malformed host notification, skipping");
            }
        }
    }

    tracing::info!(lines = line_no, "host input closed");
    Ok(())
}

/// Write every event as one JSON line until the channel closes.
pub async fn output_loop<W>(
    mut events: mpsc::UnboundedReceiver<CapabilitiesChanged>,
    mut writer: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        let mut json = serde_json::to_vec(&event).context("failed to encode event")?;
        json.push(b'\n');
        writer
            .write_all(&json)
            .await
            .context("failed to write event")?;
        writer.flush().await.context("failed to flush events")?;
    }
    Ok(())
}
