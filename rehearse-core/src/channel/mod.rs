//! Duplex channel to the remote conversational agent.
//!
//! A [`Connector`] opens a channel for a [`SessionSetup`] and hands back a
//! [`ChannelLink`]: a cloneable sender for outbound audio frames and a
//! single-consumer queue of inbound [`ChannelEvent`]s in arrival order.
//!
//! ```text
//!  session task ──send_frame──► Outbound queue ──► transport writer ──► remote
//!  session task ◄── events ◄── transport reader ◄──────────────────── remote
//! ```
//!
//! Transports (and test fakes) drive the other half through [`RemoteEnd`].

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "gemini")]
mod protocol;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{codec::TransportPayload, error::Result, setup::SessionSetup};

/// Inbound occurrences on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Incremental transcription of the remote agent's speech.
    RespondentText(String),
    /// Incremental transcription of the local user's speech.
    CallerText(String),
    /// A chunk of the remote agent's audio.
    Audio(TransportPayload),
    /// The remote agent was cut off; queued playback must stop.
    Interrupted,
    /// The channel closed. `reason` is informational only.
    Closed { reason: Option<String> },
    /// The channel failed after opening. Treated like a close.
    Error(String),
}

impl ChannelEvent {
    /// `true` for events after which no further events arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelEvent::Closed { .. } | ChannelEvent::Error(_))
    }
}

/// Messages from the session to the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(TransportPayload),
    Close,
}

/// Cloneable handle for sending on the channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSender {
    /// Queue one audio frame. Returns `false` once the transport has gone.
    pub fn send_frame(&self, payload: TransportPayload) -> bool {
        self.tx.send(Outbound::Frame(payload)).is_ok()
    }

    /// Ask the transport to close. Safe to call repeatedly.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The session's half of an open channel.
#[derive(Debug)]
pub struct ChannelLink {
    pub sender: ChannelSender,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// The transport's half of an open channel.
#[derive(Debug)]
pub struct RemoteEnd {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
}

impl RemoteEnd {
    /// Deliver an inbound event. Returns `false` if the session dropped its link.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl ChannelLink {
    /// Create a connected link/remote pair.
    pub fn pair() -> (ChannelLink, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            ChannelLink {
                sender: ChannelSender { tx: out_tx },
                events: ev_rx,
            },
            RemoteEnd {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }
}

/// Opens duplex channels.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a channel configured by `setup`. Resolves once the remote side
    /// has acknowledged the configuration.
    ///
    /// # Errors
    /// `RehearseError::ChannelOpen` if the channel cannot be established.
    async fn open(&self, setup: &SessionSetup) -> Result<ChannelLink>;
}
