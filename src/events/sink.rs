// src/events/sink.rs

//! Side channels that receive every emitted event.
//!
//! A sink is how persistence or UI layers outside this crate observe the
//! bus without registering handlers. Sinks are called synchronously right
//! after the event is recorded and must not block.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;

use super::Event;

/// Receives a copy of every emitted event.
pub trait EventSink: Send + Sync + Debug {
    fn forward(&self, event: Arc<Event>) -> Result<()>;
}

/// Forwards events into a bounded tokio mpsc channel.
///
/// When the channel is full the event is dropped for this sink only and an
/// error is returned, which the bus logs.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<Event>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn forward(&self, event: Arc<Event>) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => {
                anyhow!("sink channel full; dropped event {} ({})", ev.id, ev.kind)
            }
            mpsc::error::TrySendError::Closed(ev) => {
                anyhow!("sink channel closed; dropped event {} ({})", ev.id, ev.kind)
            }
        })
    }
}
