//! Async drivers that put the state machines on the wire.
//!
//! Each driver owns its machine and talks to links through channels only, so
//! the same driver runs over TCP in the binaries and over in-memory duplex
//! streams in tests.

pub mod fdc;
pub mod fo;
pub mod gun;

use std::future;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use crate::error::SimError;
use crate::mission::MissionEvent;

pub use fdc::{FdcCommand, FdcConduits, FdcSimulator};
pub use fo::{FoCommand, FoConduits, FoSimulator};
pub use gun::{GunConduits, GunSimulator};

/// Lagging subscribers lose the oldest events past this many.
pub const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Sleeps until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

pub(crate) fn publish_events(events_tx: &broadcast::Sender<MissionEvent>, events: Vec<MissionEvent>) {
    for event in events {
        info!(?event, "📡 mission event");
        // No subscribers is fine
        let _ = events_tx.send(event);
    }
}

/// Queues messages for a link without waiting on it.
///
/// A full queue means the link is stalled or down; the message is dropped the
/// way a lost frame would be.
pub(crate) fn dispatch<M: core::fmt::Debug>(
    conduit: &'static str,
    tx: &mpsc::Sender<M>,
    messages: Vec<M>,
) -> Result<(), SimError> {
    for message in messages {
        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(conduit, ?message, "outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(SimError::ConduitClosed(conduit)),
        }
    }
    Ok(())
}
