//! Moves framed messages between a byte stream and an actor's channels.
//!
//! One call to [`run_link`] serves one connection. The actor hears about the
//! connection in band: [`LinkEvent::Up`] first, then each decoded message,
//! then [`LinkEvent::Down`] when the stream ends for any reason.

pub mod faults;

use core::fmt::Debug;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::codec::{encode_frame, FrameReader, WireMessage};
use crate::error::LinkError;
use crate::mission::Peer;
use faults::{FrameFate, LinkFaultConfig, LinkFaultInjector, LinkFaultStats};

/// What an actor receives from a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent<M> {
    Up,
    Message(M),
    Down,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u32,
    pub frames_sent: u32,
    pub decode_errors: u32,
    pub faults: LinkFaultStats,
}

/// Why a link stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClosed {
    /// The peer closed the stream
    PeerClosed,
    /// The actor dropped its end of a channel
    ActorGone,
    Cancelled,
}

/// Serves one connection until it closes, fails or `cancel` fires.
///
/// `outbound` is borrowed so the same queue can serve the next connection;
/// anything still queued from an earlier connection is discarded first.
///
/// # Errors
///
/// Returns the I/O or fatal codec error that ended the link. [`LinkEvent::Down`]
/// is delivered to the actor either way.
pub async fn run_link<M, S>(
    stream: S,
    peer: Peer,
    events: &mpsc::Sender<LinkEvent<M>>,
    outbound: &mut mpsc::Receiver<M>,
    faults: &LinkFaultConfig,
    cancel: &CancellationToken,
) -> Result<(LinkClosed, LinkStats), LinkError>
where
    M: WireMessage + Debug + Send,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let span = info_span!("link", %peer);
    async move {
        while outbound.try_recv().is_ok() {}

        if events.send(LinkEvent::Up).await.is_err() {
            return Ok((LinkClosed::ActorGone, LinkStats::default()));
        }
        info!("🔗 link up");

        let mut pump = Pump::new(faults.clone());
        let result = pump.run(stream, events, outbound, cancel).await;

        // The actor may already be gone on shutdown
        let _ = events.send(LinkEvent::Down).await;
        match &result {
            Ok(closed) => info!(?closed, stats = ?pump.stats, "🔌 link down"),
            Err(err) => error!(%err, stats = ?pump.stats, "🔌 link failed"),
        }
        result.map(|closed| (closed, pump.stats))
    }
    .instrument(span)
    .await
}

struct Pump<M> {
    reader: FrameReader<M>,
    injector: LinkFaultInjector,
    stats: LinkStats,
}

impl<M> Pump<M>
where
    M: WireMessage + Debug + Send,
{
    fn new(faults: LinkFaultConfig) -> Self {
        Self {
            reader: FrameReader::new(),
            injector: LinkFaultInjector::new(faults),
            stats: LinkStats::default(),
        }
    }

    async fn run<S>(
        &mut self,
        stream: S,
        events: &mpsc::Sender<LinkEvent<M>>,
        outbound: &mut mpsc::Receiver<M>,
        cancel: &CancellationToken,
    ) -> Result<LinkClosed, LinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let mut frame = BytesMut::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(LinkClosed::Cancelled),
                read = read_half.read_buf(self.reader.buffer_mut()) => {
                    if read? == 0 {
                        return Ok(LinkClosed::PeerClosed);
                    }
                    if !self.deliver(events).await? {
                        return Ok(LinkClosed::ActorGone);
                    }
                }
                message = outbound.recv() => {
                    let Some(message) = message else {
                        return Ok(LinkClosed::ActorGone);
                    };
                    frame.clear();
                    if let Err(err) = encode_frame(&message, &mut frame) {
                        warn!(%err, ?message, "dropping message that does not encode");
                        continue;
                    }
                    match self.injector.apply(&mut frame) {
                        FrameFate::Dropped => {
                            warn!(?message, "fault injection dropped frame");
                            self.stats.faults = self.injector.stats().clone();
                            continue;
                        }
                        FrameFate::Corrupted => warn!(?message, "fault injection corrupted frame"),
                        FrameFate::Delivered => debug!(?message, "sending"),
                    }
                    self.stats.faults = self.injector.stats().clone();
                    write_half.write_all(&frame).await?;
                    self.stats.frames_sent += 1;
                }
            }
        }
    }

    /// Forwards every complete frame; false once the actor is gone.
    async fn deliver(&mut self, events: &mpsc::Sender<LinkEvent<M>>) -> Result<bool, LinkError> {
        for result in self.reader.drain() {
            match result {
                Ok(message) => {
                    debug!(?message, "received");
                    self.stats.frames_received += 1;
                    if events.send(LinkEvent::Message(message)).await.is_err() {
                        return Ok(false);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    self.stats.decode_errors += 1;
                    warn!(%err, "skipping undecodable frame");
                }
            }
        }
        Ok(true)
    }
}
