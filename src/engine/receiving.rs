use std::io::ErrorKind;
use std::time::Duration;

use bytes::Bytes;
use flume::TrySendError;
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::constants::RECV_BUFFER_LEN;
use crate::protocol::{CompletedFrame, ReassemblyStats, Reassembler};
use crate::transmission::UdpSocketLike;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSummary {
    pub stats: ReassemblyStats,
    /// Completed frames dropped because the consumer queue was full.
    pub overflowed: u64,
}

pub struct ReceivingSocket<S: UdpSocketLike> {
    socket: S,
    reassembler: Reassembler,
    frames: flume::Sender<CompletedFrame>,
    sweep_interval: Duration,
}

// ICMP errors surfacing on an unconnected UDP socket; the socket is still usable.
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused | ErrorKind::Interrupted
    )
}

impl<S: UdpSocketLike> ReceivingSocket<S> {
    pub fn new(
        socket: S,
        reassembler: Reassembler,
        frames: flume::Sender<CompletedFrame>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            socket,
            reassembler,
            frames,
            sweep_interval,
        }
    }

    /// Receives until `stop` fires (or its sender is dropped), the consumer
    /// hangs up, or the socket fails. Incomplete frames are discarded on
    /// exit.
    pub async fn run(mut self, stop: flume::Receiver<()>) -> std::io::Result<ReceiverSummary> {
        let mut buffer = vec![0u8; RECV_BUFFER_LEN];
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut overflowed = 0u64;

        info!(
            "Receiving on {}",
            self.socket
                .local_addr()
                .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string())
        );

        loop {
            tokio::select! {
                biased;

                _ = stop.recv_async() => {
                    info!("Stop requested");
                    break;
                },

                _ = ticker.tick() => {
                    self.reassembler.evict_expired(Instant::now());
                },

                received = self.socket.recv_from(&mut buffer) => {
                    let (length, from) = match received {
                        Ok(received) => received,
                        Err(err) if is_transient(err.kind()) => {
                            debug!("Ignoring transient socket error: {err}");
                            continue;
                        }
                        Err(err) => {
                            warn!("Socket failed: {err}");
                            return Err(err);
                        }
                    };

                    let datagram = Bytes::copy_from_slice(&buffer[..length]);
                    match self.reassembler.ingest(datagram) {
                        Ok(Some(frame)) => {
                            debug!("Frame {} complete, {} bytes", frame.frame_id, frame.data.len());
                            match self.frames.try_send(frame) {
                                Ok(()) => {}
                                Err(TrySendError::Full(frame)) => {
                                    overflowed += 1;
                                    warn!("Consumer lagging, dropped frame {}", frame.frame_id);
                                }
                                Err(TrySendError::Disconnected(_)) => {
                                    info!("Consumer hung up");
                                    break;
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!("Dropping datagram from {from}: {err}"),
                    }
                },
            }
        }

        let stats = self.reassembler.stats();
        info!(
            "Delivered {} frames, {} stale, {} evicted, {} malformed, {} inconsistent, {} still in flight",
            stats.delivered,
            stats.stale,
            stats.evicted,
            stats.malformed,
            stats.inconsistent,
            stats.in_flight
        );
        Ok(ReceiverSummary { stats, overflowed })
    }
}
