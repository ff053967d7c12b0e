use std::net::SocketAddr;

use bytes::Bytes;
use derive_more::{Display, Error};
use log::{debug, info, warn};

use crate::protocol::{FragmentError, Fragmenter, FrameId};
use crate::transmission::UdpSocketLike;

#[derive(Debug, Display, Error)]
#[display("failed to send packet {packet_index} of frame {frame_id}: {source}")]
pub struct SendFailure {
    pub frame_id: FrameId,
    pub packet_index: u16,
    pub source: std::io::Error,
}

#[derive(Debug)]
pub struct SendReport {
    pub frame_id: FrameId,
    pub packets: u16,
    pub bytes: usize,
    pub failures: Vec<SendFailure>,
}

impl SendReport {
    /// Every packet was handed to the transport. Says nothing about delivery.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderSummary {
    pub frames: u64,
    pub packets: u64,
    pub bytes: u64,
    pub incomplete: u64,
    pub rejected: u64,
}

pub struct SendingSocket<S: UdpSocketLike> {
    socket: S,
    destination: SocketAddr,
    fragmenter: Fragmenter,
    next_id: FrameId,
}

impl<S: UdpSocketLike> SendingSocket<S> {
    pub fn new(socket: S, destination: SocketAddr, fragmenter: Fragmenter) -> Self {
        Self {
            socket,
            destination,
            fragmenter,
            next_id: 0,
        }
    }

    pub fn starting_at(mut self, frame_id: FrameId) -> Self {
        self.next_id = frame_id;
        self
    }

    pub fn next_id(&self) -> FrameId {
        self.next_id
    }

    /// Sends every packet of `frame` once, in order. A packet the transport
    /// refuses is recorded and skipped; the rest still go out.
    pub async fn send_frame(
        &self,
        frame: Bytes,
        frame_id: FrameId,
    ) -> Result<SendReport, FragmentError> {
        let datagrams = self.fragmenter.split(frame, frame_id)?;
        let mut report = SendReport {
            frame_id,
            packets: datagrams.len() as u16,
            bytes: 0,
            failures: vec![],
        };

        for datagram in datagrams {
            let packet_index = datagram.header.packet_index();
            match self
                .socket
                .send_to(&datagram.into_parts(), self.destination)
                .await
            {
                Ok(sent) => report.bytes += sent,
                Err(source) => {
                    let failure = SendFailure {
                        frame_id,
                        packet_index,
                        source,
                    };
                    warn!("{failure}");
                    report.failures.push(failure);
                }
            }
        }

        Ok(report)
    }

    /// Sends `frame` under the next identifier. The counter only advances
    /// when the frame was accepted for transmission.
    pub async fn send_next(&mut self, frame: Bytes) -> Result<SendReport, FragmentError> {
        let report = self.send_frame(frame, self.next_id).await?;
        self.next_id = self.fragmenter.id_space().next(self.next_id);
        Ok(report)
    }

    /// Drains `frames` until every producer hangs up.
    pub async fn run(mut self, frames: flume::Receiver<Bytes>) -> SenderSummary {
        info!(
            "Streaming to {} with {} byte packets",
            self.destination,
            self.fragmenter.max_payload()
        );
        let mut summary = SenderSummary::default();

        while let Ok(frame) = frames.recv_async().await {
            match self.send_next(frame).await {
                Ok(report) => {
                    debug!(
                        "Frame {} sent as {} packets, {} bytes",
                        report.frame_id, report.packets, report.bytes
                    );
                    summary.frames += 1;
                    summary.packets += u64::from(report.packets);
                    summary.bytes += report.bytes as u64;
                    if !report.is_complete() {
                        summary.incomplete += 1;
                    }
                }
                Err(err) => {
                    warn!("Skipping frame: {err}");
                    summary.rejected += 1;
                }
            }
        }

        info!("Producer closed after {} frames", summary.frames);
        summary
    }
}
