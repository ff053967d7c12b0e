use bytes::Bytes;

use super::error::FragmentError;
use super::wire::{Datagram, PacketHeader};
use super::{FrameId, FrameIdSpace};

#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    max_payload: usize,
    space: FrameIdSpace,
}

impl Fragmenter {
    /// Returns `None` for a zero `max_payload`. `StreamConfig::validate`
    /// enforces the upper bound against the transport.
    pub fn new(max_payload: usize, space: FrameIdSpace) -> Option<Self> {
        (max_payload > 0).then_some(Self { max_payload, space })
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn id_space(&self) -> FrameIdSpace {
        self.space
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_payload * usize::from(u16::MAX)
    }

    pub fn packet_count(&self, frame_len: usize) -> usize {
        frame_len.div_ceil(self.max_payload)
    }

    /// Cuts `frame` into datagrams of at most `max_payload` bytes each. All
    /// checks happen up front, so an error means nothing was produced.
    pub fn split(
        &self,
        frame: Bytes,
        frame_id: FrameId,
    ) -> Result<impl ExactSizeIterator<Item = Datagram> + use<>, FragmentError> {
        if frame.is_empty() {
            return Err(FragmentError::EmptyFrame);
        }
        if !self.space.contains(frame_id) {
            return Err(FragmentError::IdOutOfSpace {
                frame_id,
                bits: self.space.bits(),
            });
        }

        let packets = self.packet_count(frame.len());
        let total_packets = u16::try_from(packets).map_err(|_| FragmentError::FrameTooLarge {
            len: frame.len(),
            packets,
            max: usize::from(u16::MAX),
        })?;

        let max_payload = self.max_payload;
        Ok((0..total_packets).map(move |packet_index| {
            let start = usize::from(packet_index) * max_payload;
            let end = (start + max_payload).min(frame.len());
            Datagram {
                header: PacketHeader::new(frame_id, packet_index, total_packets),
                payload: frame.slice(start..end),
            }
        }))
    }
}
