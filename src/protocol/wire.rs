use bytes::Bytes;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::error::MalformedPacket;
use super::{FrameId, FrameIdSpace};
use crate::constants::HEADER_LEN;

#[repr(C)]
#[derive(IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    frame_id: U16<BigEndian>,
    packet_index: U16<BigEndian>,
    total_packets: U16<BigEndian>,
}

const _: () = assert!(std::mem::size_of::<PacketHeader>() == HEADER_LEN);

impl PacketHeader {
    pub fn new(frame_id: FrameId, packet_index: u16, total_packets: u16) -> Self {
        Self {
            frame_id: frame_id.into(),
            packet_index: packet_index.into(),
            total_packets: total_packets.into(),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id.get()
    }

    pub fn packet_index(&self) -> u16 {
        self.packet_index.get()
    }

    pub fn total_packets(&self) -> u16 {
        self.total_packets.get()
    }
}

/// One header plus one slice of a frame. Kept as two buffers so the socket
/// can send them vectored without concatenating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Datagram {
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn into_parts(self) -> [Bytes; 2] {
        [
            Bytes::copy_from_slice(self.header.as_bytes()),
            self.payload,
        ]
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = Vec::with_capacity(self.wire_len());
        buffer.extend_from_slice(self.header.as_bytes());
        buffer.extend_from_slice(&self.payload);
        Bytes::from(buffer)
    }
}

/// Splits a received datagram into its header and payload, checking the
/// header against itself and the identifier space. The payload is a view
/// into `datagram`.
pub fn parse_datagram(
    datagram: &Bytes,
    space: FrameIdSpace,
) -> Result<(PacketHeader, Bytes), MalformedPacket> {
    let (header, _) = PacketHeader::read_from_prefix(datagram).map_err(|_| {
        MalformedPacket::TooShort {
            len: datagram.len(),
        }
    })?;

    if header.packet_index() >= header.total_packets() {
        return Err(MalformedPacket::IndexOutOfRange {
            packet_index: header.packet_index(),
            total_packets: header.total_packets(),
        });
    }

    if !space.contains(header.frame_id()) {
        return Err(MalformedPacket::IdOutOfSpace {
            frame_id: header.frame_id(),
            bits: space.bits(),
        });
    }

    Ok((header, datagram.slice(HEADER_LEN..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_network_order() {
        let header = PacketHeader::new(0x0102, 0x0304, 0x0506);
        assert_eq!(header.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn parse_splits_header_and_payload() {
        let datagram = Datagram {
            header: PacketHeader::new(5, 2, 3),
            payload: Bytes::from_static(b"IJ"),
        };
        let wire = datagram.to_bytes();
        assert_eq!(wire.len(), datagram.wire_len());

        let (header, payload) = parse_datagram(&wire, FrameIdSpace::default()).unwrap();
        assert_eq!(header, datagram.header);
        assert_eq!(&payload[..], b"IJ");
    }

    #[test]
    fn header_only_datagram_has_empty_payload() {
        let wire = Bytes::copy_from_slice(PacketHeader::new(1, 0, 1).as_bytes());
        let (_, payload) = parse_datagram(&wire, FrameIdSpace::default()).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn rejects_short_datagram() {
        let wire = Bytes::from_static(&[0, 1, 0, 0, 0]);
        assert_eq!(
            parse_datagram(&wire, FrameIdSpace::default()),
            Err(MalformedPacket::TooShort { len: 5 })
        );
    }

    #[test]
    fn rejects_index_out_of_range() {
        let space = FrameIdSpace::default();
        for (index, total) in [(3u16, 3u16), (0, 0), (9, 2)] {
            let wire = Bytes::copy_from_slice(PacketHeader::new(1, index, total).as_bytes());
            assert_eq!(
                parse_datagram(&wire, space),
                Err(MalformedPacket::IndexOutOfRange {
                    packet_index: index,
                    total_packets: total,
                })
            );
        }
    }

    #[test]
    fn rejects_id_outside_space() {
        let space = FrameIdSpace::new(8).unwrap();
        let wire = Bytes::copy_from_slice(PacketHeader::new(256, 0, 1).as_bytes());
        assert_eq!(
            parse_datagram(&wire, space),
            Err(MalformedPacket::IdOutOfSpace {
                frame_id: 256,
                bits: 8
            })
        );
    }
}
