use derive_more::{Display, Error, From};

use super::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum FragmentError {
    #[display("refusing to send an empty frame")]
    EmptyFrame,
    #[display("frame of {len} bytes needs {packets} packets, more than {max} allowed")]
    FrameTooLarge { len: usize, packets: usize, max: usize },
    #[display("frame id {frame_id} does not fit in {bits} bits")]
    IdOutOfSpace { frame_id: FrameId, bits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum MalformedPacket {
    #[display("datagram of {len} bytes is shorter than the header")]
    TooShort { len: usize },
    #[display("packet index {packet_index} out of range for {total_packets} packets")]
    IndexOutOfRange {
        packet_index: u16,
        total_packets: u16,
    },
    #[display("frame id {frame_id} does not fit in {bits} bits")]
    IdOutOfSpace { frame_id: FrameId, bits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error, From)]
pub enum ReassemblyError {
    #[display("malformed packet: {_0}")]
    #[from]
    Malformed(#[error(source)] MalformedPacket),
    #[display("frame {frame_id} announced {found} packets, buffer holds {expected}")]
    InconsistentFrame {
        frame_id: FrameId,
        expected: u16,
        found: u16,
    },
}
