pub mod error;
pub mod fragmenter;
pub mod frame_id;
pub mod reassembler;
pub mod wire;

pub use error::{FragmentError, MalformedPacket, ReassemblyError};
pub use fragmenter::Fragmenter;
pub use frame_id::{FrameId, FrameIdSpace};
pub use reassembler::{CompletedFrame, EvictionPolicy, ReassemblyStats, Reassembler};
pub use wire::{Datagram, PacketHeader, parse_datagram};
