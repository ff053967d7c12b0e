//! Streams frames that are larger than one datagram over UDP.
//!
//! The sender cuts each frame into packets carrying a 6-byte header
//! (`frame_id`, `packet_index`, `total_packets`). The receiver collects
//! packets per frame in any order and hands out a frame once it is complete
//! and newer than the last one handed out. Lost packets are never recovered;
//! their frame is dropped.

pub mod config;
pub mod constants;
pub mod engine;
pub mod protocol;
pub mod transmission;
pub mod util;
