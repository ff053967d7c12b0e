//! Receiver half of the frame protocol.
//!
//! Datagrams are grouped by frame id into fixed-length slot arrays. A frame is
//! handed out once every slot is filled and its id is newer than the last
//! frame handed out. Buffers that can no longer be delivered are evicted
//! either by identifier distance from the marker or by age.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tokio::time::Instant;

use super::error::ReassemblyError;
use super::wire::parse_datagram;
use super::{FrameId, FrameIdSpace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: FrameId,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Buffers not newer than the marker and at least `window` ids behind it
    /// are dropped whenever the marker advances. Must stay below half the
    /// identifier space.
    pub window: Option<u16>,
    /// Buffers whose first packet is at least this old are dropped by
    /// [`Reassembler::evict_expired`].
    pub timeout: Option<Duration>,
}

impl EvictionPolicy {
    pub const UNBOUNDED: Self = Self {
        window: None,
        timeout: None,
    };
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub delivered: u64,
    pub stale: u64,
    pub malformed: u64,
    pub inconsistent: u64,
    pub evicted: u64,
    pub in_flight: usize,
}

struct InFlightFrame {
    slots: Vec<Option<Bytes>>,
    filled: usize,
    first_seen: Instant,
}

impl InFlightFrame {
    fn new(total_packets: u16, now: Instant) -> Self {
        Self {
            slots: vec![None; usize::from(total_packets)],
            filled: 0,
            first_seen: now,
        }
    }

    fn total_packets(&self) -> u16 {
        // Never exceeds u16::MAX: sized from a header field.
        self.slots.len() as u16
    }

    fn insert(&mut self, packet_index: u16, payload: Bytes) {
        if self.slots[usize::from(packet_index)]
            .replace(payload)
            .is_none()
        {
            self.filled += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    fn concat(self) -> Bytes {
        if let [Some(only)] = self.slots.as_slice() {
            return only.clone();
        }
        let total = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for slot in self.slots.iter().flatten() {
            data.extend_from_slice(slot);
        }
        data.freeze()
    }
}

pub struct Reassembler {
    space: FrameIdSpace,
    policy: EvictionPolicy,
    in_flight: HashMap<FrameId, InFlightFrame>,
    last_accepted: Option<FrameId>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(space: FrameIdSpace, policy: EvictionPolicy) -> Self {
        Self {
            space,
            policy,
            in_flight: HashMap::new(),
            last_accepted: None,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn last_accepted(&self) -> Option<FrameId> {
        self.last_accepted
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        ReassemblyStats {
            in_flight: self.in_flight.len(),
            ..self.stats
        }
    }

    pub fn ingest(&mut self, datagram: Bytes) -> Result<Option<CompletedFrame>, ReassemblyError> {
        self.ingest_at(datagram, Instant::now())
    }

    /// Feeds one datagram. `Ok(None)` covers both "frame still incomplete"
    /// and "frame completed but stale".
    pub fn ingest_at(
        &mut self,
        datagram: Bytes,
        now: Instant,
    ) -> Result<Option<CompletedFrame>, ReassemblyError> {
        let (header, payload) = parse_datagram(&datagram, self.space).inspect_err(|_| {
            self.stats.malformed += 1;
        })?;
        let frame_id = header.frame_id();
        let total_packets = header.total_packets();

        let frame = self
            .in_flight
            .entry(frame_id)
            .or_insert_with(|| InFlightFrame::new(total_packets, now));

        if frame.total_packets() != total_packets {
            let expected = frame.total_packets();
            self.in_flight.remove(&frame_id);
            self.stats.inconsistent += 1;
            return Err(ReassemblyError::InconsistentFrame {
                frame_id,
                expected,
                found: total_packets,
            });
        }

        frame.insert(header.packet_index(), payload);
        if !frame.is_complete() {
            return Ok(None);
        }

        let Some(frame) = self.in_flight.remove(&frame_id) else {
            return Ok(None);
        };

        if let Some(marker) = self.last_accepted
            && !self.space.is_newer(frame_id, marker)
        {
            debug!("Discarding stale frame {frame_id}, already delivered {marker}");
            self.stats.stale += 1;
            return Ok(None);
        }

        self.last_accepted = Some(frame_id);
        self.stats.delivered += 1;
        self.evict_behind(frame_id);

        Ok(Some(CompletedFrame {
            frame_id,
            data: frame.concat(),
        }))
    }

    // Frames newer than the marker are never touched; only those at least
    // `window` ids behind it go.
    fn evict_behind(&mut self, marker: FrameId) {
        let Some(window) = self.policy.window else {
            return;
        };
        let space = self.space;
        let before = self.in_flight.len();
        self.in_flight.retain(|&frame_id, _| {
            space.is_newer(frame_id, marker) || space.distance(frame_id, marker) < u32::from(window)
        });
        let evicted = before - self.in_flight.len();
        if evicted > 0 {
            debug!("Evicted {evicted} incomplete frames {window} or more behind {marker}");
            self.stats.evicted += evicted as u64;
        }
    }

    /// Drops incomplete frames whose first packet arrived at least
    /// `policy.timeout` before `now`. Returns how many were dropped.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.policy.timeout else {
            return 0;
        };
        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, frame| now.saturating_duration_since(frame.first_seen) < timeout);
        let evicted = before - self.in_flight.len();
        if evicted > 0 {
            warn!("Timed out {evicted} incomplete frames");
            self.stats.evicted += evicted as u64;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::MalformedPacket;
    use crate::protocol::fragmenter::Fragmenter;
    use crate::protocol::wire::PacketHeader;
    use proptest::prelude::*;
    use zerocopy::IntoBytes;

    fn datagrams(max_payload: usize, frame: &[u8], frame_id: FrameId) -> Vec<Bytes> {
        Fragmenter::new(max_payload, FrameIdSpace::default()).unwrap()
            .split(Bytes::copy_from_slice(frame), frame_id)
            .unwrap()
            .map(|datagram| datagram.to_bytes())
            .collect()
    }

    fn unbounded() -> Reassembler {
        Reassembler::new(FrameIdSpace::default(), EvictionPolicy::UNBOUNDED)
    }

    fn deliver_single(reassembler: &mut Reassembler, frame_id: FrameId) -> Option<CompletedFrame> {
        let datagram = datagrams(16, b"x", frame_id).remove(0);
        reassembler.ingest(datagram).unwrap()
    }

    #[test]
    fn reassembles_out_of_order() {
        let packets = datagrams(4, b"ABCDEFGHIJ", 5);
        let mut reassembler = unbounded();

        assert_eq!(reassembler.ingest(packets[2].clone()).unwrap(), None);
        assert_eq!(reassembler.ingest(packets[0].clone()).unwrap(), None);
        assert_eq!(reassembler.in_flight(), 1);

        let frame = reassembler.ingest(packets[1].clone()).unwrap().unwrap();
        assert_eq!(frame.frame_id, 5);
        assert_eq!(&frame.data[..], b"ABCDEFGHIJ");
        assert_eq!(reassembler.in_flight(), 0);
        assert_eq!(reassembler.last_accepted(), Some(5));
    }

    #[test]
    fn missing_packet_never_completes_and_leaves_others_alone() {
        let lossy = datagrams(4, b"ABCDEFGHIJ", 1);
        let intact = datagrams(4, b"0123456789", 2);
        let mut reassembler = unbounded();

        let mut completed = vec![];
        for packet in lossy.iter().skip(1).chain(intact.iter()) {
            if let Some(frame) = reassembler.ingest(packet.clone()).unwrap() {
                completed.push(frame);
            }
        }

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].frame_id, 2);
        assert_eq!(&completed[0].data[..], b"0123456789");
        assert_eq!(reassembler.in_flight(), 1);
    }

    #[test]
    fn duplicate_overwrites_slot() {
        let mut reassembler = unbounded();
        let first = PacketHeader::new(3, 0, 2);
        let mut stale = first.as_bytes().to_vec();
        stale.extend_from_slice(b"old");
        let mut fresh = first.as_bytes().to_vec();
        fresh.extend_from_slice(b"new");
        let mut tail = PacketHeader::new(3, 1, 2).as_bytes().to_vec();
        tail.extend_from_slice(b"!");

        assert!(reassembler.ingest(Bytes::from(stale)).unwrap().is_none());
        assert!(reassembler.ingest(Bytes::from(fresh)).unwrap().is_none());
        let frame = reassembler.ingest(Bytes::from(tail)).unwrap().unwrap();
        assert_eq!(&frame.data[..], b"new!");
    }

    #[test]
    fn older_frame_is_discarded() {
        let mut reassembler = unbounded();
        assert!(deliver_single(&mut reassembler, 10).is_some());
        assert!(deliver_single(&mut reassembler, 9).is_none());
        assert!(deliver_single(&mut reassembler, 10).is_none());
        assert_eq!(reassembler.last_accepted(), Some(10));

        assert_eq!(deliver_single(&mut reassembler, 11).unwrap().frame_id, 11);
        assert_eq!(reassembler.last_accepted(), Some(11));

        let stats = reassembler.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.stale, 2);
    }

    #[test]
    fn newer_frame_may_skip_ids() {
        let mut reassembler = unbounded();
        assert!(deliver_single(&mut reassembler, 1).is_some());
        assert!(deliver_single(&mut reassembler, 40).is_some());
        assert!(deliver_single(&mut reassembler, 39).is_none());
    }

    #[test]
    fn wraparound_at_full_width() {
        let mut reassembler = unbounded();
        assert!(deliver_single(&mut reassembler, u16::MAX).is_some());
        assert_eq!(deliver_single(&mut reassembler, 0).unwrap().frame_id, 0);
        assert!(deliver_single(&mut reassembler, u16::MAX).is_none());
    }

    #[test]
    fn wraparound_at_narrow_width() {
        let space = FrameIdSpace::new(8).unwrap();
        let mut reassembler = Reassembler::new(space, EvictionPolicy::UNBOUNDED);
        let single = |id: FrameId| {
            let mut packet = PacketHeader::new(id, 0, 1).as_bytes().to_vec();
            packet.push(id as u8);
            Bytes::from(packet)
        };

        assert!(reassembler.ingest(single(255)).unwrap().is_some());
        assert!(reassembler.ingest(single(0)).unwrap().is_some());
        assert_eq!(reassembler.last_accepted(), Some(0));
        assert!(reassembler.ingest(single(254)).unwrap().is_none());
    }

    #[test]
    fn redelivered_packet_starts_a_fresh_buffer() {
        let packets = datagrams(4, b"ABCDEFGHIJ", 5);
        let mut reassembler = unbounded();
        for packet in &packets[..2] {
            reassembler.ingest(packet.clone()).unwrap();
        }
        assert!(reassembler.ingest(packets[2].clone()).unwrap().is_some());

        assert!(reassembler.ingest(packets[0].clone()).unwrap().is_none());
        assert_eq!(reassembler.in_flight(), 1);

        // Completing it again is stale, not a second delivery.
        assert!(reassembler.ingest(packets[1].clone()).unwrap().is_none());
        assert!(reassembler.ingest(packets[2].clone()).unwrap().is_none());
        assert_eq!(reassembler.in_flight(), 0);
        assert_eq!(reassembler.stats().delivered, 1);

        let next = datagrams(4, b"KLMNOP", 6);
        let mut last = None;
        for packet in next {
            last = reassembler.ingest(packet).unwrap();
        }
        assert_eq!(&last.unwrap().data[..], b"KLMNOP");
    }

    #[test]
    fn conflicting_total_drops_buffer() {
        let mut reassembler = unbounded();
        let mut first = PacketHeader::new(8, 0, 3).as_bytes().to_vec();
        first.extend_from_slice(b"aa");
        let mut second = PacketHeader::new(8, 1, 4).as_bytes().to_vec();
        second.extend_from_slice(b"bb");

        assert!(reassembler.ingest(Bytes::from(first)).unwrap().is_none());
        assert_eq!(
            reassembler.ingest(Bytes::from(second)),
            Err(ReassemblyError::InconsistentFrame {
                frame_id: 8,
                expected: 3,
                found: 4,
            })
        );
        assert_eq!(reassembler.in_flight(), 0);
        assert_eq!(reassembler.stats().inconsistent, 1);
    }

    #[test]
    fn malformed_datagram_leaves_buffers_alone() {
        let packets = datagrams(4, b"ABCDEFGHIJ", 5);
        let mut reassembler = unbounded();
        reassembler.ingest(packets[0].clone()).unwrap();

        assert_eq!(
            reassembler.ingest(Bytes::from_static(&[0, 5, 0])),
            Err(ReassemblyError::Malformed(MalformedPacket::TooShort { len: 3 }))
        );
        let bad_index = Bytes::copy_from_slice(PacketHeader::new(5, 3, 3).as_bytes());
        assert!(matches!(
            reassembler.ingest(bad_index),
            Err(ReassemblyError::Malformed(MalformedPacket::IndexOutOfRange { .. }))
        ));
        assert_eq!(reassembler.in_flight(), 1);
        assert_eq!(reassembler.stats().malformed, 2);

        reassembler.ingest(packets[1].clone()).unwrap();
        let frame = reassembler.ingest(packets[2].clone()).unwrap().unwrap();
        assert_eq!(&frame.data[..], b"ABCDEFGHIJ");
    }

    #[test]
    fn window_evicts_buffers_behind_marker() {
        let policy = EvictionPolicy {
            window: Some(4),
            timeout: None,
        };
        let mut reassembler = Reassembler::new(FrameIdSpace::default(), policy);

        // Half-received frames 1, 5 and 8.
        for frame_id in [1, 5, 8] {
            let packets = datagrams(4, b"ABCDEFGH", frame_id);
            reassembler.ingest(packets[0].clone()).unwrap();
        }
        assert_eq!(reassembler.in_flight(), 3);

        // Marker 9, window 4: 1 and 5 go, 8 stays.
        assert!(deliver_single(&mut reassembler, 9).is_some());
        assert_eq!(reassembler.in_flight(), 1);
        assert_eq!(reassembler.stats().evicted, 2);

        let packets = datagrams(4, b"ABCDEFGH", 8);
        assert!(reassembler.ingest(packets[1].clone()).unwrap().is_none());
        assert_eq!(reassembler.stats().stale, 1);
    }

    #[test]
    fn window_eviction_across_wrap() {
        let policy = EvictionPolicy {
            window: Some(2),
            timeout: None,
        };
        let mut reassembler = Reassembler::new(FrameIdSpace::default(), policy);
        for frame_id in [u16::MAX - 1, u16::MAX] {
            let packets = datagrams(4, b"ABCDEFGH", frame_id);
            reassembler.ingest(packets[0].clone()).unwrap();
        }

        // Marker 1, window 2: both buffers are 2 or more behind it.
        assert!(deliver_single(&mut reassembler, 1).is_some());
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn window_spares_newer_frames_in_narrow_space() {
        let policy = EvictionPolicy {
            window: Some(31),
            timeout: None,
        };
        let mut reassembler = Reassembler::new(FrameIdSpace::new(6).unwrap(), policy);
        let part = |index: u16| {
            let mut packet = PacketHeader::new(1, index, 2).as_bytes().to_vec();
            packet.push(b'a' + index as u8);
            Bytes::from(packet)
        };

        assert!(reassembler.ingest(part(0)).unwrap().is_none());
        let mut zero = PacketHeader::new(0, 0, 1).as_bytes().to_vec();
        zero.push(b'z');
        assert!(reassembler.ingest(Bytes::from(zero)).unwrap().is_some());
        assert_eq!(reassembler.in_flight(), 1);
        assert_eq!(reassembler.stats().evicted, 0);

        let frame = reassembler.ingest(part(1)).unwrap().unwrap();
        assert_eq!(frame.frame_id, 1);
        assert_eq!(&frame.data[..], b"ab");
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn window_spares_frames_far_ahead_of_marker() {
        let policy = EvictionPolicy {
            window: Some(32),
            timeout: None,
        };
        let mut reassembler = Reassembler::new(FrameIdSpace::default(), policy);
        let ahead = datagrams(4, b"ABCDEFGH", 32_740);
        reassembler.ingest(ahead[0].clone()).unwrap();

        assert!(deliver_single(&mut reassembler, 0).is_some());
        assert_eq!(reassembler.in_flight(), 1);

        let frame = reassembler.ingest(ahead[1].clone()).unwrap().unwrap();
        assert_eq!(frame.frame_id, 32_740);
    }

    #[test]
    fn timeout_evicts_old_buffers() {
        let policy = EvictionPolicy {
            window: None,
            timeout: Some(Duration::from_millis(500)),
        };
        let mut reassembler = Reassembler::new(FrameIdSpace::default(), policy);
        let start = Instant::now();

        let old = datagrams(4, b"ABCDEFGH", 1);
        let young = datagrams(4, b"ABCDEFGH", 2);
        reassembler.ingest_at(old[0].clone(), start).unwrap();
        reassembler
            .ingest_at(young[0].clone(), start + Duration::from_millis(300))
            .unwrap();

        assert_eq!(reassembler.evict_expired(start + Duration::from_millis(499)), 0);
        assert_eq!(reassembler.evict_expired(start + Duration::from_millis(500)), 1);
        assert_eq!(reassembler.in_flight(), 1);

        let frame = reassembler
            .ingest_at(young[1].clone(), start + Duration::from_millis(600))
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_id, 2);
    }

    #[test]
    fn unbounded_policy_keeps_everything() {
        let mut reassembler = unbounded();
        for frame_id in 0..100 {
            let packets = datagrams(4, b"ABCDEFGH", frame_id);
            reassembler.ingest(packets[0].clone()).unwrap();
        }
        assert!(deliver_single(&mut reassembler, 200).is_some());
        assert_eq!(reassembler.evict_expired(Instant::now() + Duration::from_secs(3600)), 0);
        assert_eq!(reassembler.in_flight(), 100);
    }

    fn shuffled_packets() -> impl Strategy<Value = (Vec<u8>, FrameId, Vec<Bytes>)> {
        (
            proptest::collection::vec(any::<u8>(), 1..2048),
            1usize..300,
            any::<FrameId>(),
        )
            .prop_flat_map(|(frame, max_payload, frame_id)| {
                let packets = datagrams(max_payload, &frame, frame_id);
                (Just(frame), Just(frame_id), Just(packets).prop_shuffle())
            })
    }

    proptest! {
        #[test]
        fn any_arrival_order_round_trips((frame, frame_id, packets) in shuffled_packets()) {
            let mut reassembler = unbounded();
            let mut completed = vec![];
            for packet in packets {
                if let Some(done) = reassembler.ingest(packet).unwrap() {
                    completed.push(done);
                }
            }
            prop_assert_eq!(completed.len(), 1);
            prop_assert_eq!(completed[0].frame_id, frame_id);
            prop_assert_eq!(&completed[0].data[..], &frame[..]);
        }

        #[test]
        fn any_single_loss_prevents_completion(
            frame in proptest::collection::vec(any::<u8>(), 2..1024),
            max_payload in 1usize..64,
            lost in any::<proptest::sample::Index>(),
        ) {
            let mut packets = datagrams(max_payload, &frame, 77);
            prop_assume!(packets.len() > 1);
            packets.remove(lost.index(packets.len()));

            let mut reassembler = unbounded();
            for packet in packets {
                prop_assert!(reassembler.ingest(packet).unwrap().is_none());
            }
            prop_assert_eq!(reassembler.in_flight(), 1);
        }
    }
}
