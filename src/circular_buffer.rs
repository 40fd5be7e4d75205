// surfrec/src/circular_buffer.rs
//
//! A fixed-capacity ring of encoded video packets.
//!
//! Payload bytes live in one byte ring and packet metadata in a separate ring of slots. Packets
//! are evicted strictly oldest-first when either ring runs out of room; keyframes get no special
//! protection. `first_index()` returning `None` is how callers learn that the retained packets
//! currently have no clean starting point.
//!
//! The ring is owned by a single thread (the drain worker) and has no internal locking.

use crate::Error;

use bitflags::bitflags;
use log::trace;
use std::borrow::Cow;

bitflags! {
    /// Per-packet flags, with the same bit values `MediaCodec` uses.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PacketFlags: u32 {
        const KEY_FRAME     = 0x01;
        const CODEC_CONFIG  = 0x02;
        const END_OF_STREAM = 0x04;
        const PARTIAL_FRAME = 0x08;
    }
}

/// Metadata of one retained packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PacketInfo {
    /// Byte offset of the payload within the data ring.
    pub offset: usize,
    /// Payload length in bytes.
    pub size: usize,
    pub flags: PacketFlags,
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
}

impl PacketInfo {
    #[inline]
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(PacketFlags::KEY_FRAME)
    }
}

/// A read view of one packet. Borrowed from the ring unless the payload straddles the end of the
/// ring, in which case it is a contiguous copy.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub data: Cow<'a, [u8]>,
    pub info: PacketInfo,
}

pub struct CircularVideoBuffer {
    data: Box<[u8]>,
    used_bytes: usize,
    // One slot more than the packet capacity; `head == tail` means empty.
    meta: Box<[PacketInfo]>,
    head: usize,
    tail: usize,
}

impl CircularVideoBuffer {
    /// Sizes the rings to hold `span_sec` seconds of video: `bit_rate * span_sec / 8` bytes and
    /// `frame_rate * span_sec * 2` packets.
    pub fn new(bit_rate: u32, frame_rate: u32, span_sec: u32) -> Result<CircularVideoBuffer, Error> {
        let data_capacity = (bit_rate as u64 * span_sec as u64 / 8) as usize;
        let meta_capacity = frame_rate as usize * span_sec as usize * 2;
        CircularVideoBuffer::with_capacity(data_capacity, meta_capacity)
    }

    pub fn with_capacity(data_capacity: usize, meta_capacity: usize) -> Result<CircularVideoBuffer, Error> {
        if data_capacity == 0 {
            return Err(Error::InvalidConfiguration("data capacity must be positive"));
        }
        if meta_capacity == 0 {
            return Err(Error::InvalidConfiguration("packet capacity must be positive"));
        }
        trace!("circular buffer: {} bytes, {} packets", data_capacity, meta_capacity);
        Ok(CircularVideoBuffer {
            data: vec![0; data_capacity].into_boxed_slice(),
            used_bytes: 0,
            meta: vec![PacketInfo::default(); meta_capacity + 1].into_boxed_slice(),
            head: 0,
            tail: 0,
        })
    }

    /// Capacity of the byte ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Maximum number of retained packets.
    #[inline]
    pub fn packet_capacity(&self) -> usize {
        self.meta.len() - 1
    }

    /// Bytes held by retained packets.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.used_bytes
    }

    /// Number of retained packets.
    #[inline]
    pub fn len(&self) -> usize {
        (self.head + self.meta.len() - self.tail) % self.meta.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.used_bytes = 0;
    }

    /// Appends a packet, evicting the oldest packets until it fits.
    pub fn add(&mut self, payload: &[u8], flags: PacketFlags, pts_us: i64) -> Result<(), Error> {
        let size = payload.len();
        let capacity = self.capacity();
        if size > capacity {
            return Err(Error::PacketTooLarge { size, capacity });
        }

        while !self.is_empty() && (size > capacity - self.used_bytes || self.slots_full()) {
            self.remove_tail();
        }

        let offset = self.write_offset();
        let first_part = size.min(capacity - offset);
        self.data[offset..offset + first_part].copy_from_slice(&payload[..first_part]);
        if first_part < size {
            self.data[..size - first_part].copy_from_slice(&payload[first_part..]);
        }

        self.meta[self.head] = PacketInfo { offset, size, flags, pts_us };
        self.head = self.next_slot(self.head);
        self.used_bytes += size;
        Ok(())
    }

    #[inline]
    fn slots_full(&self) -> bool {
        self.next_slot(self.head) == self.tail
    }

    #[inline]
    fn next_slot(&self, index: usize) -> usize {
        (index + 1) % self.meta.len()
    }

    #[inline]
    fn newest_slot(&self) -> usize {
        (self.head + self.meta.len() - 1) % self.meta.len()
    }

    // The byte following the newest packet. An empty ring starts over at 0.
    fn write_offset(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let newest = &self.meta[self.newest_slot()];
        (newest.offset + newest.size) % self.capacity()
    }

    fn remove_tail(&mut self) {
        debug_assert!(!self.is_empty());
        let evicted = self.meta[self.tail];
        self.used_bytes -= evicted.size;
        self.tail = self.next_slot(self.tail);
        trace!("evicted packet at {} ({} bytes, pts {})", evicted.offset, evicted.size, evicted.pts_us);
    }

    fn is_live(&self, index: usize) -> bool {
        if index >= self.meta.len() || self.is_empty() {
            return false;
        }
        if self.tail < self.head {
            self.tail <= index && index < self.head
        } else {
            index >= self.tail || index < self.head
        }
    }

    /// Index of the oldest retained keyframe.
    pub fn first_index(&self) -> Option<usize> {
        let mut index = self.tail;
        while index != self.head {
            if self.meta[index].is_key_frame() {
                return Some(index);
            }
            index = self.next_slot(index);
        }
        None
    }

    /// Index of the packet after `index`, or `None` if `index` is the newest packet.
    pub fn next_index(&self, index: usize) -> Option<usize> {
        if !self.is_live(index) {
            return None;
        }
        let next = self.next_slot(index);
        if next == self.head {
            None
        } else {
            Some(next)
        }
    }

    /// Metadata of the packet at `index`.
    pub fn info(&self, index: usize) -> Option<PacketInfo> {
        if self.is_live(index) {
            Some(self.meta[index])
        } else {
            None
        }
    }

    /// The payload of the packet at `index`.
    pub fn chunk(&self, index: usize) -> Option<Chunk<'_>> {
        let info = self.info(index)?;
        let end = info.offset + info.size;
        let data = if end <= self.capacity() {
            Cow::Borrowed(&self.data[info.offset..end])
        } else {
            let mut contiguous = Vec::with_capacity(info.size);
            contiguous.extend_from_slice(&self.data[info.offset..]);
            contiguous.extend_from_slice(&self.data[..end - self.capacity()]);
            Cow::Owned(contiguous)
        };
        Some(Chunk { data, info })
    }

    /// Walks the retained packets from `index` to the newest one.
    pub fn iter_from(&self, index: usize) -> Iter<'_> {
        Iter { buffer: self, next: if self.is_live(index) { Some(index) } else { None } }
    }

    /// Timestamp of the newest packet minus that of the oldest retained one.
    pub fn time_span_usec(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.meta[self.newest_slot()].pts_us - self.meta[self.tail].pts_us
    }
}

pub struct Iter<'a> {
    buffer: &'a CircularVideoBuffer,
    next: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        let index = self.next?;
        self.next = self.buffer.next_index(index);
        self.buffer.chunk(index)
    }
}

#[cfg(test)]
mod test {
    use super::{CircularVideoBuffer, PacketFlags};
    use crate::Error;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::borrow::Cow;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    fn walk(buffer: &CircularVideoBuffer, start: usize) -> Vec<i64> {
        buffer.iter_from(start).map(|chunk| chunk.info.pts_us).collect()
    }

    #[test]
    fn sizes_follow_bit_rate_and_frame_rate() {
        let buffer = CircularVideoBuffer::new(6_000_000, 30, 4).unwrap();
        assert_eq!(buffer.capacity(), 3_000_000);
        assert_eq!(buffer.packet_capacity(), 240);
        assert!(buffer.is_empty());
        assert!(CircularVideoBuffer::new(0, 30, 4).is_err());
    }

    #[test]
    fn third_packet_evicts_the_oldest() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(40, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        buffer.add(&payload(40, 2), PacketFlags::KEY_FRAME, 33_000).unwrap();
        buffer.add(&payload(40, 3), PacketFlags::empty(), 66_000).unwrap();

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.bytes_used(), 80);
        let first = buffer.first_index().unwrap();
        assert_eq!(buffer.info(first).unwrap().pts_us, 33_000);
        assert_eq!(walk(&buffer, first), vec![33_000, 66_000]);
        assert_eq!(buffer.time_span_usec(), 33_000);
    }

    #[test]
    fn first_index_skips_to_a_later_keyframe() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(40, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        buffer.add(&payload(40, 2), PacketFlags::empty(), 33_000).unwrap();
        buffer.add(&payload(40, 3), PacketFlags::KEY_FRAME, 66_000).unwrap();

        let first = buffer.first_index().unwrap();
        assert!(buffer.info(first).unwrap().is_key_frame());
        assert_eq!(walk(&buffer, first), vec![66_000]);
    }

    #[test]
    fn no_keyframe_means_no_first_index() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(10, 1), PacketFlags::empty(), 0).unwrap();
        buffer.add(&payload(10, 2), PacketFlags::PARTIAL_FRAME, 1).unwrap();
        assert_eq!(buffer.first_index(), None);
    }

    #[test]
    fn exactly_full_does_not_evict() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(60, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        buffer.add(&payload(40, 2), PacketFlags::empty(), 1).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.bytes_used(), 100);
    }

    #[test]
    fn one_byte_free_fits_one_byte_only() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(60, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        buffer.add(&payload(39, 2), PacketFlags::empty(), 1).unwrap();
        assert_eq!(buffer.bytes_used(), 99);

        buffer.add(&payload(1, 3), PacketFlags::empty(), 2).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.bytes_used(), 100);

        buffer.add(&payload(1, 4), PacketFlags::empty(), 3).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.bytes_used(), 41);
        assert_eq!(buffer.first_index(), None);
    }

    #[test]
    fn wrapped_packet_round_trips() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(60, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        buffer.add(&payload(30, 2), PacketFlags::KEY_FRAME, 1).unwrap();

        // Starts at byte 90 and wraps around to byte 20.
        let wrapped = payload(30, 3);
        buffer.add(&wrapped, PacketFlags::empty(), 2).unwrap();

        let newest = buffer.next_index(buffer.first_index().unwrap()).unwrap();
        let chunk = buffer.chunk(newest).unwrap();
        assert_eq!(chunk.info.offset, 90);
        assert!(matches!(chunk.data, Cow::Owned(_)));
        assert_eq!(&*chunk.data, &wrapped[..]);

        let first = buffer.chunk(buffer.first_index().unwrap()).unwrap();
        assert!(matches!(first.data, Cow::Borrowed(_)));
        assert_eq!(&*first.data, &payload(30, 2)[..]);
    }

    #[test]
    fn packet_larger_than_the_ring_is_rejected() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 16).unwrap();
        buffer.add(&payload(50, 1), PacketFlags::KEY_FRAME, 0).unwrap();
        match buffer.add(&payload(101, 2), PacketFlags::KEY_FRAME, 1) {
            Err(Error::PacketTooLarge { size: 101, capacity: 100 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        // Nothing was evicted and the buffer is still usable.
        assert_eq!(buffer.len(), 1);
        buffer.add(&payload(100, 3), PacketFlags::KEY_FRAME, 2).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn running_out_of_slots_evicts_too() {
        let mut buffer = CircularVideoBuffer::with_capacity(1000, 2).unwrap();
        for pts in 0..5 {
            buffer.add(&payload(4, pts as u8), PacketFlags::KEY_FRAME, pts).unwrap();
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(walk(&buffer, buffer.first_index().unwrap()), vec![3, 4]);
    }

    #[test]
    fn empty_and_cleared_buffers_have_no_span() {
        let mut buffer = CircularVideoBuffer::with_capacity(100, 4).unwrap();
        assert_eq!(buffer.time_span_usec(), 0);
        assert_eq!(buffer.next_index(0), None);
        assert!(buffer.chunk(0).is_none());

        buffer.add(&payload(10, 1), PacketFlags::KEY_FRAME, 500).unwrap();
        assert_eq!(buffer.time_span_usec(), 0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.bytes_used(), 0);
        assert_eq!(buffer.first_index(), None);
    }

    #[test]
    fn random_workload_keeps_rings_consistent() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut buffer = CircularVideoBuffer::with_capacity(997, 24).unwrap();
        let mut pts = 0;

        for n in 0..2000 {
            let len = rng.gen_range(0..=300);
            let flags = if n % 7 == 0 { PacketFlags::KEY_FRAME } else { PacketFlags::empty() };
            let data = payload(len, rng.gen());
            pts += rng.gen_range(1..40_000);
            buffer.add(&data, flags, pts).unwrap();

            assert!(buffer.bytes_used() <= buffer.capacity());
            assert!(buffer.len() <= buffer.packet_capacity());

            // The packet just added reads back unchanged.
            let mut newest = None;
            let mut retained = 0;
            let mut bytes = 0;
            let mut last_pts = i64::MIN;
            for chunk in buffer.iter_from(buffer.tail) {
                assert!(chunk.info.pts_us > last_pts);
                last_pts = chunk.info.pts_us;
                retained += 1;
                bytes += chunk.data.len();
                newest = Some(chunk);
            }
            assert_eq!(retained, buffer.len());
            assert_eq!(bytes, buffer.bytes_used());
            let newest = newest.unwrap();
            assert_eq!(&*newest.data, &data[..]);
            assert_eq!(newest.info.pts_us, pts);

            if let Some(first) = buffer.first_index() {
                assert!(buffer.info(first).unwrap().is_key_frame());
            }
        }
    }
}
