use byteorder::{ByteOrder, NetworkEndian};
use core::cmp;
use managed::ManagedSlice;

use super::{Empty, Full, RingBuffer};

/// A buffer of whole datagrams, each with a metadata header.
///
/// Payload octets of every datagram live back to back in a byte ring. Their
/// lengths are recorded as 2-octet big-endian words in a second ring, and the
/// header of each datagram (usually the peer endpoint) in a third one. The sum
/// of the recorded lengths never exceeds the octets held by the payload ring.
///
/// Datagrams are consumed in two steps: [`begin_dequeue`] pops the length and
/// header of the front datagram and makes it *current*, after which its payload
/// is drained with [`dequeue_payload`]. Beginning the next datagram discards
/// whatever the application left unread.
///
/// [`begin_dequeue`]: #method.begin_dequeue
/// [`dequeue_payload`]: #method.dequeue_payload
#[derive(Debug)]
pub struct DatagramBuffer<'a, H: 'a> {
    metadata_ring: RingBuffer<'a, H>,
    length_ring: RingBuffer<'a, u8>,
    payload_ring: RingBuffer<'a, u8>,
    /// Unread octets of the current datagram, at the front of `payload_ring`.
    current: usize,
    /// Octets of a datagram being assembled, at the back of `payload_ring`.
    pending: usize,
}

impl<'a, H: Copy> DatagramBuffer<'a, H> {
    /// Create a new datagram buffer with the provided metadata, length and payload storage.
    ///
    /// The length storage holds two octets per datagram, so it should be
    /// twice as long as the metadata storage.
    pub fn new<MS, LS, PS>(metadata_storage: MS, length_storage: LS, payload_storage: PS) -> Self
    where
        MS: Into<ManagedSlice<'a, H>>,
        LS: Into<ManagedSlice<'a, u8>>,
        PS: Into<ManagedSlice<'a, u8>>,
    {
        DatagramBuffer {
            metadata_ring: RingBuffer::new(metadata_storage),
            length_ring: RingBuffer::new(length_storage),
            payload_ring: RingBuffer::new(payload_storage),
            current: 0,
            pending: 0,
        }
    }

    /// Drop every datagram, including the current and the pending one.
    pub fn reset(&mut self) {
        self.metadata_ring.clear();
        self.length_ring.clear();
        self.payload_ring.clear();
        self.current = 0;
        self.pending = 0;
    }

    /// Query whether a datagram of `size` octets would be accepted.
    pub fn can_enqueue(&self, size: usize) -> bool {
        self.metadata_ring.window() >= 1
            && self.length_ring.window() >= 2
            && self.payload_ring.window() >= size
            && size <= u16::MAX as usize
    }

    /// Enqueue a whole datagram.
    ///
    /// Nothing is enqueued unless all three rings have room.
    pub fn enqueue_slice(&mut self, header: H, data: &[u8]) -> Result<(), Full> {
        if self.pending != 0 || !self.can_enqueue(data.len()) {
            return Err(Full);
        }
        self.payload_ring.enqueue_slice(data);
        self.pending = data.len();
        self.commit(header)
    }

    /// Append octets to the datagram being assembled; return the amount appended.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let room = (u16::MAX as usize).saturating_sub(self.pending);
        let size = self.payload_ring.enqueue_slice(&data[..cmp::min(room, data.len())]);
        self.pending += size;
        size
    }

    /// Return the length of the datagram being assembled.
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    /// Finish the datagram being assembled and record it with `header`.
    ///
    /// If there is no room for its length or header, the pending octets are
    /// dropped and `Err(Full)` is returned.
    pub fn commit(&mut self, header: H) -> Result<(), Full> {
        if self.metadata_ring.window() < 1 || self.length_ring.window() < 2 {
            self.abort();
            return Err(Full);
        }
        let mut length = [0; 2];
        NetworkEndian::write_u16(&mut length, self.pending as u16);
        self.length_ring.enqueue_slice(&length);
        self.metadata_ring.enqueue_one(header)?;
        self.pending = 0;
        Ok(())
    }

    /// Drop the datagram being assembled.
    pub fn abort(&mut self) {
        self.payload_ring.unenqueue(self.pending);
        self.pending = 0;
    }

    /// Return the number of complete datagrams that have not been begun yet.
    pub fn packet_count(&self) -> usize {
        self.metadata_ring.len()
    }

    /// Query whether no complete datagram is waiting.
    pub fn is_empty(&self) -> bool {
        self.metadata_ring.is_empty()
    }

    /// Return the number of payload octets held, including the current and pending datagrams.
    pub fn payload_bytes_count(&self) -> usize {
        self.payload_ring.len()
    }

    /// Discard the unread rest of the current datagram, then make the next one
    /// current; return its header and length.
    pub fn begin_dequeue(&mut self) -> Result<(H, usize), Empty> {
        self.discard_current();
        let (header, size) = self.pop_front()?;
        self.current = size;
        Ok((header, size))
    }

    /// Return the number of unread octets of the current datagram.
    pub fn remaining(&self) -> usize {
        self.current
    }

    /// Copy unread octets of the current datagram into `data`; return the amount copied.
    pub fn dequeue_payload(&mut self, data: &mut [u8]) -> usize {
        let size = cmp::min(self.current, data.len());
        let size = self.payload_ring.dequeue_slice(&mut data[..size]);
        self.current -= size;
        size
    }

    /// Return the next unread octet of the current datagram without consuming it.
    pub fn peek_payload(&self) -> Option<u8> {
        if self.current == 0 {
            return None;
        }
        self.payload_ring.peek_one(0)
    }

    /// Drop the unread rest of the current datagram.
    pub fn discard_current(&mut self) {
        self.payload_ring.dequeue_allocated(self.current);
        self.current = 0;
    }

    /// Return the header and length of the next datagram without beginning it.
    pub fn peek_front(&self) -> Result<(H, usize), Empty> {
        let header = self.metadata_ring.peek_one(0).ok_or(Empty)?;
        let mut length = [0; 2];
        if self.length_ring.read_allocated(0, &mut length) != 2 {
            return Err(Empty);
        }
        Ok((header, NetworkEndian::read_u16(&length) as usize))
    }

    /// Copy the payload of the next datagram into `data` without dequeuing it;
    /// return the amount copied.
    pub fn read_front(&self, data: &mut [u8]) -> usize {
        match self.peek_front() {
            Ok((_, size)) => {
                let size = cmp::min(size, data.len());
                self.payload_ring.read_allocated(self.current, &mut data[..size])
            }
            Err(Empty) => 0,
        }
    }

    /// Remove the next datagram entirely, discarding the current one first.
    pub fn drop_front(&mut self) -> Result<(), Empty> {
        self.discard_current();
        let (_, size) = self.pop_front()?;
        self.payload_ring.dequeue_allocated(size);
        Ok(())
    }

    fn pop_front(&mut self) -> Result<(H, usize), Empty> {
        let (header, size) = self.peek_front()?;
        self.metadata_ring.dequeue_one()?;
        self.length_ring.dequeue_allocated(2);
        Ok((header, size))
    }
}
