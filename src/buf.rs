//! Packet buffers with reserved header room.
//!
//! A [`PacketBuf`] owns a fixed `[u8; N]` backing store and a pair of
//! cursors delimiting the live payload window:
//!
//! ```text
//! |<-- headroom -->|<-- payload (head..tail) -->|<-- tailroom -->|
//! 0             head                         tail              N
//! ```
//!
//! Transmit paths start with the window collapsed at [`HEADROOM`] and
//! grow it in both directions: payload is appended at the tail, then each
//! layer prepends its header by walking `head` backward. Receive paths
//! start with the frame at offset zero and consume headers by walking
//! `head` forward; the consumed bytes stay in the backing store, so a
//! header can be restored by walking `head` back again (the ICMP
//! destination-unreachable path relies on this).
//!
//! Every cursor move is bounds-checked and returns an [`Error`] instead
//! of wrapping, so a `PacketBuf` can never expose bytes outside its
//! backing store.

use crate::enet::{ETHERNET_HEADER_LEN, ETHERNET_MAX_TRANSPORT_UNIT};
use crate::Error;

use static_assertions::const_assert;

/// Bytes reserved in front of the payload window by [`PacketBuf::new`].
///
/// Covers the full header stack on the transmit path:
/// Ethernet (14) + IPv4 (20) + UDP or ICMP (8), with slack.
pub const HEADROOM: usize = 64;

/// Backing size for one Ethernet frame plus prepend slack.
pub const FRAME_BUF_LEN: usize = HEADROOM + ETHERNET_HEADER_LEN + ETHERNET_MAX_TRANSPORT_UNIT + 4;

/// Backing size for a transport datagram before fragmentation.
pub const TX_BUF_LEN: usize = 4096;

const_assert!(HEADROOM >= ETHERNET_HEADER_LEN + 20 + 8);
const_assert!(TX_BUF_LEN > HEADROOM);

/// A buffer sized for one Ethernet frame: received frames, IP fragments,
/// ARP messages, and the deep copies held in the ARP pending queue.
pub type FrameBuf = PacketBuf<FRAME_BUF_LEN>;

/// A buffer sized for a full transport datagram under construction,
/// before the IP layer slices it into fragments.
pub type TxBuf = PacketBuf<TX_BUF_LEN>;

/// Fixed-capacity byte buffer with a cursor-managed payload window.
///
/// See the [module documentation](self) for the layout and the
/// grow/consume conventions.
#[derive(Clone)]
pub struct PacketBuf<const N: usize> {
    storage: [u8; N],
    head: usize,
    tail: usize,
}

impl<const N: usize> PacketBuf<N> {
    /// An empty transmit buffer with the payload window collapsed at
    /// [`HEADROOM`], leaving room to prepend the full header stack.
    pub fn new() -> Self {
        PacketBuf {
            storage: [0_u8; N],
            head: HEADROOM,
            tail: HEADROOM,
        }
    }

    /// A receive buffer holding a copy of `frame` at offset zero.
    ///
    /// No headroom is reserved: receive paths only consume headers, and
    /// restoring a previously consumed header never reaches in front of
    /// the frame start.
    pub fn from_frame(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() > N {
            return Err(Error::NoRoom);
        }
        let mut buf = PacketBuf {
            storage: [0_u8; N],
            head: 0,
            tail: frame.len(),
        };
        buf.storage[0..frame.len()].copy_from_slice(frame);
        Ok(buf)
    }

    /// Number of bytes in the payload window.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    /// True if the payload window is empty.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// The payload window `storage[head..tail]`.
    pub fn payload(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    /// The payload window, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.tail]
    }

    /// Grow the window backward by `len` bytes to make room for a header,
    /// returning the newly exposed span for the caller to fill.
    ///
    /// Fails with [`Error::NoHeadroom`] when fewer than `len` bytes of
    /// headroom remain.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8], Error> {
        if self.head < len {
            return Err(Error::NoHeadroom);
        }
        self.head -= len;
        Ok(&mut self.storage[self.head..self.head + len])
    }

    /// Consume `len` bytes from the front of the window, returning the
    /// consumed span (the header that was removed).
    ///
    /// The bytes stay in the backing store; a later
    /// [`push_header`](Self::push_header) of the same length exposes them
    /// again.
    pub fn pull_header(&mut self, len: usize) -> Result<&[u8], Error> {
        if len > self.len() {
            return Err(Error::Truncated);
        }
        let consumed = self.head;
        self.head += len;
        Ok(&self.storage[consumed..consumed + len])
    }

    /// Extend the window with `len` zero bytes at the tail.
    pub fn pad(&mut self, len: usize) -> Result<(), Error> {
        let new_tail = self.tail.checked_add(len).ok_or(Error::NoRoom)?;
        if new_tail > N {
            return Err(Error::NoRoom);
        }
        self.storage[self.tail..new_tail].fill(0);
        self.tail = new_tail;
        Ok(())
    }

    /// Shrink the window by `len` bytes at the tail.
    pub fn trim(&mut self, len: usize) -> Result<(), Error> {
        if len > self.len() {
            return Err(Error::Truncated);
        }
        self.tail -= len;
        Ok(())
    }

    /// Copy `src` onto the tail of the window.
    pub fn append(&mut self, src: &[u8]) -> Result<(), Error> {
        let new_tail = self.tail.checked_add(src.len()).ok_or(Error::NoRoom)?;
        if new_tail > N {
            return Err(Error::NoRoom);
        }
        self.storage[self.tail..new_tail].copy_from_slice(src);
        self.tail = new_tail;
        Ok(())
    }
}

impl<const N: usize> Default for PacketBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_window_grows_both_ways() -> () {
        let mut buf = FrameBuf::new();
        assert!(buf.is_empty());

        buf.append(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.payload(), &[1, 2, 3, 4]);

        let header = buf.push_header(2).unwrap();
        header.copy_from_slice(&[9, 9]);
        assert_eq!(buf.payload(), &[9, 9, 1, 2, 3, 4]);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_headroom_is_bounded() -> () {
        let mut buf = FrameBuf::new();
        // The whole reserve can be claimed, but not a byte more
        assert!(buf.push_header(HEADROOM).is_ok());
        assert_eq!(buf.push_header(1), Err(Error::NoHeadroom));
    }

    #[test]
    fn test_pull_then_push_restores_header() -> () {
        let mut buf = FrameBuf::from_frame(&[0xAA, 0xBB, 0xCC, 1, 2, 3]).unwrap();
        let consumed = buf.pull_header(3).unwrap();
        assert_eq!(consumed, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(buf.payload(), &[1, 2, 3]);

        // The consumed bytes are still in the backing store
        let restored = buf.push_header(3).unwrap();
        assert_eq!(restored, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_pull_past_window_fails() -> () {
        let mut buf = FrameBuf::from_frame(&[0_u8; 10]).unwrap();
        assert_eq!(buf.pull_header(11), Err(Error::Truncated));
    }

    #[test]
    fn test_pad_and_trim() -> () {
        let mut buf = FrameBuf::new();
        buf.append(&[7, 7]).unwrap();
        buf.pad(3).unwrap();
        assert_eq!(buf.payload(), &[7, 7, 0, 0, 0]);
        buf.trim(4).unwrap();
        assert_eq!(buf.payload(), &[7]);
        assert_eq!(buf.trim(2), Err(Error::Truncated));
    }

    #[test]
    fn test_from_frame_rejects_oversize() -> () {
        let oversize = [0_u8; FRAME_BUF_LEN + 1];
        assert!(FrameBuf::from_frame(&oversize).is_err());
    }

    #[test]
    fn test_clone_is_deep() -> () {
        let mut buf = FrameBuf::new();
        buf.append(&[1, 2, 3]).unwrap();
        let mut copy = buf.clone();
        copy.payload_mut()[0] = 0xFF;
        assert_eq!(buf.payload(), &[1, 2, 3]);
        assert_eq!(copy.payload(), &[0xFF, 2, 3]);
    }
}
