//! A no-std, panic-never, heapless UDP/IP stack for bare-metal and
//! user-space hosts with a raw packet driver.
//!
//! Unlike a frame builder, this crate keeps the state a live network
//! endpoint needs: an ARP cache with a pending-send queue, a UDP port
//! table, and the IP identification counter. All of it lives in one owned
//! [`NetStack`] value; forward progress is driven by calling
//! [`NetStack::poll`] from the host's main loop. There is no allocator,
//! no locking, and no background task: every receive and transmit path
//! runs synchronously inside the call that triggered it.
//!
//! The host supplies two things: a [`Driver`] that moves raw Ethernet
//! frames, and a [`Clock`] that reports monotonic seconds for cache
//! expiry.
//!
//! ```rust
//! use catmint::*;
//!
//! /// A driver with nothing on the wire.
//! struct Idle;
//!
//! impl Driver for Idle {
//!     fn recv(&mut self, _frame: &mut [u8]) -> Result<usize, Error> {
//!         Ok(0)
//!     }
//!     fn send(&mut self, _frame: &[u8]) -> Result<(), Error> {
//!         Ok(())
//!     }
//! }
//!
//! /// A clock frozen at second zero.
//! struct Epoch;
//!
//! impl Clock for Epoch {
//!     fn now(&self) -> u32 {
//!         0
//!     }
//! }
//!
//! fn on_datagram(_stack: &mut NetStack<Idle, Epoch>, data: &[u8], _src: IpV4Addr, _port: u16) {
//!     assert!(!data.is_empty());
//! }
//!
//! let mut stack = NetStack::new(
//!     Idle,
//!     Epoch,
//!     IpV4Addr::new([10, 0, 0, 120]),
//!     MacAddr::new([0x02, 0xAF, 0xFF, 0x1A, 0xE5, 0x3C]),
//! );
//!
//! stack.udp_open(60000, on_datagram).unwrap();
//! stack.udp_send(b"hello", 60000, IpV4Addr::new([10, 0, 0, 121]), 8125).unwrap();
//! assert!(!stack.poll().unwrap()); // nothing inbound
//! ```

#![no_std]
#![allow(dead_code)]
#![deny(missing_docs)]

#[cfg(feature = "panic_never")]
use panic_never as _;

pub use byte_struct::{ByteStruct, ByteStructLen};
pub use modular_bitfield;
pub use ufmt::{derive::uDebug, uDebug, uDisplay, uWrite};

pub mod buf; // Byte buffers with reserved header room
pub mod enet; // Link layer
pub mod ip; // Internet layer
pub mod map; // Keyed storage with per-entry expiry
pub mod udp; // Transport layer

pub mod arp; // Address Resolution Protocol - not a distinct layer (between link and transport), but required for IP and UDP to function on most networks.
pub mod icmp; // Internet Control Message Protocol - echo service and error signalling for the IP layer.
pub mod stack; // The stateful engine tying the layers together.

pub use arp::*;
pub use buf::*;
pub use enet::*;
pub use icmp::*;
pub use ip::*;
pub use map::*;
pub use stack::*;
pub use udp::*;

/// Standard 6-byte MAC address.
/// Split 24/24 format, Block ID | Device ID .
/// Locally-administered addresses are [0x02, ...], [0x06, ...], [0x0A, ...], [0x0E, ...]
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);
}

/// IPV4 address as bytes
pub type IpV4Addr = ByteArray<4>;

impl IpV4Addr {
    /// New from bytes
    pub fn new(v: [u8; 4]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: IpV4Addr = ByteArray([0xFF_u8; 4]);

    /// Any address (all zeroes)
    pub const ANY: IpV4Addr = ByteArray([0x0_u8; 4]);
}

/// Newtype for [u8; N] in order to be able to implement traits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        for i in 0..N {
            bytes[i] = self.0[i];
        }
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl uDebug for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 4] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 6] as uDebug>::fmt(&self.0, f)
    }
}

/// Dotted-decimal rendering, `10.0.0.120`
impl uDisplay for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        ufmt::uwrite!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Colon-hex rendering, `02:af:ff:1a:e5:3c`
impl uDisplay for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        for (i, x) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_char(':')?;
            }
            f.write_char(HEX[(x >> 4) as usize] as char)?;
            f.write_char(HEX[(x & 0xF) as usize] as char)?;
        }
        Ok(())
    }
}

/// Failure modes surfaced by the transmit paths and the user API.
///
/// Receive-side malformation is never an error: frames that fail
/// validation are dropped silently, as expected on a shared medium.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum Error {
    /// A header prepend ran out of reserved room at the front of a buffer
    NoHeadroom,
    /// A payload write ran past the end of a buffer
    NoRoom,
    /// An operation consumed more bytes than the buffer holds
    Truncated,
    /// A fixed-capacity table has no free slot
    TableFull,
    /// The packet driver rejected a frame
    Driver,
}

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, uDebug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Calculate IP checksum per IETF-RFC-768
/// following implementation guide in IETF-RFC-1071 section 4.1 .
/// See <https://datatracker.ietf.org/doc/html/rfc1071#section-4> .
pub fn calc_ip_checksum(data: &[u8]) -> u16 {
    // Partial calc
    let sum = calc_ip_checksum_incomplete(data);
    // Fold and flip
    let checksum = calc_ip_checksum_finalize(sum);

    checksum
}

/// Finalize an IP checksum by folding the accumulator from a [u32]
/// to a [u16] and taking the one's complement
pub fn calc_ip_checksum_finalize(sum: u32) -> u16 {
    // Copy to avoid mutating the input, which may be used for something else
    // since some checksums relate to overlapping data
    let mut sum = sum;

    // Fold 32-bit accumulator into 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    // Convert to u16 and take bitwise complement
    let checksum = !(sum as u16);

    checksum
}

/// Calculate an IP checksum on incomplete data
/// returning the unfolded accumulator as [u32]
///
/// This is a slowish method by about a factor of 2-4.
/// It would be faster to cast pairs of bytes to u16,
/// but this method avoids generating panic branches in slice operations.
///
/// A span handed to this function must start on an even wire offset so
/// that high/low byte pairing lines up with the 16-bit wire words.
pub fn calc_ip_checksum_incomplete(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut i: usize = 0;

    for x in data {
        if i % 2 == 0 {
            sum += (*x as u32) << 8;
        } else {
            sum += *x as u32;
        };

        i += 1;
    }

    sum
}

/// Accumulate the 12-byte pseudo-header used by the UDP (and TCP)
/// checksum: source address, destination address, a zero byte, the
/// protocol number, and the transport-segment length.
pub fn calc_pseudo_header_sum(
    src_ipaddr: IpV4Addr,
    dst_ipaddr: IpV4Addr,
    protocol: crate::ip::Protocol,
    length: u16,
) -> u32 {
    let mut pseudo = [0_u8; 12];
    pseudo[0..4].copy_from_slice(&src_ipaddr.0);
    pseudo[4..8].copy_from_slice(&dst_ipaddr.0);
    pseudo[9] = u8::from(protocol);
    pseudo[10..12].copy_from_slice(&length.to_be_bytes());

    calc_ip_checksum_incomplete(&pseudo)
}
