//! Link layer: Ethernet II protocol
//!
//! Diagram at <https://en.wikipedia.org/wiki/Ethernet_frame#Ethernet_II>
//!
//! Besides the frame codec, this module carries the stack's receive
//! entry points: [`NetStack::poll`] asks the driver for one frame and
//! drives it through the full decode pipeline, and `ethernet_out` is the
//! single funnel every transmit path ends in.

use crate::buf::FrameBuf;
use crate::stack::NetStack;
use crate::{enum_with_unknown, Error, MacAddr};
use crate::{Clock, Driver};

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

/// Largest payload an Ethernet II frame may carry, in bytes.
pub const ETHERNET_MAX_TRANSPORT_UNIT: usize = 1500;

/// Smallest payload an Ethernet II frame may carry; shorter payloads are
/// zero-padded up to this size before transmission.
pub const ETHERNET_MIN_TRANSPORT_UNIT: usize = 46;

/// Length of the Ethernet II header: two MAC addresses and the EtherType.
pub const ETHERNET_HEADER_LEN: usize = 14;

const_assert!(EthernetHeader::BYTE_LEN == ETHERNET_HEADER_LEN);

/// Header for Ethernet II frame like
///
/// value [0:5] dst macaddr  ([0xFF_u8; 6] for broadcast)
///
/// value [6:11] src macaddr
///
/// value [12:13] ethertype
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Destination MAC address
    pub dst_macaddr: MacAddr,
    /// Source MAC address
    pub src_macaddr: MacAddr,
    /// Tag identifying the payload protocol
    pub ethertype: EtherType,
}

impl EthernetHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

enum_with_unknown! {
    /// EtherType tag values (incomplete list - there are many more not implemented here)
    ///
    /// See <https://en.wikipedia.org/wiki/EtherType>
    pub enum EtherType(u16) {
        /// IPV4
        IpV4 = 0x0800,
        /// ARP
        Arp = 0x0806,
        /// VLAN - if this tag is encountered, then this is not the real ethertype field, and we're reading an 802.1Q VLAN tag instead
        Vlan = 0x8100,
        /// IPV6
        IpV6 = 0x86DD,
    }
}

impl ByteStructLen for EtherType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for EtherType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        EtherType::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = u16::from(*self).to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl<D, C> NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    /// Ask the driver for one frame and, if one is pending, run it
    /// through the full receive pipeline synchronously - all the way to
    /// the user's datagram handler.
    ///
    /// Returns whether a frame was processed, so a host can drain a burst
    /// with `while stack.poll()? {}` before going back to sleep.
    pub fn poll(&mut self) -> Result<bool, Error> {
        let mut scratch = [0_u8; ETHERNET_HEADER_LEN + ETHERNET_MAX_TRANSPORT_UNIT + 4];
        let received = self.driver.recv(&mut scratch)?;
        if received == 0 {
            return Ok(false);
        }
        let mut frame = FrameBuf::from_frame(&scratch[0..received])?;
        self.ethernet_in(&mut frame)?;
        Ok(true)
    }

    /// Decode one received frame and demux on its EtherType.
    ///
    /// Runts shorter than the header are dropped, as are tags with no
    /// registered layer above (VLAN, IPv6, and anything unknown).
    pub(crate) fn ethernet_in(&mut self, buf: &mut FrameBuf) -> Result<(), Error> {
        if buf.len() < ETHERNET_HEADER_LEN {
            return Ok(());
        }
        let header = EthernetHeader::read_bytes(buf.payload());
        buf.pull_header(ETHERNET_HEADER_LEN)?;

        match header.ethertype {
            EtherType::Arp => self.arp_in(buf),
            EtherType::IpV4 => self.ip_in(buf),
            _ => Ok(()),
        }
    }

    /// Frame a payload and hand it to the driver.
    ///
    /// Payloads below [`ETHERNET_MIN_TRANSPORT_UNIT`] are zero-padded up
    /// to it first; the interface MAC is written as the source address.
    pub(crate) fn ethernet_out(
        &mut self,
        buf: &mut FrameBuf,
        dst_macaddr: MacAddr,
        ethertype: EtherType,
    ) -> Result<(), Error> {
        if buf.len() < ETHERNET_MIN_TRANSPORT_UNIT {
            buf.pad(ETHERNET_MIN_TRANSPORT_UNIT - buf.len())?;
        }
        let header = EthernetHeader {
            dst_macaddr,
            src_macaddr: self.mac,
            ethertype,
        };
        header.write_bytes(buf.push_header(ETHERNET_HEADER_LEN)?);
        self.driver.send(buf.payload())
    }
}
