//! Address Resolution Protocol implementation with generation of requests and responses to received requests.
//!
//! ARP is not a distinct network abstraction layer, but is still required for most networks to function
//! because peers on an IPv4 segment address each other by MAC address at layer 2,
//! so an outbound IP datagram cannot leave the interface until the destination's MAC address is known.
//!
//! The resolver keeps two tables. The *cache* maps peer IP addresses to
//! their MAC addresses and is refreshed by every valid ARP message that
//! arrives, request or reply - gratuitous learning keeps chatter down on
//! a stable segment. The *pending queue* holds at most one outbound IP
//! datagram per unresolved destination; the datagram is released the
//! moment a reply teaches us the peer's MAC address. The pending entry's
//! short time-to-live doubles as the rate limit on re-requests: while an
//! entry is live, further datagrams to the same destination are dropped
//! rather than triggering another broadcast.
//!
//! On a statically-addressed network this is a noisy process only during
//! initialization: the stack announces itself with one gratuitous request
//! at startup, and steady-state traffic refreshes the cache for free.

use crate::buf::FrameBuf;
use crate::enet::EtherType;
use crate::stack::NetStack;
use crate::{enum_with_unknown, Error, IpV4Addr, MacAddr};
use crate::{Clock, Driver};

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;
use ufmt::{uwriteln, uWrite};

/// ARP hardware type for ethernet
pub const ARP_HW_ETHERNET: u16 = 1;

const_assert!(ArpPayload::BYTE_LEN == 28); // The ARP message proper; ethernet_out pads the frame to the minimum payload

/// An ARP request or response with IPV4 addresses and standard MAC addresses.
/// Assumes 6-byte standard MAC addresses and 4-byte IPV4 addresses.
/// See <https://en.wikipedia.org/wiki/Address_Resolution_Protocol> .
///
/// Hardware type is 1 for ethernet.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[byte_struct_be]
pub struct ArpPayload {
    /// Hardware type (1 for ethernet)
    pub htype: u16,
    /// Protocol type (same as ethertype from ethernet header)
    pub ptype: ProtocolType,
    /// Hardware address length (6 for standard MAC)
    pub hlen: u8,
    /// Protocol address length (4 for IPV4)
    pub plen: u8,
    /// ARP operation type
    pub operation: ArpOperation,
    /// Source MAC address
    pub src_mac: MacAddr,
    /// Source IP address
    pub src_ipaddr: IpV4Addr,
    /// Destination MAC address
    pub dst_mac: MacAddr,
    /// Destination IP address
    pub dst_ipaddr: IpV4Addr,
}

impl ArpPayload {
    /// Create a new ARP payload for IPV4 on ethernet
    pub fn new(
        src_mac: MacAddr,
        src_ipaddr: IpV4Addr,
        dst_mac: MacAddr,
        dst_ipaddr: IpV4Addr,
        operation: ArpOperation,
    ) -> Self {
        ArpPayload {
            htype: ARP_HW_ETHERNET, // Always on ethernet
            ptype: ProtocolType::IpV4, // Always resolving an IPV4 address
            hlen: 6,
            plen: 4,
            operation: operation,
            src_mac: src_mac,
            src_ipaddr: src_ipaddr,
            dst_mac: dst_mac,
            dst_ipaddr: dst_ipaddr,
        }
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// ARP request or response flag values
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ArpOperation {
    /// This is a request to confirm target IP address and acquire associated MAC address
    Request = 1,
    /// This is a response to confirm our IP address and provide associated MAC address
    Response = 2,
    /// Invalid operation
    Unimplemented,
}

impl From<u16> for ArpOperation {
    fn from(value: u16) -> Self {
        match value {
            x if x == ArpOperation::Request as u16 => ArpOperation::Request,
            x if x == ArpOperation::Response as u16 => ArpOperation::Response,
            _ => ArpOperation::Unimplemented,
        }
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ArpOperation::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = self.to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ArpOperation {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u16).to_be_bytes()
    }
}

enum_with_unknown! {
    /// Protocol Type flags are the same as EtherType but must be reimplemented to avoid run-time recursion
    ///
    /// See <https://en.wikipedia.org/wiki/EtherType>
    pub enum ProtocolType(u16) {
        /// Internet protocol version 4
        IpV4 = 0x0800,
    }
}

impl ByteStructLen for ProtocolType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ProtocolType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ProtocolType::from(u16::from_be_bytes(bytes_read))
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
    /// Handle one received ARP message.
    ///
    /// Any valid message - request or reply - refreshes the cache with
    /// the sender's mapping. A refreshed mapping releases the pending
    /// datagram queued for that sender, if one exists; otherwise a
    /// request for our own address draws a reply.
    pub(crate) fn arp_in(&mut self, buf: &mut FrameBuf) -> Result<(), Error> {
        if buf.len() < ArpPayload::BYTE_LEN {
            return Ok(());
        }
        let pkt = ArpPayload::read_bytes(buf.payload());
        if pkt.htype != ARP_HW_ETHERNET
            || pkt.ptype != ProtocolType::IpV4
            || pkt.hlen != 6
            || pkt.plen != 4
        {
            return Ok(());
        }
        if pkt.operation == ArpOperation::Unimplemented {
            return Ok(());
        }

        // Learn the sender's mapping unconditionally, requests included
        let now = self.clock.now();
        self.arp_cache.set(pkt.src_ipaddr, pkt.src_mac, now)?;

        if let Some(mut queued) = self.arp_pending.take(&pkt.src_ipaddr, now) {
            // A datagram was parked waiting for exactly this mapping
            self.ethernet_out(&mut queued, pkt.src_mac, EtherType::IpV4)?;
        } else if pkt.operation == ArpOperation::Request && pkt.dst_ipaddr == self.ip {
            self.arp_response(pkt.src_ipaddr, pkt.src_mac)?;
        }
        Ok(())
    }

    /// Send an IP datagram to `dst_ipaddr`, resolving its MAC address
    /// first.
    ///
    /// On a cache hit the frame goes straight out. On a miss the datagram
    /// is deep-copied into the pending queue and a request is broadcast -
    /// unless a request for that address is already in flight, in which
    /// case the datagram is dropped: the pending entry's
    /// [`ARP_MIN_INTERVAL`](crate::stack::ARP_MIN_INTERVAL) lifetime
    /// bounds how often the segment sees a fresh broadcast for the same
    /// address.
    pub(crate) fn arp_out(&mut self, buf: &mut FrameBuf, dst_ipaddr: IpV4Addr) -> Result<(), Error> {
        let now = self.clock.now();
        if let Some(mac) = self.arp_cache.get(&dst_ipaddr, now).copied() {
            return self.ethernet_out(buf, mac, EtherType::IpV4);
        }
        if self.arp_pending.get(&dst_ipaddr, now).is_some() {
            // A request is in flight; one datagram per destination
            return Ok(());
        }
        self.arp_pending.set(dst_ipaddr, buf.clone(), now)?;
        self.arp_request(dst_ipaddr)
    }

    /// Broadcast a request for the MAC address owning `dst_ipaddr`.
    ///
    /// Requesting our own address is the gratuitous announce sent at
    /// startup: it answers nobody but seeds the caches of everyone
    /// listening.
    pub(crate) fn arp_request(&mut self, dst_ipaddr: IpV4Addr) -> Result<(), Error> {
        let pkt = ArpPayload::new(
            self.mac,
            self.ip,
            MacAddr::ANY,
            dst_ipaddr,
            ArpOperation::Request,
        );
        let mut buf = FrameBuf::new();
        buf.append(&pkt.to_be_bytes())?;
        self.ethernet_out(&mut buf, MacAddr::BROADCAST, EtherType::Arp)
    }

    /// Reply to `dst_ipaddr` at `dst_mac` with our own mapping.
    pub(crate) fn arp_response(
        &mut self,
        dst_ipaddr: IpV4Addr,
        dst_mac: MacAddr,
    ) -> Result<(), Error> {
        let pkt = ArpPayload::new(
            self.mac,
            self.ip,
            dst_mac,
            dst_ipaddr,
            ArpOperation::Response,
        );
        let mut buf = FrameBuf::new();
        buf.append(&pkt.to_be_bytes())?;
        self.ethernet_out(&mut buf, dst_mac, EtherType::Arp)
    }

    /// Dump the live ARP cache entries to `w`, one `ip -> mac (age)` line
    /// each.
    pub fn write_arp_table<W>(&self, w: &mut W) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        let now = self.clock.now();
        uwriteln!(w, "=== ARP TABLE BEGIN ===")?;
        for (ipaddr, macaddr, stamp) in self.arp_cache.iter(now) {
            uwriteln!(w, "{} -> {} ({}s)", *ipaddr, *macaddr, now.wrapping_sub(stamp))?;
        }
        uwriteln!(w, "=== ARP TABLE  END  ===")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an ARP message and make sure the parser returns the same values from the input
    #[test]
    fn test_serialization_loop() -> () {
        let msg = ArpPayload::new(
            MacAddr::new([7_u8; 6]),
            IpV4Addr::new([8_u8; 4]),
            MacAddr::new([9_u8; 6]),
            IpV4Addr::new([10_u8; 4]),
            ArpOperation::Request,
        );
        // Serialize
        let bytes: [u8; 28] = msg.to_be_bytes();
        // Deserialize
        let msg_parsed = ArpPayload::read_bytes(&bytes);

        assert_eq!(msg, msg_parsed);
    }

    #[test]
    fn test_wire_layout() -> () {
        let msg = ArpPayload::new(
            MacAddr::new([0x02, 0, 0, 0, 0, 0x01]),
            IpV4Addr::new([10, 0, 0, 1]),
            MacAddr::ANY,
            IpV4Addr::new([10, 0, 0, 2]),
            ArpOperation::Request,
        );
        let bytes = msg.to_be_bytes();
        assert_eq!(&bytes[0..2], &[0x00, 0x01]); // hardware type
        assert_eq!(&bytes[2..4], &[0x08, 0x00]); // protocol type
        assert_eq!(bytes[4], 6); // hardware address length
        assert_eq!(bytes[5], 4); // protocol address length
        assert_eq!(&bytes[6..8], &[0x00, 0x01]); // opcode
        assert_eq!(&bytes[14..18], &[10, 0, 0, 1]); // sender IP
        assert_eq!(&bytes[24..28], &[10, 0, 0, 2]); // target IP
    }
}
