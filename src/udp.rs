//! Transport layer: User Datagram Protocol
//!
//! <https://en.wikipedia.org/wiki/User_Datagram_Protocol>
//!
//! Delivery is keyed on the destination port: the host binds a handler
//! function with [`NetStack::udp_open`], and every datagram arriving for
//! that port is handed to it with the payload, source address, and source
//! port. A datagram for an unbound port is answered with ICMP
//! port-unreachable. Handlers receive the stack itself, so an echo
//! service can transmit its reply from inside the callback.

use crate::buf::{FrameBuf, TxBuf};
use crate::icmp::UnreachableCode;
use crate::ip::Protocol;
use crate::stack::NetStack;
use crate::{calc_ip_checksum_finalize, calc_ip_checksum_incomplete, calc_pseudo_header_sum};
use crate::{Error, IpV4Addr};
use crate::{Clock, Driver};

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

/// Length of the UDP header.
pub const UDP_HEADER_LEN: usize = 8;

const_assert!(UdpHeader::BYTE_LEN == UDP_HEADER_LEN);

/// Bound-port handler: receives the stack, the datagram payload, and the
/// sender's address and port. Plain function pointers keep the port table
/// heapless; state a handler needs beyond the stack must live in statics
/// or flow through the wire.
pub type UdpHandler<D, C> = fn(&mut NetStack<D, C>, &[u8], IpV4Addr, u16);

/// UDP datagram header structure like
///
/// value [0:1] source port [u16]
///
/// value [2:3] destination port [u16]
///
/// value [4:5] total length in bytes [u16], header + data
///
/// value [6:7] checksum [u16]
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Total frame length including header and data
    pub length: u16,
    /// Checksum over the pseudo-header and datagram; zero when the sender
    /// opted out
    pub checksum: u16,
}

impl UdpHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

impl<D, C> NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    /// Handle one received UDP datagram.
    ///
    /// Returns the unreachable code the IP layer should answer with when
    /// no handler is bound to the destination port; in that case the
    /// buffer is left positioned at the UDP header so the caller can
    /// restore the IP header above it and quote the datagram.
    pub(crate) fn udp_in(
        &mut self,
        buf: &mut FrameBuf,
        src_ipaddr: IpV4Addr,
    ) -> Result<Option<UnreachableCode>, Error> {
        if buf.len() < UDP_HEADER_LEN {
            return Ok(None);
        }
        let header = UdpHeader::read_bytes(buf.payload());
        let datagram_len = header.length as usize;
        if datagram_len < UDP_HEADER_LEN || datagram_len > buf.len() {
            return Ok(None);
        }

        // An all-zero stored checksum means the sender skipped it
        // (permitted by IETF-RFC-768); anything else must verify.
        if header.checksum != 0 {
            let datagram = &buf.payload()[0..datagram_len];
            let sum = calc_pseudo_header_sum(src_ipaddr, self.ip, Protocol::Udp, header.length)
                + calc_ip_checksum_incomplete(&datagram[0..6])
                + calc_ip_checksum_incomplete(&datagram[8..]);
            let computed = calc_ip_checksum_finalize(sum);
            let matches = computed == header.checksum
                // A computed zero is transmitted as all ones
                || (computed == 0 && header.checksum == 0xFFFF);
            if !matches {
                return Ok(None);
            }
        }

        let now = self.clock.now();
        let handler = match self.udp_ports.get(&header.dst_port, now).copied() {
            Some(handler) => handler,
            None => return Ok(Some(UnreachableCode::Port)),
        };

        buf.pull_header(UDP_HEADER_LEN)?;
        let payload_len = datagram_len - UDP_HEADER_LEN;
        handler(
            self,
            &buf.payload()[0..payload_len],
            src_ipaddr,
            header.src_port,
        );
        Ok(None)
    }

    /// Wrap the buffer's payload in a UDP header and send it via IP.
    pub(crate) fn udp_out(
        &mut self,
        buf: &mut TxBuf,
        src_port: u16,
        dst_ipaddr: IpV4Addr,
        dst_port: u16,
    ) -> Result<(), Error> {
        let length = (buf.len() + UDP_HEADER_LEN) as u16;
        let header = UdpHeader {
            src_port,
            dst_port,
            length,
            checksum: 0,
        };
        header.write_bytes(buf.push_header(UDP_HEADER_LEN)?);

        // Checksum with the stored field still zero
        let sum = calc_pseudo_header_sum(self.ip, dst_ipaddr, Protocol::Udp, length)
            + calc_ip_checksum_incomplete(&buf.payload()[0..6])
            + calc_ip_checksum_incomplete(&buf.payload()[8..]);
        let mut checksum = calc_ip_checksum_finalize(sum);
        if checksum == 0 {
            // IETF-RFC-768: a transmitted zero means "no checksum"
            checksum = 0xFFFF;
        }
        buf.payload_mut()[6..8].copy_from_slice(&checksum.to_be_bytes());

        self.ip_out(buf, dst_ipaddr, Protocol::Udp)
    }

    /// Bind `handler` to `port`, replacing any previous binding.
    ///
    /// Fails with [`Error::TableFull`] when the port table is out of
    /// slots.
    pub fn udp_open(&mut self, port: u16, handler: UdpHandler<D, C>) -> Result<(), Error> {
        let now = self.clock.now();
        self.udp_ports.set(port, handler, now)
    }

    /// Release `port`; datagrams for it will draw port-unreachable again.
    pub fn udp_close(&mut self, port: u16) {
        self.udp_ports.remove(&port);
    }

    /// Send `data` as one UDP datagram from `src_port` to
    /// `dst_ipaddr:dst_port`.
    ///
    /// The call completes encoding, fragmentation, ARP resolution, and
    /// driver submission before returning. When the destination's MAC
    /// address is still unknown, the datagram is parked in the ARP
    /// pending queue and goes out during a later [`NetStack::poll`] once
    /// the reply arrives - the call still returns `Ok`.
    pub fn udp_send(
        &mut self,
        data: &[u8],
        src_port: u16,
        dst_ipaddr: IpV4Addr,
        dst_port: u16,
    ) -> Result<(), Error> {
        let mut buf = TxBuf::new();
        buf.append(data)?;
        self.udp_out(&mut buf, src_port, dst_ipaddr, dst_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a header and make sure the parser returns the same values
    /// from the wire bytes
    #[test]
    fn test_serialization_loop() -> () {
        let header = UdpHeader {
            src_port: 8123,
            dst_port: 8125,
            length: 13,
            checksum: 0xABCD,
        };
        let bytes = header.to_be_bytes();
        assert_eq!(bytes, [0x1F, 0xBB, 0x1F, 0xBD, 0x00, 0x0D, 0xAB, 0xCD]);

        let parsed = UdpHeader::read_bytes(&bytes);
        assert_eq!(parsed, header);
    }
}
