//! Internet Control Message Protocol: echo service and error signalling
//! for the IP layer.
//!
//! Two duties, both small. Inbound echo requests are answered in place so
//! the host is pingable without registering anything. Outbound
//! destination-unreachable messages are generated on behalf of the IP and
//! UDP receive paths when a datagram arrives for a protocol or port
//! nobody claims; per IETF-RFC-792 the message quotes the original IP
//! header plus the first eight payload bytes, which is enough for the
//! sender to match the error to a socket.

use crate::buf::{FrameBuf, TxBuf};
use crate::ip::{Protocol, IPV4_HEADER_LEN};
use crate::stack::NetStack;
use crate::{calc_ip_checksum, enum_with_unknown, Error, IpV4Addr};
use crate::{Clock, Driver};

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

/// Length of the fixed ICMP header, rest-of-header words included.
pub const ICMP_HEADER_LEN: usize = 8;

/// Bytes of the offending datagram quoted in an unreachable message:
/// the option-free IP header plus eight bytes of payload.
pub const ICMP_UNREACHABLE_QUOTE_LEN: usize = IPV4_HEADER_LEN + 8;

const_assert!(IcmpHeader::BYTE_LEN == ICMP_HEADER_LEN);

/// ICMP message header: type, code, checksum, and the two rest-of-header
/// words, which the echo messages use as identifier and sequence number
/// and the unreachable messages leave zero.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IcmpHeader {
    /// Message type
    pub kind: IcmpType,
    /// Subtype; qualifies `kind`
    pub code: u8,
    /// One's-complement checksum over the whole message
    pub checksum: u16,
    /// Echo identifier (zero for unreachable)
    pub id: u16,
    /// Echo sequence number (zero for unreachable)
    pub seq: u16,
}

impl IcmpHeader {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

enum_with_unknown! {
    /// ICMP message types handled here (many more exist)
    ///
    /// See <https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol>
    pub enum IcmpType(u8) {
        /// Answer to an echo request
        EchoReply = 0,
        /// A datagram could not be delivered
        Unreachable = 3,
        /// Ping
        EchoRequest = 8,
    }
}

impl ByteStructLen for IcmpType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IcmpType {
    fn read_bytes(bytes: &[u8]) -> Self {
        IcmpType::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Destination-unreachable subtypes this stack can generate.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UnreachableCode {
    /// The IP protocol field named a transport nobody handles
    Protocol = 2,
    /// UDP delivered to a port with no bound handler
    Port = 3,
}

impl<D, C> NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    /// Handle one received ICMP message.
    ///
    /// Echo requests are answered with the payload mirrored back and the
    /// identifier and sequence preserved. Everything else - replies to
    /// pings we never sent, errors, timestamps - is accepted silently.
    pub(crate) fn icmp_in(&mut self, buf: &FrameBuf, src_ipaddr: IpV4Addr) -> Result<(), Error> {
        if buf.len() < ICMP_HEADER_LEN {
            return Ok(());
        }
        let header = IcmpHeader::read_bytes(buf.payload());
        if header.kind == IcmpType::EchoRequest {
            self.icmp_echo_reply(buf, src_ipaddr, header)?;
        }
        Ok(())
    }

    /// Mirror an echo request back at its sender.
    fn icmp_echo_reply(
        &mut self,
        request: &FrameBuf,
        src_ipaddr: IpV4Addr,
        request_header: IcmpHeader,
    ) -> Result<(), Error> {
        let mut reply = TxBuf::new();
        reply.append(request.payload())?;

        let header = IcmpHeader {
            kind: IcmpType::EchoReply,
            code: 0,
            checksum: 0,
            id: request_header.id,
            seq: request_header.seq,
        };
        header.write_bytes(&mut reply.payload_mut()[0..ICMP_HEADER_LEN]);

        let checksum = calc_ip_checksum(reply.payload());
        reply.payload_mut()[2..4].copy_from_slice(&checksum.to_be_bytes());

        self.ip_out(&reply, src_ipaddr, Protocol::Icmp)
    }

    /// Tell `src_ipaddr` that its datagram could not be delivered.
    ///
    /// `original` must hold the offending datagram with its IP header in
    /// place; the message quotes the first
    /// [`ICMP_UNREACHABLE_QUOTE_LEN`] bytes of it.
    pub(crate) fn icmp_unreachable(
        &mut self,
        original: &FrameBuf,
        src_ipaddr: IpV4Addr,
        code: UnreachableCode,
    ) -> Result<(), Error> {
        let header = IcmpHeader {
            kind: IcmpType::Unreachable,
            code: code as u8,
            checksum: 0,
            id: 0,
            seq: 0,
        };

        let mut message = TxBuf::new();
        message.append(&header.to_be_bytes())?;
        let quote_len = usize::min(ICMP_UNREACHABLE_QUOTE_LEN, original.len());
        message.append(&original.payload()[0..quote_len])?;

        let checksum = calc_ip_checksum(message.payload());
        message.payload_mut()[2..4].copy_from_slice(&checksum.to_be_bytes());

        self.ip_out(&message, src_ipaddr, Protocol::Icmp)
    }
}
