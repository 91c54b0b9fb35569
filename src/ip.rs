//! Internet layer: Internet Protocol per IETF-RFC-791
//!
//! <https://en.wikipedia.org/wiki/IPv4>
//!
//! The receive path validates a header in place (length, version,
//! checksum, destination) and demuxes on the protocol field; a protocol
//! nobody handles draws an ICMP protocol-unreachable carrying the
//! original header. The transmit path slices datagrams larger than the
//! path MTU into fragments, each checksummed and resolved through ARP
//! independently. Receive-side reassembly is deliberately absent: a
//! fragmented inbound datagram is dispatched as-is, truncated.

use crate::buf::{FrameBuf, TxBuf};
use crate::icmp::UnreachableCode;
use crate::stack::NetStack;
use crate::{calc_ip_checksum, calc_ip_checksum_finalize, calc_ip_checksum_incomplete};
use crate::{enum_with_unknown, Error, IpV4Addr};
use crate::{Clock, Driver};

use byte_struct::*;
use modular_bitfield::prelude::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

/// Length of an IPv4 header without options.
pub const IPV4_HEADER_LEN: usize = 20;

/// Largest header the 4-bit IHL field can describe (15 words).
pub const IPV4_MAX_HEADER_LEN: usize = 60;

/// Time-to-live stamped on every transmitted packet.
pub const IP_DEFAULT_TTL: u8 = 64;

/// Bytes of transport payload per fragment: the Ethernet MTU less the
/// option-free IPv4 header. Must stay divisible by 8 because the wire
/// encodes fragment offsets in 8-byte units.
pub const IP_FRAGMENT_STRIDE: usize = 1480;

const_assert!(IpV4Header::BYTE_LEN == IPV4_HEADER_LEN);
const_assert!(IP_FRAGMENT_STRIDE % 8 == 0);
const_assert!(IP_FRAGMENT_STRIDE + IPV4_HEADER_LEN == crate::enet::ETHERNET_MAX_TRANSPORT_UNIT);

/// Version (always 4) and header length in 32-bit words, packed into the
/// first header byte. `header_length` occupies the low-order nibble.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VersionAndHeaderLength {
    /// Header length in 32-bit words; 5 when no options are present
    pub header_length: B4,
    /// Always 4
    pub version: B4,
}

impl core::fmt::Debug for VersionAndHeaderLength {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "VersionAndHeaderLength {{ version: {}, header_length: {} }}",
            self.version(),
            self.header_length()
        )
    }
}

impl ByteStructLen for VersionAndHeaderLength {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for VersionAndHeaderLength {
    fn read_bytes(bytes: &[u8]) -> Self {
        VersionAndHeaderLength::from_bytes([bytes[0]])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.into_bytes()[0];
    }
}

/// Flags and fragment offset, packed into the third header word. The
/// offset counts 8-byte units from the start of the original datagram;
/// `more_fragments` is set on every fragment except the last.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fragmentation {
    /// Position of this fragment's payload in 8-byte units
    pub offset: B13,
    /// Set when further fragments follow this one
    pub more_fragments: bool,
    /// Set by senders that refuse fragmentation
    pub do_not_fragment: bool,
    /// Reserved, always zero
    pub reserved: B1,
}

impl core::fmt::Debug for Fragmentation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Fragmentation {{ offset: {}, more_fragments: {}, do_not_fragment: {} }}",
            self.offset(),
            self.more_fragments(),
            self.do_not_fragment()
        )
    }
}

impl Default for Fragmentation {
    fn default() -> Self {
        Fragmentation::new()
    }
}

impl ByteStructLen for Fragmentation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for Fragmentation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
        Fragmentation::from_bytes(raw.to_le_bytes())
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let raw = u16::from_le_bytes(self.into_bytes());
        let be = raw.to_be_bytes();
        bytes[0] = be[0];
        bytes[1] = be[1];
    }
}

/// IPV4 header per IETF-RFC-791
///
/// first 32-bit word
///
/// value [0] Version [4 bits], Header Length [4 bits]
///
/// value [1] Type-of-Service/IP Precedence/DSCP
///
/// value [2:3] Total Length [u16] in bytes
///
/// second 32-bit word
///
/// value [4:5] Identification [u16]
///
/// value [6:7] Flags [3 bits], Fragmentation Offset [13 bits]
///
/// third 32-bit word
///
/// value [8] Time-to-Live
///
/// value [9] Protocol
///
/// value [10:11] Checksum [u16]
///
/// fourth 32-bit word
///
/// value [12:15] Source IP Address
///
/// fifth 32-bit word
///
/// value [16:19] Destination IP Address
#[derive(ByteStruct, Clone, Debug)]
#[byte_struct_be]
pub struct IpV4Header {
    /// Version and header length
    pub version_and_length: VersionAndHeaderLength,
    /// Type-of-service
    pub dscp: DSCP,
    /// Length of header and data in bytes
    pub total_length: u16,
    /// Tag tying the fragments of one datagram together
    pub identification: u16,
    /// Flags and fragment offset
    pub fragmentation: Fragmentation,
    /// Remaining hop count; decremented by each router
    pub time_to_live: u8,
    /// Transport protocol carried in the payload
    pub protocol: Protocol,
    /// One's-complement checksum over the header
    pub checksum: u16,
    /// Source IP address
    pub src_ipaddr: IpV4Addr,
    /// Destination IP address
    pub dst_ipaddr: IpV4Addr,
}

impl IpV4Header {
    /// Length of byte representation
    pub const BYTE_LEN: usize = 20;

    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

enum_with_unknown! {
    /// Common choices of transport-layer protocols and their IP header values.
    /// There are many more protocols not listed here.
    /// See <https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers>.
    pub enum Protocol(u8) {
        /// Internet Control Message Protocol
        Icmp = 0x01,
        /// Transmission Control Protocol
        Tcp = 0x06,
        /// User Datagram Protocol
        Udp = 0x11,
    }
}

impl ByteStructLen for Protocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Protocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        Protocol::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

impl Protocol {
    fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        u8::from(*self).to_be_bytes()
    }
}

/// Type-of-Service for networks with differentiated services.
/// See <https://en.wikipedia.org/wiki/Differentiated_services>.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DSCP {
    /// Standard is almost always fine
    Standard = 0,
    /// Realtime is rarely used
    Realtime = 32 << 2,
    /// Catch-all for the many other kinds or invalid bit patterns
    Unimplemented,
}

impl ByteStructLen for DSCP {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DSCP {
    fn read_bytes(bytes: &[u8]) -> Self {
        return match bytes[0] {
            x if x == (DSCP::Standard as u8) => DSCP::Standard,
            x if x == (DSCP::Realtime as u8) => DSCP::Realtime,
            _ => DSCP::Unimplemented,
        };
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

impl DSCP {
    fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u8).to_be_bytes()
    }
}

impl<D, C> NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    /// Validate one received IP packet and demux on its protocol field.
    ///
    /// Packets that are short, not version 4, inconsistent about their
    /// length, corrupted, or addressed elsewhere are dropped without
    /// comment. Link-layer padding past `total_length` is trimmed before
    /// the payload is handed up. When no layer above claims the protocol
    /// (or UDP finds no bound port), the original header is restored over
    /// the payload and an ICMP unreachable goes back to the sender.
    pub(crate) fn ip_in(&mut self, buf: &mut FrameBuf) -> Result<(), Error> {
        if buf.len() < IPV4_HEADER_LEN {
            return Ok(());
        }
        let header = IpV4Header::read_bytes(buf.payload());
        if header.version_and_length.version() != 4 {
            return Ok(());
        }
        let header_len = header.version_and_length.header_length() as usize * 4;
        if header_len < IPV4_HEADER_LEN || header_len > buf.len() {
            return Ok(());
        }
        let total_length = header.total_length as usize;
        if total_length > buf.len() || total_length < header_len {
            return Ok(());
        }

        // Verify the checksum by summing around the stored field
        {
            let bytes = buf.payload();
            let sum = calc_ip_checksum_incomplete(&bytes[0..10])
                + calc_ip_checksum_incomplete(&bytes[12..header_len]);
            if calc_ip_checksum_finalize(sum) != header.checksum {
                return Ok(());
            }
        }

        if header.dst_ipaddr != self.ip {
            // Not ours; this stack does not forward
            return Ok(());
        }

        // Trim link-layer padding so upper layers see the datagram alone
        if total_length < buf.len() {
            buf.trim(buf.len() - total_length)?;
        }

        // Keep the header bytes for the unreachable path; the full IHL*4
        // span, options included
        let mut original_header = [0_u8; IPV4_MAX_HEADER_LEN];
        original_header[0..header_len].copy_from_slice(&buf.payload()[0..header_len]);
        buf.pull_header(header_len)?;

        let verdict = match header.protocol {
            Protocol::Icmp => {
                self.icmp_in(buf, header.src_ipaddr)?;
                None
            }
            Protocol::Udp => self.udp_in(buf, header.src_ipaddr)?,
            _ => Some(UnreachableCode::Protocol),
        };

        if let Some(code) = verdict {
            // Put the original header back in front of the payload and
            // quote the result back at the sender
            buf.push_header(header_len)?
                .copy_from_slice(&original_header[0..header_len]);
            self.icmp_unreachable(buf, header.src_ipaddr, code)?;
        }
        Ok(())
    }

    /// Send one transport datagram to `dst_ipaddr`, fragmenting as
    /// needed.
    ///
    /// Every call consumes one identification value, shared by all
    /// fragments of the datagram. Payloads within [`IP_FRAGMENT_STRIDE`]
    /// go out as a single unfragmented packet; anything larger is sliced
    /// into full-stride fragments emitted in increasing-offset order,
    /// with `more_fragments` set on all but the last.
    pub(crate) fn ip_out(
        &mut self,
        buf: &TxBuf,
        dst_ipaddr: IpV4Addr,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let identification = self.ident;
        self.ident = self.ident.wrapping_add(1);

        let payload = buf.payload();
        if payload.len() <= IP_FRAGMENT_STRIDE {
            let mut fragment = FrameBuf::new();
            fragment.append(payload)?;
            return self.ip_fragment_out(&mut fragment, dst_ipaddr, protocol, identification, 0, false);
        }

        let mut offset = 0_usize;
        while offset < payload.len() {
            let end = usize::min(offset + IP_FRAGMENT_STRIDE, payload.len());
            let mut fragment = FrameBuf::new();
            fragment.append(&payload[offset..end])?;
            self.ip_fragment_out(
                &mut fragment,
                dst_ipaddr,
                protocol,
                identification,
                offset as u16,
                end < payload.len(),
            )?;
            offset = end;
        }
        Ok(())
    }

    /// Prepend and checksum the header for one fragment (or one whole
    /// unfragmented packet), then hand the result to the ARP resolver for
    /// layer-2 delivery. `offset` is in bytes and must be a multiple of
    /// 8; the wire carries it in 8-byte units.
    pub(crate) fn ip_fragment_out(
        &mut self,
        buf: &mut FrameBuf,
        dst_ipaddr: IpV4Addr,
        protocol: Protocol,
        identification: u16,
        offset: u16,
        more_fragments: bool,
    ) -> Result<(), Error> {
        let header = IpV4Header {
            version_and_length: VersionAndHeaderLength::new()
                .with_version(4)
                .with_header_length((IPV4_HEADER_LEN / 4) as u8),
            dscp: DSCP::Standard,
            total_length: (buf.len() + IPV4_HEADER_LEN) as u16,
            identification,
            fragmentation: Fragmentation::new()
                .with_offset(offset / 8)
                .with_more_fragments(more_fragments),
            time_to_live: IP_DEFAULT_TTL,
            protocol,
            checksum: 0,
            src_ipaddr: self.ip,
            dst_ipaddr,
        };
        header.write_bytes(buf.push_header(IPV4_HEADER_LEN)?);

        let checksum = calc_ip_checksum(&buf.payload()[0..IPV4_HEADER_LEN]);
        buf.payload_mut()[10..12].copy_from_slice(&checksum.to_be_bytes());

        self.arp_out(buf, dst_ipaddr)
    }
}
