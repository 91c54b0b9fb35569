//! The stateful stack engine: one owned value holding the interface
//! identity, the driver, the clock, and every table the protocol layers
//! share.
//!
//! The layer logic lives with its wire formats - Ethernet in
//! [`crate::enet`], ARP in [`crate::arp`], IP in [`crate::ip`], and so on
//! - as `impl` blocks on [`NetStack`]. Collecting the state here keeps
//! the call graph acyclic even though the layers call both up and down
//! (ARP hands resolved frames back to Ethernet, UDP errors surface
//! through ICMP via IP).
//!
//! Everything runs on the caller's execution context: the host calls
//! [`NetStack::poll`] from its main loop and each frame is decoded,
//! dispatched, and answered before the call returns. There is no
//! locking because there is nothing concurrent; a host that wants the
//! stack on several threads must wrap the whole value in a mutex.

use crate::buf::FrameBuf;
use crate::map::ExpiringMap;
use crate::udp::UdpHandler;
use crate::{Error, IpV4Addr, MacAddr};

/// Seconds a learned ARP mapping stays usable before a fresh exchange is
/// required.
pub const ARP_TIMEOUT_SEC: u32 = 60;

/// Minimum seconds between ARP request broadcasts for one unresolved
/// address. Also the lifetime of a parked datagram waiting on that
/// address.
pub const ARP_MIN_INTERVAL: u32 = 1;

/// Peers the ARP cache can hold at once.
pub const ARP_CACHE_SLOTS: usize = 32;

/// Unresolved destinations that can each hold one parked datagram.
pub const ARP_PENDING_SLOTS: usize = 8;

/// UDP ports that can be bound at once.
pub const UDP_PORT_SLOTS: usize = 16;

/// Raw frame transport consumed by the stack.
///
/// Any packet source/sink works: a NIC driver, a TAP device, a pcap
/// handle, a test double. Opening and closing the device is the host's
/// concern; the stack only moves frames.
pub trait Driver {
    /// Fetch one frame into `frame`, returning its length, or `Ok(0)`
    /// when none is pending. Must not block.
    fn recv(&mut self, frame: &mut [u8]) -> Result<usize, Error>;

    /// Submit one complete frame for transmission.
    fn send(&mut self, frame: &[u8]) -> Result<(), Error>;
}

/// Monotonic time source feeding the expiring tables.
///
/// Seconds from any fixed starting point - a tick counter divided down
/// works fine. Resolution coarser than a second only stretches the
/// cache lifetimes, it never breaks correctness.
pub trait Clock {
    /// Monotonic seconds since an arbitrary epoch
    fn now(&self) -> u32;
}

/// A user-space IPv4 endpoint: Ethernet framing, ARP resolution, IP
/// fragmentation, ICMP echo, and UDP delivery over a raw packet driver.
///
/// Construct one per interface with [`NetStack::new`], bind ports with
/// [`NetStack::udp_open`], and call [`NetStack::poll`] from the main
/// loop. See the [crate documentation](crate) for a complete example.
pub struct NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    pub(crate) driver: D,
    pub(crate) clock: C,
    /// This interface's IP address
    pub(crate) ip: IpV4Addr,
    /// This interface's MAC address
    pub(crate) mac: MacAddr,
    /// Learned peer mappings, IP -> MAC
    pub(crate) arp_cache: ExpiringMap<IpV4Addr, MacAddr, ARP_CACHE_SLOTS>,
    /// One parked datagram per unresolved destination
    pub(crate) arp_pending: ExpiringMap<IpV4Addr, FrameBuf, ARP_PENDING_SLOTS>,
    /// Bound UDP ports
    pub(crate) udp_ports: ExpiringMap<u16, UdpHandler<D, C>, UDP_PORT_SLOTS>,
    /// Next IP identification value; wraps at 16 bits
    pub(crate) ident: u16,
}

impl<D, C> NetStack<D, C>
where
    D: Driver,
    C: Clock,
{
    /// Bring up a stack on `driver` with the given interface identity.
    ///
    /// One gratuitous ARP request for our own address is broadcast
    /// immediately, announcing the interface and seeding the caches of
    /// peers that are listening. The announce is best-effort: a driver
    /// that is not ready yet only costs us the introduction.
    pub fn new(driver: D, clock: C, ip: IpV4Addr, mac: MacAddr) -> Self {
        let mut stack = NetStack {
            driver,
            clock,
            ip,
            mac,
            arp_cache: ExpiringMap::new(ARP_TIMEOUT_SEC),
            arp_pending: ExpiringMap::new(ARP_MIN_INTERVAL),
            udp_ports: ExpiringMap::new(0),
            ident: 0,
        };
        let _ = stack.arp_request(ip);
        stack
    }

    /// This interface's IP address.
    pub fn ip(&self) -> IpV4Addr {
        self.ip
    }

    /// This interface's MAC address.
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// The packet driver, for host-side housekeeping.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
