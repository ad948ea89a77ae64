//! Raw HCI socket scan source.
//!
//! Scans for BLE advertisements over raw Linux HCI sockets without the BlueZ
//! daemon. Requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or root
//! privileges.

use super::{SCAN_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent, events_from_ad_data};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

const SOL_HCI: c_int = 0;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Turn a negative libc return value into a [`ScanError`] naming `what`.
fn check(ret: isize, what: &str) -> Result<isize, ScanError> {
    if ret < 0 {
        Err(ScanError::Bluetooth(format!(
            "{what}: {}",
            io::Error::last_os_error()
        )))
    } else {
        Ok(ret)
    }
}

/// The raw bytes of a packed command parameter struct.
fn param_bytes<T>(params: &T) -> &[u8] {
    // SAFETY: only used with the repr(C, packed) command structs above, which
    // have no padding.
    unsafe { std::slice::from_raw_parts(params as *const T as *const u8, mem::size_of::<T>()) }
}

/// Open a non-blocking raw HCI socket bound to device `dev_id`.
fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    check(fd as isize, "Failed to create HCI socket")?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    check(ret as isize, "Failed to bind HCI socket")?;

    Ok(fd)
}

/// Only let LE meta events through to `fd`.
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    check(ret as isize, "Failed to set HCI filter").map(drop)
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    check(ret, "Failed to send HCI command").map(drop)
}

/// Configure passive LE scanning and enable it.
fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    // interval and window in 0.625 ms units; equal values scan continuously
    let params = LeSetScanParametersCmd {
        scan_type: LE_SCAN_PASSIVE,
        interval: 0x0010,
        window: 0x0010,
        own_address_type: LE_PUBLIC_ADDRESS,
        filter_policy: FILTER_POLICY_ACCEPT_ALL,
    };
    send_hci_command(fd, OCF_LE_SET_SCAN_PARAMETERS, param_bytes(&params))?;
    set_scan_enable(fd, true)
}

/// Turn LE scanning on or off
fn set_scan_enable(fd: &OwnedFd, on: bool) -> Result<(), ScanError> {
    let enable = LeSetScanEnableCmd {
        enable: u8::from(on),
        filter_dup: 0x00, // Every sighting counts towards RSSI
    };
    send_hci_command(fd, OCF_LE_SET_SCAN_ENABLE, param_bytes(&enable))
}

/// Parse an LE advertising report event into scan events.
///
/// `packet` is the full HCI event packet including the packet type byte.
/// Each report is `event_type, addr_type, addr[6], len, data[len], rssi`;
/// parsing stops at the first report that does not fit.
fn parse_advertising_report(packet: &[u8]) -> Vec<ScanEvent> {
    let mut events = Vec::new();

    // packet type, event code, parameter length, subevent
    let Some(report) = packet.get(4..) else {
        return events;
    };
    let Some((&num_reports, mut rest)) = report.split_first() else {
        return events;
    };

    for _ in 0..num_reports {
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        let data_len = rest[8] as usize;

        let Some(ad_data) = rest.get(9..9 + data_len) else {
            break;
        };
        let Some(&rssi) = rest.get(9 + data_len) else {
            break;
        };

        let device = MacAddress::from_le_bytes(addr).to_string();
        events.extend(events_from_ad_data(ad_data, &device, rssi as i8, packet));
        rest = &rest[10 + data_len..];
    }

    events
}

/// Start scanning for advertisements using raw HCI sockets.
///
/// Opens a raw HCI socket on hci0, enables passive LE scanning and forwards
/// every manufacturer or service data structure as a [`ScanEvent`]. When
/// `stop` is cancelled scanning is disabled, both sockets are closed and the
/// returned channel closes.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(stop: CancellationToken) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let fd = open_hci_socket(0)?;
    set_hci_filter(&fd)?;

    // Commands go over their own socket so the event filter stays intact
    let cmd_fd = open_hci_socket(0)?;
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let mut buf = [0u8; 258]; // Max HCI event size

        'outer: loop {
            let mut guard = tokio::select! {
                _ = stop.cancelled() => break,
                ready = async_fd.readable() => match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(error = %e, "HCI socket failed");
                        break;
                    }
                },
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) | Ok(Err(_)) => break,
                    Err(_would_block) => break,
                };

                if n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT
                {
                    for event in parse_advertising_report(&buf[..n]) {
                        if tx.send(event).await.is_err() {
                            debug!("Scan event receiver dropped");
                            break 'outer;
                        }
                    }
                }
            }
        }

        if let Err(e) = set_scan_enable(&cmd_fd, false) {
            warn!(error = %e, "Failed to disable LE scan");
        }
        info!("HCI scan stopped");
        // sockets close when async_fd and cmd_fd drop here
    });

    Ok(rx)
}
