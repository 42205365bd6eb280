use std::net::Ipv4Addr;

use sha2::{Digest, Sha256};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HOSTNAME_PREFIX: &str = "Lumen";
pub const AP_SSID_PREFIX: &str = "Lumen_";
pub const AP_NET_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const AP_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const AP_GATEWAY: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

const DEVICE_ID_LEN: usize = 6;

/// Six upper-case hex characters derived from the hardware address, stable
/// across reboots and factory resets.
pub fn device_id_from_mac(mac: &str) -> String {
    let hash = Sha256::digest(mac.as_bytes());
    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash {
        use core::fmt::Write as _;
        let _ = write!(&mut hex, "{byte:02X}");
    }
    hex.split_off(hex.len() - DEVICE_ID_LEN)
}

pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn hostname(device_id: &str) -> String {
    format!("{HOSTNAME_PREFIX}{device_id}")
}

pub fn ap_ssid(device_id: &str) -> String {
    format!("{AP_SSID_PREFIX}{device_id}")
}
