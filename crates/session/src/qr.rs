//! QR rendering and LAN address selection for the pairing payload.

use std::net::{IpAddr, Ipv4Addr};

use qrcode::QrCode;
use qrcode::render::unicode;

use crate::SessionError;

/// Renders `text` as a terminal QR code using half-height blocks.
pub fn render_qr(text: &str) -> Result<String, SessionError> {
    let code = QrCode::new(text.as_bytes()).map_err(|e| SessionError::Qr(e.to_string()))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// First IPv4 address other devices on the LAN can reach.
pub fn local_lan_address() -> Option<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs().ok()?;
    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if is_lan_candidate(ip) => Some(ip),
            _ => None,
        })
}

/// Skips loopback, link-local (169.254/16) and unspecified addresses.
fn is_lan_candidate(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback() || ip.is_link_local() || ip.is_unspecified())
}
