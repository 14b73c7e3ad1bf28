//! Interface discovery.

use pcap::Device;

use super::SniffError;

/// Pseudo-devices libpcap lists on Linux that are not real interfaces worth
/// tapping (or would double-count traffic, like `any`).
const PSEUDO_DEVICE_PREFIXES: &[&str] = &["any", "nflog", "nfqueue", "dbus", "usbmon", "bluetooth"];

/// Names of network interfaces a capture handle can be bound to.
pub fn detect_interfaces() -> Result<Vec<String>, SniffError> {
    let devices = Device::list().map_err(|source| SniffError::DeviceList { source })?;
    Ok(devices
        .into_iter()
        .map(|d| d.name)
        .filter(|name| {
            !PSEUDO_DEVICE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .collect())
}
