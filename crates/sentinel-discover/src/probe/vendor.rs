//! Placeholder vendor tags from hardware address prefixes.

/// Deterministic vendor tag from the first two octets of a MAC address.
///
/// No OUI database is consulted: `AA:BB:CC:..` becomes `Vendor-AABB`.
/// Addresses with fewer than three octets give `UnknownVendor`; an empty
/// address gives `None`.
pub fn vendor_from_hardware_address(mac: &str) -> Option<String> {
    let mac = mac.trim();
    if mac.is_empty() {
        return None;
    }

    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() < 3 {
        return Some("UnknownVendor".to_string());
    }
    Some(format!(
        "Vendor-{}{}",
        octets[0].to_uppercase(),
        octets[1].to_uppercase()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_from_colon_mac() {
        assert_eq!(
            vendor_from_hardware_address("aa:bb:cc:dd:ee:ff").as_deref(),
            Some("Vendor-AABB")
        );
    }

    #[test]
    fn test_vendor_from_dash_mac() {
        assert_eq!(
            vendor_from_hardware_address("00-1A-2B-3C-4D-5E").as_deref(),
            Some("Vendor-001A")
        );
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            vendor_from_hardware_address("aa:bb").as_deref(),
            Some("UnknownVendor")
        );
    }

    #[test]
    fn test_empty_address() {
        assert_eq!(vendor_from_hardware_address(""), None);
        assert_eq!(vendor_from_hardware_address("   "), None);
    }
}
