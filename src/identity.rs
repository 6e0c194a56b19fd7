/// Server suffix of a fully-qualified chat address.
pub const TRANSPORT_SUFFIX: &str = "@s.whatsapp.net";

/// Extracts the bare numeric identifier from a chat address.
///
/// Addresses arrive either fully qualified (`91805...@s.whatsapp.net`) or as
/// a device-suffixed form (`91849...:12`). Splits on `@` when present,
/// otherwise on `:`, and returns the prefix. Total: an empty input yields an
/// empty string, a plain number is returned unchanged.
pub fn to_bare(addr: &str) -> String {
    let delimiter = if addr.contains('@') { '@' } else { ':' };
    addr.split(delimiter).next().unwrap_or_default().to_string()
}

/// Converts a bare identifier (`918050992006`) into its fully-qualified
/// address form (`918050992006@s.whatsapp.net`).
pub fn to_qualified(bare: &str) -> String {
    format!("{bare}{TRANSPORT_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_from_qualified_address() {
        assert_eq!(to_bare("918050992006@s.whatsapp.net"), "918050992006");
    }

    #[test]
    fn bare_from_device_suffixed_address() {
        assert_eq!(to_bare("918496952149:12"), "918496952149");
    }

    #[test]
    fn bare_from_plain_number() {
        assert_eq!(to_bare("918050992006"), "918050992006");
    }

    #[test]
    fn bare_from_empty_string() {
        assert_eq!(to_bare(""), "");
    }

    #[test]
    fn qualified_appends_suffix() {
        assert_eq!(to_qualified("918050992006"), "918050992006@s.whatsapp.net");
        assert_eq!(to_qualified(""), "@s.whatsapp.net");
    }

    #[test]
    fn round_trip_is_lossless() {
        for bare in ["918050992006", "15551234567", "4915791234567"] {
            assert_eq!(to_bare(&to_qualified(bare)), bare);
        }
    }

    #[test]
    fn to_bare_is_idempotent() {
        let once = to_bare("918496952149:12@s.whatsapp.net");
        assert_eq!(to_bare(&once), once);
    }
}
