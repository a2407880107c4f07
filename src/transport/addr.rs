//! `host:port` parsing.

use crate::error::AddressError;

/// Split `addr` into host and port.
///
/// Accepts `host:port` and `[ipv6]:port`. The brackets are removed from the
/// returned host. The port must be a decimal number in `0..=65535` and the
/// host must be non-empty.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), AddressError> {
    let err = |kind: fn(String) -> AddressError| kind(addr.to_string());

    let colon = addr.rfind(':').ok_or_else(|| err(AddressError::MissingPort))?;

    let (host, host_start, host_end) = if addr.starts_with('[') {
        let end = addr.find(']').ok_or_else(|| err(AddressError::MissingBracket))?;
        if end + 1 == addr.len() {
            return Err(err(AddressError::MissingPort));
        }
        if end + 1 != colon {
            return Err(if addr.as_bytes()[end + 1] == b':' {
                err(AddressError::TooManyColons)
            } else {
                err(AddressError::MissingPort)
            });
        }
        (&addr[1..end], 1, end + 1)
    } else {
        let host = &addr[..colon];
        if host.contains(':') {
            return Err(err(AddressError::TooManyColons));
        }
        (host, 0, 0)
    };

    if addr[host_start..].contains('[') || addr[host_end..].contains(']') {
        return Err(err(AddressError::UnexpectedBracket));
    }

    let port = &addr[colon + 1..];
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(AddressError::InvalidPort));
    }
    let port = port.parse().map_err(|_| err(AddressError::InvalidPort))?;

    if host.is_empty() {
        return Err(err(AddressError::MissingHost));
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_valid_addresses() {
        assert_eq!(split_host_port("example.com:443"), Ok(("example.com", 443)));
        assert_eq!(split_host_port("127.0.0.1:8080"), Ok(("127.0.0.1", 8080)));
        assert_eq!(split_host_port("[::1]:443"), Ok(("::1", 443)));
        assert_eq!(split_host_port("[fe80::1%en0]:0"), Ok(("fe80::1%en0", 0)));
    }

    #[test]
    fn test_split_errors() {
        let cases: &[(&str, fn(String) -> AddressError)] = &[
            ("example.com", AddressError::MissingPort),
            ("[::1]", AddressError::MissingPort),
            ("[::1]x:443", AddressError::MissingPort),
            ("::1:443", AddressError::TooManyColons),
            ("[::1]:80:443", AddressError::TooManyColons),
            ("[::1:443", AddressError::MissingBracket),
            ("a[b:443", AddressError::UnexpectedBracket),
            ("a]b:443", AddressError::UnexpectedBracket),
            ("example.com:", AddressError::InvalidPort),
            ("example.com:https", AddressError::InvalidPort),
            ("example.com:65536", AddressError::InvalidPort),
            (":443", AddressError::MissingHost),
            ("[]:443", AddressError::MissingHost),
        ];
        for (addr, kind) in cases {
            assert_eq!(split_host_port(addr), Err(kind(addr.to_string())), "{addr}");
        }
    }
}
