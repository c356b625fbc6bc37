//! BIP-32 derivation path helpers.

use crate::error::{Error, Result};

pub const HARDENED: u32 = 0x8000_0000;

pub fn harden(index: u32) -> u32 {
    index | HARDENED
}

pub fn is_hardened(value: u32) -> bool {
    value & HARDENED != 0
}

/// Splits a path component into `(index, hardened)`.
pub fn decode_index(value: u32) -> (u32, bool) {
    (value & !HARDENED, is_hardened(value))
}

pub fn encode_index(index: u32, hardened: bool) -> Result<u32> {
    if index & HARDENED != 0 {
        return Err(Error::Codec(format!("path index {index} out of range")));
    }
    Ok(if hardened { harden(index) } else { index })
}

/// Parse a derivation path string like "m/44'/0'/0'/0/0" into a Vec<u32>
pub fn parse_derivation_path(path: &str) -> Result<Vec<u32>> {
    let invalid = |why: &str| Error::Codec(format!("invalid derivation path '{path}': {why}"));

    let rest = path
        .trim()
        .strip_prefix('m')
        .ok_or_else(|| invalid("must start with 'm'"))?;
    if rest.is_empty() {
        return Ok(vec![]);
    }
    let rest = rest.strip_prefix('/').ok_or_else(|| invalid("expected '/' after 'm'"))?;

    rest.split('/')
        .filter(|c| !c.is_empty())
        .map(|component| {
            let (number, hardened) = match component
                .strip_suffix('\'')
                .or_else(|| component.strip_suffix('h'))
                .or_else(|| component.strip_suffix('H'))
            {
                Some(n) => (n, true),
                None => (component, false),
            };
            let index: u32 = number
                .parse()
                .map_err(|_| invalid(&format!("bad component '{component}'")))?;
            encode_index(index, hardened)
        })
        .collect()
}

pub fn format_derivation_path(path: &[u32]) -> String {
    let mut out = String::from("m");
    for &value in path {
        let (index, hardened) = decode_index(value);
        out.push('/');
        out.push_str(&index.to_string());
        if hardened {
            out.push('\'');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_segwit_account() {
        let path = parse_derivation_path("m/84'/0'/0'/0/0").unwrap();
        assert_eq!(path, vec![0x8000_0054, 0x8000_0000, 0x8000_0000, 0, 0]);
        assert_eq!(format_derivation_path(&path), "m/84'/0'/0'/0/0");
    }

    #[test]
    fn hardened_round_trip() {
        for index in [0u32, 1, 44, 84, 0x7fff_ffff] {
            for hardened in [false, true] {
                let encoded = encode_index(index, hardened).unwrap();
                assert_eq!(decode_index(encoded), (index, hardened));
            }
        }
        assert!(encode_index(HARDENED, false).is_err());
    }

    #[test]
    fn accepts_h_suffix_and_bare_m() {
        assert_eq!(parse_derivation_path("m/44h/60H").unwrap(), vec![harden(44), harden(60)]);
        assert!(parse_derivation_path("m").unwrap().is_empty());
        assert!(parse_derivation_path("44'/0'").is_err());
        assert!(parse_derivation_path("m/x").is_err());
        assert!(parse_derivation_path("m/2147483648").is_err());
    }
}
