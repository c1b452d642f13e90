//! Reversible shortening of asset uuids.
//!
//! A canonical uuid (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, lowercase hex)
//! keeps a short hex prefix and packs every following group of three hex
//! digits into two base64 characters: 22 characters in the minimal form,
//! 23 otherwise. A sub-asset suffix (`@...`) is carried over untouched.
//! Anything that is not a uuid passes through both directions unchanged.

const BASE64_KEYS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";
const INVALID: u8 = 0xff;

/// Base64 character to 6-bit value; the table the loader needs to expand ids.
const BASE64_VALUES: [u8; 128] = build_decode_table();

const fn build_decode_table() -> [u8; 128] {
    let mut table = [INVALID; 128];
    let mut i = 0;
    while i < 64 {
        table[BASE64_KEYS[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const UUID_LEN: usize = 36;
const MIN_RESERVED: usize = 2;
const RESERVED: usize = 5;

fn hex_value(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some(u32::from(c - b'0')),
        b'a'..=b'f' => Some(u32::from(c - b'a' + 10)),
        _ => None,
    }
}

fn split_suffix(id: &str) -> (&str, &str) {
    match id.find('@') {
        Some(at) => id.split_at(at),
        None => (id, ""),
    }
}

/// Whether `id` is a canonical lowercase uuid, ignoring any `@` suffix.
pub fn is_uuid(id: &str) -> bool {
    let (main, _) = split_suffix(id);
    let bytes = main.as_bytes();
    bytes.len() == UUID_LEN
        && bytes.iter().enumerate().all(|(i, &c)| match i {
            8 | 13 | 18 | 23 => c == b'-',
            _ => hex_value(c).is_some(),
        })
}

pub fn compress_uuid(id: &str, min: bool) -> String {
    if !is_uuid(id) {
        return id.to_string();
    }
    let (main, suffix) = split_suffix(id);
    let hex: Vec<u8> = main.bytes().filter(|&c| c != b'-').collect();
    let reserved = if min { MIN_RESERVED } else { RESERVED };

    let mut out = String::with_capacity(reserved + (hex.len() - reserved) / 3 * 2 + suffix.len());
    out.extend(hex[..reserved].iter().map(|&c| c as char));
    for group in hex[reserved..].chunks(3) {
        let value = group
            .iter()
            .filter_map(|&c| hex_value(c))
            .fold(0u32, |acc, v| (acc << 4) | v);
        out.push(BASE64_KEYS[(value >> 6) as usize] as char);
        out.push(BASE64_KEYS[(value & 0x3f) as usize] as char);
    }
    out.push_str(suffix);
    out
}

pub fn decompress_uuid(token: &str) -> String {
    let (main, suffix) = split_suffix(token);
    let reserved = match main.len() {
        22 => MIN_RESERVED,
        23 => RESERVED,
        _ => return token.to_string(),
    };
    match expand(main.as_bytes(), reserved) {
        Some(hex) => {
            let mut out = String::with_capacity(UUID_LEN + suffix.len());
            for (i, c) in hex.iter().enumerate() {
                if matches!(i, 8 | 12 | 16 | 20) {
                    out.push('-');
                }
                out.push(*c as char);
            }
            out.push_str(suffix);
            out
        }
        None => token.to_string(),
    }
}

fn expand(token: &[u8], reserved: usize) -> Option<Vec<u8>> {
    let (head, body) = token.split_at(reserved);
    if head.iter().any(|&c| hex_value(c).is_none()) {
        return None;
    }
    let mut hex = head.to_vec();
    for pair in body.chunks(2) {
        let decode = |c: u8| -> Option<u32> {
            let value = *BASE64_VALUES.get(c as usize)?;
            (value != INVALID).then_some(u32::from(value))
        };
        let value = (decode(pair[0])? << 6) | decode(pair[1])?;
        hex.push(HEX_DIGITS[(value >> 8) as usize]);
        hex.push(HEX_DIGITS[((value >> 4) & 0xf) as usize]);
        hex.push(HEX_DIGITS[(value & 0xf) as usize]);
    }
    Some(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "fcmR3XADNLgJ1ByKhqcC5Z";
    const SAMPLE_UUID: &str = "fc991dd7-0033-4b80-9d41-c8a86a702e59";

    #[test]
    fn test_known_compression() {
        assert_eq!(compress_uuid(SAMPLE_UUID, true), SAMPLE);
        assert_eq!(decompress_uuid(SAMPLE), SAMPLE_UUID);
    }

    #[test]
    fn test_round_trip_both_forms() {
        for uuid in [
            SAMPLE_UUID,
            "00000000-0000-0000-0000-000000000000",
            "ffffffff-ffff-ffff-ffff-ffffffffffff",
            "0123abcd-4567-89ef-0123-456789abcdef",
        ] {
            let short = compress_uuid(uuid, true);
            assert_eq!(short.len(), 22);
            assert_eq!(decompress_uuid(&short), uuid);
            let long = compress_uuid(uuid, false);
            assert_eq!(long.len(), 23);
            assert_eq!(decompress_uuid(&long), uuid);
        }
    }

    #[test]
    fn test_sub_asset_suffix_is_kept() {
        let id = format!("{SAMPLE_UUID}@f9941");
        let short = compress_uuid(&id, true);
        assert!(short.ends_with("@f9941"));
        assert_eq!(decompress_uuid(&short), id);
    }

    #[test]
    fn test_non_uuid_passes_through() {
        assert_eq!(compress_uuid("db://assets/a.png", true), "db://assets/a.png");
        assert_eq!(compress_uuid("FC991DD7-0033-4B80-9D41-C8A86A702E59", true).len(), 36);
        assert_eq!(decompress_uuid("short"), "short");
        assert_eq!(decompress_uuid("!!!!!!!!!!!!!!!!!!!!!!"), "!!!!!!!!!!!!!!!!!!!!!!");
    }

    #[test]
    fn test_is_uuid() {
        assert!(is_uuid(SAMPLE_UUID));
        assert!(!is_uuid(SAMPLE));
        assert!(!is_uuid("fc991dd7x0033-4b80-9d41-c8a86a702e59"));
    }
}
