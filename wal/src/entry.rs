//! On-disk encoding for a single WAL record.
//!
//! Layout: `magic(4) | version(1) | type_len(2) | data_len(4) | type_bytes |
//! data_bytes | crc32(4)`, where the CRC covers everything after the magic.

pub const MAGIC: [u8; 4] = *b"AWAL";
pub const VERSION: u8 = 1;

/// Maximum encoded type-name length (§3: "type (string ≤ 64 KiB)").
pub const MAX_TYPE_LEN: usize = 64 * 1024;
/// Maximum payload length (§3: "payload (byte string ≤ 4 GiB)").
pub const MAX_DATA_LEN: u64 = 4 * 1024 * 1024 * 1024;

/// A decoded WAL record plus the dense position assigned to it by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub position: u64,
    pub entry_type: String,
    pub payload: Vec<u8>,
}

/// Outcome of attempting to decode one entry from a byte buffer.
pub enum Decoded<'a> {
    /// A full, CRC-verified entry, plus the number of bytes it consumed.
    Entry {
        entry_type: String,
        payload: &'a [u8],
        consumed: usize,
    },
    /// Fewer bytes are available than the header/body requires: a torn
    /// write. The caller should truncate the segment here, not treat it as
    /// corruption.
    Partial,
}

/// Errors are only `Corrupt`-classified failures (bad magic/version/CRC);
/// truncated input is reported via [`Decoded::Partial`] instead of an error.
pub fn encode(entry_type: &str, payload: &[u8]) -> Result<Vec<u8>, String> {
    if entry_type.len() > MAX_TYPE_LEN {
        return Err(format!("entry type exceeds {MAX_TYPE_LEN} bytes"));
    }
    if payload.len() as u64 > MAX_DATA_LEN {
        return Err(format!("payload exceeds {MAX_DATA_LEN} bytes"));
    }

    let type_bytes = entry_type.as_bytes();
    let mut body = Vec::with_capacity(1 + 2 + 4 + type_bytes.len() + payload.len());
    body.push(VERSION);
    body.extend_from_slice(&(type_bytes.len() as u16).to_le_bytes());
    body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    body.extend_from_slice(type_bytes);
    body.extend_from_slice(payload);

    let crc = crc32fast::hash(&body);

    let mut out = Vec::with_capacity(MAGIC.len() + body.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Attempts to decode a single entry from the front of `buf`.
///
/// Returns `Err` only for a genuinely corrupt record (bad magic, version, or
/// CRC) once enough bytes to identify it as such are present. Returns
/// `Ok(Decoded::Partial)` when `buf` simply does not yet contain a full
/// record (including the case where `buf` is shorter than the fixed header).
pub fn decode(buf: &[u8]) -> Result<Decoded<'_>, String> {
    const FIXED_HEADER: usize = MAGIC.len() + 1 + 2 + 4;
    if buf.len() < FIXED_HEADER {
        return Ok(Decoded::Partial);
    }

    if buf[0..4] != MAGIC {
        return Err("bad magic".to_string());
    }
    let version = buf[4];
    if version != VERSION {
        return Err(format!("unsupported version {version}"));
    }

    let type_len = u16::from_le_bytes([buf[5], buf[6]]) as usize;
    let data_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;

    let total = FIXED_HEADER + type_len + data_len + 4;
    if buf.len() < total {
        return Ok(Decoded::Partial);
    }

    let body_start = MAGIC.len();
    let body_end = total - 4;
    let body = &buf[body_start..body_end];
    let expected_crc = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err("crc mismatch".to_string());
    }

    let type_start = FIXED_HEADER;
    let type_end = type_start + type_len;
    let entry_type = String::from_utf8(buf[type_start..type_end].to_vec())
        .map_err(|e| format!("entry type is not valid utf-8: {e}"))?;
    let payload = &buf[type_end..type_end + data_len];

    Ok(Decoded::Entry {
        entry_type,
        payload,
        consumed: total,
    })
}
