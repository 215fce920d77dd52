//! Checkpoint file format
//!
//! Layout (little-endian):
//! ```text
//! ┌──────────────────────────────────────┐
//! │ magic: [u8; 4] = "FTCP"              │
//! │ version: u16                         │
//! │ body_len: u16                        │
//! ├──────────────────────────────────────┤
//! │ BODY (body_len bytes)                │
//! │   v1: seconds: i64                   │
//! │       nanos: u32                     │
//! │   later versions may append fields   │
//! ├──────────────────────────────────────┤
//! │ crc: u32 (CRC32 of all prior bytes)  │
//! └──────────────────────────────────────┘
//! ```
//!
//! Instance-wide files left by the previous connector hold Go's binary
//! `time.Time` encoding instead; see [`decode_go_binary`].

use chrono::{DateTime, Utc};

/// Magic bytes for checkpoint file identification
const CHECKPOINT_MAGIC: [u8; 4] = *b"FTCP";

/// Current checkpoint format version
const CHECKPOINT_VERSION: u16 = 1;

const PREFIX_SIZE: usize = 8;
const BODY_V1_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

/// Encode a timestamp as a version 1 checkpoint
pub fn encode(at: &DateTime<Utc>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_SIZE + BODY_V1_SIZE + CRC_SIZE);

    buf.extend_from_slice(&CHECKPOINT_MAGIC);
    buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(BODY_V1_SIZE as u16).to_le_bytes());
    buf.extend_from_slice(&at.timestamp().to_le_bytes());
    buf.extend_from_slice(&at.timestamp_subsec_nanos().to_le_bytes());

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    buf
}

/// Decode a checkpoint written by this or a later format version
pub fn decode(bytes: &[u8]) -> Result<DateTime<Utc>, String> {
    if bytes.len() < PREFIX_SIZE + CRC_SIZE {
        return Err(format!("truncated checkpoint ({} bytes)", bytes.len()));
    }

    if bytes[0..4] != CHECKPOINT_MAGIC {
        return Err(format!("invalid magic: {:?}", &bytes[0..4]));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version == 0 {
        return Err("invalid version 0".to_string());
    }

    let body_len = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
    if bytes.len() != PREFIX_SIZE + body_len + CRC_SIZE {
        return Err(format!(
            "length mismatch: header declares {} body bytes, file holds {}",
            body_len,
            bytes.len().saturating_sub(PREFIX_SIZE + CRC_SIZE)
        ));
    }

    let crc_offset = PREFIX_SIZE + body_len;
    let stored_crc = u32::from_le_bytes([
        bytes[crc_offset],
        bytes[crc_offset + 1],
        bytes[crc_offset + 2],
        bytes[crc_offset + 3],
    ]);
    let computed_crc = crc32fast::hash(&bytes[..crc_offset]);
    if stored_crc != computed_crc {
        return Err(format!(
            "checksum mismatch: stored={}, computed={}",
            stored_crc, computed_crc
        ));
    }

    if body_len < BODY_V1_SIZE {
        return Err(format!("version {} body too short ({} bytes)", version, body_len));
    }

    let body = &bytes[PREFIX_SIZE..crc_offset];
    let mut secs = [0u8; 8];
    secs.copy_from_slice(&body[0..8]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&body[8..12]);

    let secs = i64::from_le_bytes(secs);
    let nanos = u32::from_le_bytes(nanos);

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| format!("timestamp out of range: {}s {}ns", secs, nanos))
}

/// Seconds from 0001-01-01T00:00:00Z to the Unix epoch
const GO_UNIX_TO_INTERNAL: i64 = 62_135_596_800;

/// Decode Go's `time.Time` binary encoding (`MarshalBinary` / `GobEncode`)
///
/// Layout (big-endian): version u8, seconds since 0001-01-01 i64,
/// nanoseconds i32, zone offset in minutes i16 (-1 for UTC). Version 2
/// appends one byte of offset seconds. The offset does not change the
/// instant.
pub fn decode_go_binary(bytes: &[u8]) -> Result<DateTime<Utc>, String> {
    let expected = match bytes.first() {
        Some(1) => 15,
        Some(2) => 16,
        Some(v) => return Err(format!("unsupported Go time encoding version {}", v)),
        None => return Err("empty checkpoint".to_string()),
    };
    if bytes.len() != expected {
        return Err(format!(
            "Go time encoding of {} bytes, expected {}",
            bytes.len(),
            expected
        ));
    }

    let mut secs = [0u8; 8];
    secs.copy_from_slice(&bytes[1..9]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&bytes[9..13]);

    let secs = i64::from_be_bytes(secs)
        .checked_sub(GO_UNIX_TO_INTERNAL)
        .ok_or_else(|| "Go timestamp out of range".to_string())?;
    let nanos = i32::from_be_bytes(nanos);
    let nanos = u32::try_from(nanos).map_err(|_| format!("negative nanoseconds {}", nanos))?;

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| format!("timestamp out of range: {}s {}ns", secs, nanos))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Bytes Go's `time.Time.MarshalBinary` produces for `t`
    pub(crate) fn go_binary(t: DateTime<Utc>, offset_minutes: i16) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&(t.timestamp() + GO_UNIX_TO_INTERNAL).to_be_bytes());
        buf.extend_from_slice(&(t.timestamp_subsec_nanos() as i32).to_be_bytes());
        buf.extend_from_slice(&offset_minutes.to_be_bytes());
        buf
    }

    #[test]
    fn test_go_binary_time() {
        // time.Date(2016, 6, 21, 14, 0, 0, 0, time.UTC).MarshalBinary()
        let bytes = [
            0x01, 0x00, 0x00, 0x00, 0x0e, 0xce, 0xfb, 0x3f, 0x60, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff,
        ];
        let expected = Utc.with_ymd_and_hms(2016, 6, 21, 14, 0, 0).unwrap();
        assert_eq!(decode_go_binary(&bytes).unwrap(), expected);

        let t = expected + chrono::Duration::nanoseconds(449_619_180);
        assert_eq!(decode_go_binary(&go_binary(t, -420)).unwrap(), t);

        let mut v2 = go_binary(t, 60);
        v2[0] = 2;
        v2.push(0);
        assert_eq!(decode_go_binary(&v2).unwrap(), t);
    }

    #[test]
    fn test_go_binary_rejects_damage() {
        let t = Utc.with_ymd_and_hms(2016, 6, 21, 14, 0, 0).unwrap();
        let good = go_binary(t, -1);

        assert!(decode_go_binary(&good[..14]).is_err());
        assert!(decode_go_binary(&[]).is_err());
        assert!(decode_go_binary(&encode(&t)).is_err());

        let mut negative = good.clone();
        negative[9] = 0xff;
        assert!(decode_go_binary(&negative).is_err());
    }

    #[test]
    fn test_round_trip_boundaries() {
        let samples = [
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(-1, 999_999_999).unwrap(),
            Utc.with_ymd_and_hms(2016, 6, 21, 14, 59, 23).unwrap()
                + chrono::Duration::nanoseconds(449_619_180),
            Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
            DateTime::<Utc>::MAX_UTC,
            DateTime::<Utc>::MIN_UTC,
        ];

        for t in samples {
            assert_eq!(decode(&encode(&t)).unwrap(), t, "round trip of {}", t);
        }
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(encode(&Utc::now()).len(), PREFIX_SIZE + BODY_V1_SIZE + CRC_SIZE);
    }

    #[test]
    fn test_newer_version_with_longer_body() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&t.timestamp().to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0xAA; 4]);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        assert_eq!(decode(&buf).unwrap(), t);
    }

    #[test]
    fn test_rejects_damage() {
        let good = encode(&Utc::now());

        let mut flipped = good.clone();
        flipped[10] ^= 0xFF;
        assert!(decode(&flipped).unwrap_err().contains("checksum"));

        assert!(decode(&good[..good.len() - 1]).is_err());
        assert!(decode(b"2016-06-21 07:59:23").is_err());
        assert!(decode(&[]).is_err());
    }
}
