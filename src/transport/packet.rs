//! SPI packet framing and deframing (C1).
//!
//! Wire format: `STX(0x02) | LEN | TYPE | DATA[LEN] | CHECKSUM`, where
//! `CHECKSUM = (256 - (STX + LEN + TYPE + sum(DATA))) mod 256`, so the
//! unsigned sum of every byte of a valid packet is `0 mod 256`.

use crate::error::TransportError;

const STX: u8 = 0x02;

/// A decoded reply: the declared type code and the payload bytes (the frame
/// envelope already stripped).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: u8,
    pub data: Vec<u8>,
}

/// Frames `packet_type` and `data` into the byte-exact wire format.
///
/// # Errors
/// Returns [`TransportError::LengthOutOfRange`] if `data` exceeds 255 bytes.
pub fn encode(packet_type: u8, data: &[u8]) -> Result<Vec<u8>, TransportError> {
    if data.len() > 255 {
        return Err(TransportError::LengthOutOfRange(data.len()));
    }
    let len = data.len() as u8;
    let mut sum: u32 = STX as u32 + len as u32 + packet_type as u32;
    for &b in data {
        sum += b as u32;
    }
    let checksum = (256u32.wrapping_sub(sum % 256) % 256) as u8;

    let mut out = Vec::with_capacity(4 + data.len());
    out.push(STX);
    out.push(len);
    out.push(packet_type);
    out.extend_from_slice(data);
    out.push(checksum);
    Ok(out)
}

/// Decodes a complete framed packet from `bytes`, which must contain exactly
/// one packet (no leading garbage, no trailing bytes).
///
/// # Errors
/// Returns [`TransportError::InvalidFraming`] if the first byte isn't STX,
/// [`TransportError::LengthOutOfRange`] if the declared length doesn't match
/// the buffer, or [`TransportError::ChecksumMismatch`] on a bad checksum.
pub fn decode(bytes: &[u8]) -> Result<Packet, TransportError> {
    if bytes.first() != Some(&STX) {
        return Err(TransportError::InvalidFraming);
    }
    let len = *bytes.get(1).ok_or(TransportError::InvalidFraming)? as usize;
    let expected_total = 4 + len;
    if bytes.len() != expected_total {
        return Err(TransportError::LengthOutOfRange(len));
    }
    let packet_type = bytes[2];
    let data = &bytes[3..3 + len];
    let checksum = bytes[3 + len];

    let mut sum: u32 = STX as u32 + len as u32 + packet_type as u32;
    for &b in data {
        sum += b as u32;
    }
    sum += checksum as u32;
    if sum % 256 != 0 {
        return Err(TransportError::ChecksumMismatch);
    }

    Ok(Packet {
        packet_type,
        data: data.to_vec(),
    })
}

/// Scans `buf` for an STX byte followed by a complete, checksum-valid
/// packet, returning the packet and the number of bytes consumed. Used by
/// the reader loop, which does not know in advance where the reply starts.
pub fn find_and_decode(buf: &[u8]) -> Result<(Packet, usize), TransportError> {
    let start = buf
        .iter()
        .position(|&b| b == STX)
        .ok_or(TransportError::InvalidFraming)?;
    let rest = &buf[start..];
    let len = *rest.get(1).ok_or(TransportError::InvalidFraming)? as usize;
    let total = 4 + len;
    if rest.len() < total {
        return Err(TransportError::InvalidFraming);
    }
    let packet = decode(&rest[..total])?;
    Ok((packet, start + total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_closure() {
        for len in [0usize, 1, 5, 255] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let packet_type = 3u8;
            let encoded = encode(packet_type, &data).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded.packet_type, packet_type);
            assert_eq!(decoded.data, data);

            let sum: u32 = encoded.iter().map(|&b| b as u32).sum();
            assert_eq!(sum % 256, 0);
        }
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let encoded = encode(2, &[1, 2, 3, 4]).unwrap();
        for i in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[i] ^= 0xFF;
            let result = decode(&corrupted);
            assert!(result.is_err(), "byte {i} corruption went undetected");
        }
    }

    #[test]
    fn test_length_out_of_range_on_encode() {
        let data = vec![0u8; 256];
        assert_eq!(encode(1, &data), Err(TransportError::LengthOutOfRange(256)));
    }

    #[test]
    fn test_invalid_framing_without_stx() {
        assert_eq!(decode(&[0x01, 0, 0, 0]), Err(TransportError::InvalidFraming));
    }

    #[test]
    fn test_find_and_decode_skips_leading_garbage() {
        let mut buf = vec![0xFF, 0xAA];
        buf.extend(encode(5, &[9, 9]).unwrap());
        let (packet, consumed) = find_and_decode(&buf).unwrap();
        assert_eq!(packet.packet_type, 5);
        assert_eq!(packet.data, vec![9, 9]);
        assert_eq!(consumed, buf.len());
    }
}
