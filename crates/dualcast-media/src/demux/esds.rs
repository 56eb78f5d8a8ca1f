// crates/dualcast-media/src/demux/esds.rs
//
// Standalone extraction of AudioSpecificConfig from an `esds` box's elementary
// stream descriptor hierarchy (spec.md §4.2): tag 0x05 (DecoderSpecificInfo)
// nested inside tag 0x04 (DecoderConfigDescriptor) nested inside tag 0x03
// (ES_Descriptor). `mp4-atom`'s `Esds` atom exposes the decoded
// `dec_specific.profile` for the common AAC case but not the raw config
// bytes the decoder needs verbatim, so this walks the descriptor tags
// directly — the exact byte-level algorithm spec.md §8's boundary case
// tests.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

const ES_DESCR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;
const DEC_SPECIFIC_INFO_TAG: u8 = 0x05;

/// Read one descriptor's tag and expandable-length size (ISO/IEC 14496-1
/// §8.3.3): each length byte's top bit signals "more length bytes follow",
/// the remaining 7 bits accumulate into the size.
fn read_tag_and_length(cursor: &mut Cursor<&[u8]>) -> anyhow::Result<(u8, usize)> {
    let tag = cursor.read_u8()?;
    let mut size: usize = 0;
    for _ in 0..4 {
        let b = cursor.read_u8()?;
        size = (size << 7) | (b & 0x7f) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, size))
}

/// Extract the raw `AudioSpecificConfig` payload from a full `esds` box
/// (8-byte box header + 4-byte version/flags + ES_Descriptor tree).
///
/// Returns the exact bytes of the `DecoderSpecificInfo` (tag 0x05) payload —
/// never the outer `esds` box, never the `DecoderConfigDescriptor` it's
/// nested in.
pub fn extract_audio_specific_config(esds_box_bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(esds_box_bytes.len() > 12, "esds box too short");

    let mut cursor = Cursor::new(esds_box_bytes);
    // 8-byte box header (size: u32, fourcc: [u8;4]) — not re-validated here,
    // the caller already matched on the fourcc to route to this function.
    cursor.set_position(8);
    // 4-byte full-box version/flags, always zero for esds.
    let _version_flags = cursor.read_u32::<BigEndian>()?;

    let (tag, _len) = read_tag_and_length(&mut cursor)?;
    anyhow::ensure!(tag == ES_DESCR_TAG, "expected ES_DescrTag (0x03), got {tag:#x}");
    // ES_ID (2 bytes) + flags (1 byte). The optional streamDependence/URL/
    // OCRstream fields gated by the flags byte are not present in any
    // fragment this pipeline produces, so a fixed 3-byte skip is correct.
    let mut es_fixed = [0u8; 3];
    cursor.read_exact(&mut es_fixed)?;

    let (tag, _len) = read_tag_and_length(&mut cursor)?;
    anyhow::ensure!(
        tag == DECODER_CONFIG_DESCR_TAG,
        "expected DecoderConfigDescrTag (0x04), got {tag:#x}"
    );
    // objectTypeIndication(1) + streamType/upStream/reserved(1) +
    // bufferSizeDB(3) + maxBitrate(4) + avgBitrate(4) = 13 bytes.
    let mut config_fixed = [0u8; 13];
    cursor.read_exact(&mut config_fixed)?;

    let (tag, len) = read_tag_and_length(&mut cursor)?;
    anyhow::ensure!(
        tag == DEC_SPECIFIC_INFO_TAG,
        "expected DecSpecificInfoTag (0x05), got {tag:#x}"
    );

    let mut config = vec![0u8; len];
    cursor.read_exact(&mut config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal esds box matching spec.md §8's literal layout:
    /// `[8-byte header][00 00 00 00][03 ?? (skip 3) 04 ?? (skip 13) 05 LEN CONFIG…]`
    fn build_esds(config: &[u8]) -> Vec<u8> {
        let mut dec_specific = vec![DEC_SPECIFIC_INFO_TAG, config.len() as u8];
        dec_specific.extend_from_slice(config);

        let mut decoder_config = vec![DECODER_CONFIG_DESCR_TAG];
        let dc_body_len = 13 + dec_specific.len();
        decoder_config.push(dc_body_len as u8);
        decoder_config.extend(std::iter::repeat(0u8).take(13));
        decoder_config.extend_from_slice(&dec_specific);

        let mut es_descr = vec![ES_DESCR_TAG];
        let es_body_len = 3 + decoder_config.len();
        es_descr.push(es_body_len as u8);
        es_descr.extend_from_slice(&[0, 0, 0]); // ES_ID + flags
        es_descr.extend_from_slice(&decoder_config);

        let mut esds = Vec::new();
        let total_size = 8 + 4 + es_descr.len();
        esds.extend_from_slice(&(total_size as u32).to_be_bytes());
        esds.extend_from_slice(b"esds");
        esds.extend_from_slice(&[0, 0, 0, 0]); // version/flags
        esds.extend_from_slice(&es_descr);
        esds
    }

    #[test]
    fn extracts_audio_specific_config_payload_only() {
        let config = [0x12, 0x10]; // AAC-LC, 44.1kHz, stereo
        let esds = build_esds(&config);
        let extracted = extract_audio_specific_config(&esds).unwrap();
        assert_eq!(extracted, config.to_vec());
    }

    #[test]
    fn rejects_wrong_outer_tag() {
        let mut esds = build_esds(&[0x12, 0x10]);
        // Corrupt the ES_DescrTag byte (first byte after the 12-byte header).
        esds[12] = 0x99;
        assert!(extract_audio_specific_config(&esds).is_err());
    }
}
