// crates/dualcast-media/src/demux/mp4.rs
//
// ISOBMFF/fMP4 box walking for one (source, track) demuxer. Parses an init
// segment's `moov` for codec configuration, then each media segment's
// `moof`/`mdat` pair for access units — the same `Any::decode_maybe` +
// `Moof`/`Mdat`/`Trak` shape the pzanella-moq fMP4 importer uses, narrowed
// to the one video or one audio track this demuxer owns.

use std::io::Cursor;

use mp4_atom::{Any, Atom, Codec, DecodeMaybe, Mdat, Moof, Moov};

use dualcast_core::chunk::EncodedUnit;
use dualcast_core::ids::Track;

use super::esds::extract_audio_specific_config;

/// Codec configuration bytes decoded from the init segment's sample entry,
/// handed to the caller via `on_ready`.
pub struct TrackConfig {
    pub track_id: u32,
    pub timescale: u32,
    /// AVC/HEVC `avcC`/`hvcC` payload, or the AAC `AudioSpecificConfig`.
    pub config_bytes: Vec<u8>,
    pub codec_fourcc: &'static str,
}

/// Parse an init segment (a `moov`-bearing byte range) for the track's
/// sample-entry configuration box. Expects exactly one track of the given
/// kind — this pipeline only demuxes single-video/single-audio manifests.
pub fn parse_init_segment(bytes: &[u8], track: Track) -> anyhow::Result<TrackConfig> {
    let mut cursor = Cursor::new(bytes);
    let mut moov: Option<Moov> = None;

    while let Some(atom) = Any::decode_maybe(&mut cursor)? {
        if let Any::Moov(m) = atom {
            moov = Some(m);
            break;
        }
    }
    let moov = moov.ok_or_else(|| anyhow::anyhow!("init segment has no moov box"))?;

    let wanted_handler: &[u8] = match track {
        Track::Video => b"vide",
        Track::Audio => b"soun",
    };

    let trak = moov
        .trak
        .iter()
        .find(|t| t.mdia.hdlr.handler.as_ref() == wanted_handler)
        .ok_or_else(|| anyhow::anyhow!("no {track:?} track in moov"))?;

    let track_id = trak.tkhd.track_id;
    let timescale = trak.mdia.mdhd.timescale;
    let stsd = &trak.mdia.minf.stbl.stsd;

    let codec = match stsd.codecs.len() {
        0 => anyhow::bail!("sample entry has no codec"),
        1 => &stsd.codecs[0],
        _ => anyhow::bail!("multiple codecs in one sample entry, unsupported"),
    };

    let (config_bytes, codec_fourcc) = match codec {
        Codec::Avc1(avc1) => {
            let mut body = Vec::new();
            avc1.avcc.encode_body(&mut body)?;
            (body, "avc1")
        }
        Codec::Hev1(hev1) => {
            let mut body = Vec::new();
            hev1.hvcc.encode_body(&mut body)?;
            (body, "hev1")
        }
        Codec::Hvc1(hvc1) => {
            let mut body = Vec::new();
            hvc1.hvcc.encode_body(&mut body)?;
            (body, "hvc1")
        }
        Codec::Mp4a(mp4a) => {
            let mut esds_box = Vec::new();
            mp4a.esds.encode_body(&mut esds_box)?;
            // encode_body gives us the box payload only; prefix a dummy
            // 8-byte header so extract_audio_specific_config's fixed offsets
            // line up with the on-wire layout it documents.
            let mut full = Vec::with_capacity(8 + esds_box.len());
            full.extend_from_slice(&[0u8; 8]);
            full.extend_from_slice(&esds_box);
            let config = extract_audio_specific_config(&full)?;
            (config, "mp4a.40.2")
        }
        Codec::Unknown(fourcc) => {
            anyhow::bail!("unsupported codec in sample entry: {fourcc:?}")
        }
        other => anyhow::bail!("unsupported codec in sample entry: {other:?}"),
    };

    Ok(TrackConfig { track_id, timescale, config_bytes, codec_fourcc })
}

/// Parse one media segment (`moof` + `mdat`) into access units for the
/// given track id, converting `cts`/`duration` to microseconds via
/// `value * 1_000_000 / timescale` (spec.md §4.2).
pub fn parse_media_segment(
    bytes: &[u8],
    track: Track,
    track_id: u32,
    timescale: u32,
) -> anyhow::Result<Vec<EncodedUnit>> {
    let mut cursor = Cursor::new(bytes);
    let mut moof: Option<Moof> = None;
    let mut units = Vec::new();

    while let Some(atom) = Any::decode_maybe(&mut cursor)? {
        match atom {
            Any::Moof(m) => moof = Some(m),
            Any::Mdat(mdat) => {
                let moof = moof.take().ok_or_else(|| anyhow::anyhow!("mdat without preceding moof"))?;
                units.extend(extract_units_from_mdat(&moof, &mdat, track, track_id, timescale)?);
            }
            _ => {}
        }
    }

    Ok(units)
}

fn extract_units_from_mdat(
    moof: &Moof,
    mdat: &Mdat,
    track: Track,
    track_id: u32,
    timescale: u32,
) -> anyhow::Result<Vec<EncodedUnit>> {
    let mut units = Vec::new();

    for traf in &moof.traf {
        if traf.tfhd.track_id != track_id {
            continue;
        }

        let tfdt = traf.tfdt.as_ref().ok_or_else(|| anyhow::anyhow!("traf missing tfdt"))?;
        let mut dts = tfdt.base_media_decode_time;
        let mut offset = traf.tfhd.base_data_offset.unwrap_or(0) as usize;

        for trun in &traf.trun {
            if let Some(data_offset) = trun.data_offset {
                offset = (offset as i64 + data_offset as i64).max(0) as usize;
            }

            for entry in &trun.entries {
                let duration = entry
                    .duration
                    .or(traf.tfhd.default_sample_duration)
                    .ok_or_else(|| anyhow::anyhow!("sample has no duration"))?;
                let size = entry
                    .size
                    .or(traf.tfhd.default_sample_size)
                    .ok_or_else(|| anyhow::anyhow!("sample has no size"))? as usize;

                let cts = entry.cts.unwrap_or(0) as i64;
                let pts = dts as i64 + cts;

                anyhow::ensure!(offset + size <= mdat.data.len(), "sample exceeds mdat bounds");
                let bytes = mdat.data[offset..offset + size].to_vec();

                let flags = entry.flags.or(traf.tfhd.default_sample_flags).unwrap_or(0);
                let is_keyframe = match track {
                    Track::Video => (flags >> 24) & 0x3 == 0x2,
                    Track::Audio => true,
                };

                units.push(EncodedUnit {
                    track,
                    is_keyframe,
                    pts_us: to_micros(pts, timescale),
                    duration_us: to_micros(duration as i64, timescale),
                    bytes,
                });

                dts += duration as u64;
                offset += size;
            }
        }
    }

    Ok(units)
}

fn to_micros(value: i64, timescale: u32) -> i64 {
    dualcast_core::time::to_micros(value, timescale)
}
