//! Ogg/Opus container analysis (§4.2). Walks the container's pages by hand
//! instead of pulling in a full Ogg demuxer — the only things callers need
//! are the voice note's duration and a synthetic waveform for the outbound
//! `AudioMessage`.

use crate::error::BridgeError;

const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";

/// (duration_seconds, 64-byte synthetic waveform).
pub fn analyze(buf: &[u8]) -> Result<(u32, [u8; 64]), BridgeError> {
    if buf.len() < 4 || &buf[0..4] != b"OggS" {
        return Err(BridgeError::Media("not an Ogg container (bad magic)".into()));
    }

    let mut offset = 0usize;
    let mut last_granule: u64 = 0;
    let mut saw_granule = false;
    let mut pre_skip: u16 = 0;
    let mut sample_rate: u32 = 48_000;
    let mut saw_opus_head = false;

    while offset + 27 <= buf.len() {
        if &buf[offset..offset + 4] != b"OggS" {
            break;
        }

        let granule = u64::from_le_bytes(buf[offset + 6..offset + 14].try_into().unwrap());
        let sequence = u32::from_le_bytes(buf[offset + 18..offset + 22].try_into().unwrap());
        let segment_count = buf[offset + 26] as usize;

        let seg_table_start = offset + 27;
        if seg_table_start + segment_count > buf.len() {
            break;
        }
        let segment_table = &buf[seg_table_start..seg_table_start + segment_count];
        let payload_len: usize = segment_table.iter().map(|&s| s as usize).sum();
        let page_len = 27 + segment_count + payload_len;

        if offset + page_len > buf.len() {
            break;
        }

        if sequence <= 1 {
            let payload_start = seg_table_start + segment_count;
            let payload = &buf[payload_start..offset + page_len];
            if let Some(pos) = find_subslice(payload, OPUS_HEAD_MAGIC) {
                if pos + 12 <= payload.len() {
                    pre_skip = u16::from_le_bytes(payload[pos + 10..pos + 12].try_into().unwrap());
                }
                if pos + 16 <= payload.len() {
                    sample_rate =
                        u32::from_le_bytes(payload[pos + 12..pos + 16].try_into().unwrap());
                }
                saw_opus_head = true;
            }
        }

        if granule > 0 || saw_granule {
            last_granule = granule;
            saw_granule = true;
        }

        offset += page_len;
    }

    let _ = saw_opus_head;

    let duration = if saw_granule && sample_rate > 0 {
        let samples = last_granule.saturating_sub(pre_skip as u64);
        ((samples as f64) / (sample_rate as f64)).ceil() as i64
    } else {
        (buf.len() as i64) / 2000
    };

    let duration = duration.clamp(1, 300) as u32;

    Ok((duration, synthetic_waveform(duration)))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Deterministic 64-byte envelope: two sine harmonics plus a small noise
/// term, windowed with a sinusoidal fade-in/out, clamped to [0, 100].
fn synthetic_waveform(duration_seconds: u32) -> [u8; 64] {
    let mut out = [0u8; 64];
    let seed = duration_seconds as f64;

    for (i, slot) in out.iter_mut().enumerate() {
        let t = i as f64 / 64.0;
        let fundamental = (t * std::f64::consts::TAU * (2.0 + seed * 0.1)).sin();
        let harmonic = 0.5 * (t * std::f64::consts::TAU * (4.0 + seed * 0.2)).sin();
        let noise = ((i as f64 * 12.9898 + seed * 78.233).sin() * 43758.5453).fract();
        let fade = (t * std::f64::consts::PI).sin();

        let value = ((fundamental + harmonic) * 0.5 + noise * 0.1) * fade;
        let scaled = ((value + 1.0) * 50.0).clamp(0.0, 100.0);
        *slot = scaled as u8;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_ogg_opus_page(
        sequence: u32,
        granule: u64,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut segments = Vec::new();
        let mut remaining = payload.len();
        if remaining == 0 {
            segments.push(0);
        }
        while remaining > 0 {
            let chunk = remaining.min(255);
            segments.push(chunk as u8);
            remaining -= chunk;
            if chunk < 255 {
                break;
            }
        }

        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0); // version
        page.push(0); // header type
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&1u32.to_le_bytes()); // serial
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes()); // checksum
        page.push(segments.len() as u8);
        page.extend_from_slice(&segments);
        page.extend_from_slice(payload);
        page
    }

    fn opus_head_payload(pre_skip: u16, sample_rate: u32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(b"OpusHead");
        p.push(1); // version
        p.push(2); // channel count
        p.extend_from_slice(&pre_skip.to_le_bytes());
        p.extend_from_slice(&sample_rate.to_le_bytes());
        p.extend_from_slice(&0i16.to_le_bytes()); // output gain
        p.push(0); // channel mapping family
        p
    }

    #[test]
    fn rejects_bad_magic() {
        let err = analyze(b"not ogg").unwrap_err();
        assert!(matches!(err, BridgeError::Media(_)));
    }

    #[test]
    fn three_second_clip_round_trips() {
        let head_page = build_ogg_opus_page(0, 0, &opus_head_payload(312, 48_000));
        let mut tags_payload = Vec::new();
        tags_payload.extend_from_slice(b"OpusTags");
        let tags_page = build_ogg_opus_page(1, 0, &tags_payload);

        let granule = 312 + 3 * 48_000;
        let audio_page = build_ogg_opus_page(2, granule, &[0u8; 10]);

        let mut buf = Vec::new();
        buf.extend(head_page);
        buf.extend(tags_page);
        buf.extend(audio_page);

        let (duration, waveform) = analyze(&buf).unwrap();
        assert!((2..=4).contains(&duration), "got {duration}");
        assert_eq!(waveform.len(), 64);
        for b in waveform {
            assert!(b <= 100);
        }
    }

    #[test]
    fn falls_back_to_length_heuristic_without_granule() {
        let head_page = build_ogg_opus_page(0, 0, &opus_head_payload(0, 48_000));
        let mut buf = Vec::new();
        buf.extend(head_page);
        buf.extend(vec![0u8; 5000]);

        let (duration, _) = analyze(&buf).unwrap();
        assert_eq!(duration, (buf.len() as u32 / 2000).clamp(1, 300));
    }

    #[test]
    fn duration_clamped_to_bounds() {
        let head_page = build_ogg_opus_page(0, 0, &opus_head_payload(0, 48_000));
        let huge_granule = build_ogg_opus_page(2, 48_000 * 10_000, &[0u8; 4]);
        let mut buf = Vec::new();
        buf.extend(head_page);
        buf.extend(huge_granule);

        let (duration, _) = analyze(&buf).unwrap();
        assert_eq!(duration, 300);
    }

    #[test]
    fn waveform_is_deterministic() {
        let (_, a) = synthetic_waveform_test_helper(3);
        let (_, b) = synthetic_waveform_test_helper(3);
        assert_eq!(a, b);
    }

    fn synthetic_waveform_test_helper(d: u32) -> ((), [u8; 64]) {
        ((), synthetic_waveform(d))
    }
}
