// demos/dualcast-harness/src/fixtures.rs
//
// Fake `SegmentFetcher`/`ManifestSource` pair for the headless harness.
// Generalizes `producer.rs`'s own `FixedFetcher` test double (read bytes
// from a fixed table, optionally fail a named URL) into something a CLI
// scenario name can steer.

use std::path::PathBuf;

use dualcast_media::manifest::{ManifestDescriptor, ManifestSource};
use dualcast_media::producer::SegmentFetcher;
use dualcast_media::SegmentDescriptor;

/// Maps a manifest-declared segment URL to the fixture file name a real
/// encoder run would have produced it as.
pub fn segment_filename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

pub struct FakeFetcher {
    fixtures_dir: Option<PathBuf>,
    scenario: String,
}

impl FakeFetcher {
    pub fn new(fixtures_dir: Option<String>, scenario: String) -> Self {
        Self { fixtures_dir: fixtures_dir.map(PathBuf::from), scenario }
    }
}

impl SegmentFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        if self.scenario == "network-failure" && url.contains("source-a") {
            anyhow::bail!("simulated transport failure for {url}");
        }

        if let Some(dir) = &self.fixtures_dir {
            let path = dir.join(segment_filename(url));
            return Ok(std::fs::read(&path)?);
        }

        // No real fixtures available — return an empty payload. Fine for
        // scenarios that only exercise command/event plumbing (abort,
        // network-failure, unsupported-audio); the demuxer will reject it
        // as malformed for everything else, which is itself exercised by
        // the `DemuxMalformed` unit tests in `demux/mod.rs`.
        Ok(Vec::new())
    }
}

/// Hand-written manifests for each named scenario. Segment counts and
/// spacing follow spec.md §8's scenario descriptions (e.g. a ~6s timeline
/// for the swap-at-3s case, one source a single segment shorter for the
/// stream-ends-early case).
pub struct FakeManifestSource {
    scenario: String,
}

impl FakeManifestSource {
    pub fn for_scenario(scenario: &str) -> Self {
        Self { scenario: scenario.to_string() }
    }
}

impl ManifestSource for FakeManifestSource {
    fn resolve(&self, url: &str) -> anyhow::Result<ManifestDescriptor> {
        let is_source_a = url.contains("source-a");
        let segment_count = if self.scenario == "stream-ends-early" && !is_source_a { 3 } else { 6 };

        let audio_codec_fourcc = if self.scenario == "unsupported-audio" && !is_source_a {
            "mp4a.40.34".to_string()
        } else {
            "mp4a.40.2".to_string()
        };

        let prefix = if is_source_a { "a" } else { "b" };
        Ok(ManifestDescriptor {
            video_init_url: format!("fixture://{prefix}/video-init.mp4"),
            audio_init_url: format!("fixture://{prefix}/audio-init.mp4"),
            video_segments: segment_list(prefix, "video", segment_count),
            audio_segments: segment_list(prefix, "audio", segment_count),
            audio_codec_fourcc,
        })
    }
}

fn segment_list(prefix: &str, track: &str, count: usize) -> Vec<SegmentDescriptor> {
    (0..count)
        .map(|i| SegmentDescriptor {
            url: format!("fixture://{prefix}/{track}-{i}.m4s"),
            pts_us: i as i64 * 1_000_000,
            duration_us: 1_000_000,
        })
        .collect()
}
