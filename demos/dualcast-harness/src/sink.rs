// demos/dualcast-harness/src/sink.rs
//
// Logging stand-in for the host's MSE-style append target. Modeled on
// `sink.rs`'s own `FakeSink` test double, but prints instead of just
// recording, and advances `current_time_s` on its own clock rather than
// a test driving it by hand — good enough to watch look-ahead/trim/autoplay
// policy run against a moving playhead without a real `<video>` element.

use std::time::Instant;

use dualcast_media::{PlaybackSink, SinkRange};

pub struct LoggingSink {
    name: String,
    started_at: Option<Instant>,
    buffered: Vec<SinkRange>,
    updating: bool,
    played: bool,
}

impl LoggingSink {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), started_at: None, buffered: Vec::new(), updating: false, played: false }
    }
}

impl PlaybackSink for LoggingSink {
    fn append(&mut self, bytes: &[u8]) -> bool {
        let end_s = self.buffered.last().map(|r| r.end_s).unwrap_or(0.0) + 1.0;
        self.buffered.push(SinkRange { start_s: 0.0, end_s });
        eprintln!("[sink:{}] appended {} bytes, buffered up to {end_s:.2}s", self.name, bytes.len());
        true
    }

    fn remove(&mut self, start_s: f64, end_s: f64) {
        eprintln!("[sink:{}] remove {start_s:.2}s..{end_s:.2}s", self.name);
        self.buffered.retain(|r| r.end_s <= start_s || r.start_s >= end_s);
    }

    fn buffered(&self) -> Vec<SinkRange> {
        self.buffered.clone()
    }

    fn updating(&self) -> bool {
        self.updating
    }

    fn current_time_s(&self) -> f64 {
        match (self.played, self.started_at) {
            (true, Some(at)) => at.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    fn play(&mut self) -> bool {
        eprintln!("[sink:{}] play requested", self.name);
        self.played = true;
        self.started_at = Some(Instant::now());
        true
    }
}
