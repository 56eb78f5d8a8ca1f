// demos/dualcast-harness/src/main.rs
//
// Headless exerciser for the dual-stream PiP pipeline (spec.md §8). Fakes
// every external collaborator — segment transport, manifest resolution, and
// the MSE-style sink — and drives a `Player` through the end-to-end
// scenarios by name, printing every `HostEvent` it observes. Point
// `--fixtures <dir>` at a directory of real fMP4 segments (named per
// `fixtures::segment_filename`) to exercise actual decode/encode; without
// one, only the scenarios that don't require successful demux (abort,
// network failure, unsupported codec) produce meaningful output.

mod fixtures;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use dualcast_core::PlayerCommand;
use dualcast_media::Player;

use fixtures::{FakeFetcher, FakeManifestSource};
use sink::LoggingSink;

fn main() -> anyhow::Result<()> {
    ffmpeg_the_third::init().expect("FFmpeg init failed");

    let mut args = std::env::args().skip(1);
    let scenario = args.next().unwrap_or_else(|| "cold-start".to_string());
    let fixtures_dir = std::env::args()
        .collect::<Vec<_>>()
        .windows(2)
        .find(|pair| pair[0] == "--fixtures")
        .map(|pair| pair[1].clone());

    eprintln!("[harness] running scenario {scenario:?} (fixtures: {fixtures_dir:?})");

    let fetcher = Arc::new(FakeFetcher::new(fixtures_dir.clone(), scenario.clone()));
    let manifest_source = Arc::new(FakeManifestSource::for_scenario(&scenario));
    let video_sink = Box::new(LoggingSink::new("video"));
    let audio_sink = Box::new(LoggingSink::new("audio"));

    let (mut player, host_rx) = Player::spawn(fetcher, manifest_source, video_sink, audio_sink);

    player.send(PlayerCommand::Load {
        manifest_url_a: "fixture://source-a/manifest".to_string(),
        manifest_url_b: "fixture://source-b/manifest".to_string(),
    });

    match scenario.as_str() {
        "swap-at-3s" => {
            // SetSwapped alone now drives the audio switch too.
            schedule(&player, Duration::from_millis(3_000), PlayerCommand::SetSwapped(true));
        }
        "abort-mid-fetch" => {
            schedule(&player, Duration::from_millis(150), PlayerCommand::Destroy);
        }
        _ => {}
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(8);
    loop {
        match host_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => println!("[event] {event:?}"),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if std::time::Instant::now() >= deadline {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    player.destroy();
    Ok(())
}

/// Fire-and-forget a delayed command on its own thread — good enough for a
/// headless demo driver, not a scheduling primitive the core depends on.
fn schedule(player: &Player, delay: Duration, command: PlayerCommand) {
    let sender = player.command_sender();
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        let _ = sender.send(command);
    });
}
