use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use ar_photo_canvas::capture::CaptureCoordinator;
use ar_photo_canvas::config::SessionConfig;
use ar_photo_canvas::io::{DirectorySink, write_marker_report};
use ar_photo_canvas::replay::{FolderImageSource, SyntheticImageSource, TraceReplay, load_trace};
use ar_photo_canvas::sources::{Collaborators, StillImageSource};
use ar_photo_canvas::visualization::log_canvas;
use ar_photo_canvas::{CaptureError, PhotoMarker, SessionState};
use clap::Parser;

#[derive(Parser)]
#[command(version, about, author)]
struct CanvasReplayCli {
    /// path to a recorded trace (json)
    trace: String,

    /// directory receiving photos, per-photo metadata and the manifest
    #[arg(short, long, default_value = "session")]
    output: String,

    /// folder of stills served as camera captures, synthetic frames if omitted
    #[arg(long)]
    images: Option<String>,

    /// session config json
    #[arg(long)]
    config: Option<String>,

    /// save a rerun recording to this path
    #[arg(long)]
    rrd: Option<String>,

    /// synthetic frame size
    #[arg(long, default_value = "640")]
    width: u32,
    #[arg(long, default_value = "480")]
    height: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = CanvasReplayCli::parse();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    let trace = load_trace(Path::new(&cli.trace))?;
    let (mut replay, sources) = TraceReplay::new(&trace)?;
    let camera: Box<dyn StillImageSource> = match &cli.images {
        Some(folder) => Box::new(FolderImageSource::load(Path::new(folder))?),
        None => Box::new(SyntheticImageSource::new(cli.width, cli.height)),
    };
    let sink = DirectorySink::create(&cli.output)?;

    let mut coordinator = CaptureCoordinator::new(
        config,
        Collaborators {
            pose: Box::new(sources.pose),
            motion: Box::new(sources.motion),
            location: Box::new(sources.location),
            camera,
            sink: Box::new(sink),
        },
    );
    let recording = match &cli.rrd {
        Some(path) => Some(rerun::RecordingStreamBuilder::new("ar_photo_canvas").save(path)?),
        None => None,
    };

    let mut capture_times: Vec<f64> = trace.captures.clone();
    capture_times.sort_by(f64::total_cmp);
    let mut capture_times: VecDeque<f64> = capture_times.into();
    let results: Rc<RefCell<Vec<Result<PhotoMarker, CaptureError>>>> = Rc::default();

    coordinator.start_services()?;
    loop {
        let next_sample = replay.next_timestamp();
        let next_capture = capture_times.front().copied();
        let t = match (next_sample, next_capture) {
            (Some(s), Some(c)) => s.min(c),
            (Some(s), None) => s,
            (None, Some(c)) => c,
            (None, None) => break,
        };
        replay.advance_to(t);
        coordinator.pump();

        if coordinator.state() == SessionState::Scanning && coordinator.scan_ready() {
            let anchor = coordinator.place_anchor_at_current_pose()?;
            log::info!(
                "anchor placed at t={:.3}: {:?}",
                t,
                anchor.world_transform().translation.vector.as_slice()
            );
        }

        while capture_times.front().is_some_and(|c| *c <= t) {
            capture_times.pop_front();
            let sink = Rc::clone(&results);
            match coordinator.capture_photo(move |r| sink.borrow_mut().push(r)) {
                Ok(request) => log::debug!("capture {} issued at t={:.3}", request, t),
                Err(e) => log::warn!("capture at t={:.3} rejected: {}", t, e),
            }
            coordinator.pump();
        }

        if let Some(recording) = &recording {
            log_canvas(recording, "world", coordinator.canvas(), (t * 1e9) as i64)?;
        }
    }

    let export: Rc<RefCell<Option<String>>> = Rc::default();
    let export_slot = Rc::clone(&export);
    coordinator.export_session(move |r| {
        *export_slot.borrow_mut() = Some(match r {
            Ok(path) => path.display().to_string(),
            Err(e) => format!("export failed: {}", e),
        });
    });
    coordinator.pump();

    let markers = coordinator.markers();
    write_marker_report(&Path::new(&cli.output).join("markers.json"), &markers)?;

    let failures = results.borrow().iter().filter(|r| r.is_err()).count();
    println!(
        "{} photos placed, {} failed captures",
        coordinator.photo_count(),
        failures
    );
    for m in &markers {
        let p = m.relative_position();
        println!("  {}: ({:.3}, {:.3}, {:.3})", m.id(), p.x, p.y, p.z);
    }
    if let Some(location) = export.borrow().as_ref() {
        println!("session: {}", location);
    }
    Ok(())
}
