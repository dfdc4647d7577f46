use ar_photo_canvas::canvas::SpatialCanvas;
use ar_photo_canvas::capture::{CaptureCoordinator, FusedCaptureRecord};
use ar_photo_canvas::config::SessionConfig;
use ar_photo_canvas::replay::{FolderImageSource, replay_source};
use ar_photo_canvas::sources::{Collaborators, ExportReply, PersistenceSink, StoreReply, StoredAsset};
use ar_photo_canvas::types::{AnchorFrame, MarkerId, PhotoMarker, Pose, PoseSample, Thumbnail};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, RgbImage};
use nalgebra as na;
use time::OffsetDateTime;

struct NullSink;

impl PersistenceSink for NullSink {
    fn store(&mut self, record: FusedCaptureRecord, reply: StoreReply) {
        reply.send(Ok(StoredAsset {
            image_path: record.id.to_string(),
        }));
    }

    fn export_all(&mut self, reply: ExportReply) {
        reply.send(Ok(std::path::PathBuf::new()));
    }
}

fn anchor() -> AnchorFrame {
    AnchorFrame::new(na::Isometry3::from_parts(
        na::Translation3::new(0.3, -1.2, 2.0),
        na::UnitQuaternion::from_euler_angles(0.1, 0.7, -0.2),
    ))
}

fn bench_relative_pose(c: &mut Criterion) {
    let anchor = anchor();
    let pose = Pose::new(
        na::Isometry3::from_parts(
            na::Translation3::new(1.0, 0.5, -3.0),
            na::UnitQuaternion::from_euler_angles(-0.3, 0.2, 1.1),
        ),
        0.0,
    );
    c.bench_function("anchor_relative_pose", |b| {
        b.iter(|| black_box(&anchor).relative(black_box(&pose)))
    });
}

fn bench_canvas_markers(c: &mut Criterion) {
    let anchor = anchor();
    let thumbnail = Thumbnail::from_image(&DynamicImage::ImageRgb8(RgbImage::new(160, 120)), 160);
    let markers: Vec<PhotoMarker> = (0..200)
        .map(|i| {
            PhotoMarker::from_world_pose(
                MarkerId::new(format!("m-{:04}", i)),
                &anchor,
                &Pose::from_translation(i as f64 * 0.1, 0.0, -1.0, i as f64),
                thumbnail.clone(),
                OffsetDateTime::UNIX_EPOCH,
                String::new(),
            )
        })
        .collect();

    c.bench_function("canvas_add_200_markers", |b| {
        b.iter(|| {
            let mut canvas = SpatialCanvas::new();
            canvas.initialize_anchor(anchor).unwrap();
            for m in &markers {
                canvas.add_marker(m.clone()).unwrap();
            }
            black_box(canvas.len())
        })
    });

    let mut canvas = SpatialCanvas::new();
    canvas.initialize_anchor(anchor).unwrap();
    let preview = Pose::from_translation(0.0, 0.0, -0.5, 0.0);
    c.bench_function("canvas_update_preview_pose", |b| {
        b.iter(|| canvas.update_preview_pose(black_box(&preview)))
    });
}

fn bench_capture_pipeline(c: &mut Criterion) {
    let frame = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
    c.bench_function("capture_pipeline_640x480", |b| {
        b.iter_batched(
            || {
                let (pose_source, pose) = replay_source::<PoseSample>("pose");
                let mut coordinator = CaptureCoordinator::new(
                    SessionConfig {
                        marker_id_prefix: Some("bench".to_string()),
                        ..Default::default()
                    },
                    Collaborators {
                        pose: Box::new(pose_source),
                        motion: Box::new(replay_source("motion").0),
                        location: Box::new(replay_source("location").0),
                        camera: Box::new(FolderImageSource::from_images(vec![frame.clone()])),
                        sink: Box::new(NullSink),
                    },
                );
                coordinator.start_services_with_anchor(anchor()).unwrap();
                pose.emit(PoseSample {
                    pose: Pose::from_translation(0.0, 0.0, -1.0, 1.0),
                    intrinsics: None,
                    scan_ready: true,
                });
                coordinator.pump();
                coordinator
            },
            |mut coordinator| {
                coordinator.capture_photo(|r| {
                    black_box(r.is_ok());
                })
                .unwrap();
                coordinator.pump();
                coordinator
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_relative_pose, bench_canvas_markers, bench_capture_pipeline);
criterion_main!(benches);
