use nalgebra as na;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rerun::{RecordingStream, RecordingStreamResult, TimeCell};

use crate::canvas::SpatialCanvas;
use crate::types::MarkerId;

const FORWARD_ARROW_LENGTH: f32 = 0.15;

/// Stable pseudo-random color per marker id.
pub fn id_to_color(id: &MarkerId) -> (u8, u8, u8, u8) {
    // FNV-1a, so colors stay the same across runs.
    let seed = id
        .as_str()
        .bytes()
        .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let color_num = rng.random_range(0..2u32.pow(24));
    (
        ((color_num >> 16) % 256) as u8,
        ((color_num >> 8) % 256) as u8,
        (color_num % 256) as u8,
        255,
    )
}

fn to_f32(v: &na::Vector3<f64>) -> [f32; 3] {
    [v.x as f32, v.y as f32, v.z as f32]
}

/// Camera looks down -Z.
fn forward(iso: &na::Isometry3<f64>) -> [f32; 3] {
    let f = iso.rotation * na::Vector3::new(0.0, 0.0, -1.0) * FORWARD_ARROW_LENGTH as f64;
    to_f32(&f)
}

/// Logs anchor, markers and reticle of `canvas` under `topic`.
pub fn log_canvas(
    recording: &RecordingStream,
    topic: &str,
    canvas: &SpatialCanvas,
    time_ns: i64,
) -> RecordingStreamResult<()> {
    recording.set_time("stable", TimeCell::from_timestamp_nanos_since_epoch(time_ns));

    let Some(anchor) = canvas.anchor() else {
        recording.log(topic, &rerun::Clear::recursive())?;
        return Ok(());
    };
    let a = anchor.world_transform();
    let q = a.rotation;
    recording.log(
        format!("{}/anchor", topic),
        &rerun::Transform3D::from_translation_rotation(
            to_f32(&a.translation.vector),
            rerun::Quaternion::from_xyzw([q.i as f32, q.j as f32, q.k as f32, q.w as f32]),
        ),
    )?;

    let nodes = canvas.nodes();
    let positions: Vec<[f32; 3]> = nodes
        .iter()
        .map(|n| to_f32(&n.world_transform.translation.vector))
        .collect();
    let colors: Vec<rerun::Color> = nodes
        .iter()
        .map(|n| {
            let (r, g, b, a) = id_to_color(n.marker.id());
            rerun::Color::from_unmultiplied_rgba(r, g, b, a)
        })
        .collect();
    let labels: Vec<String> = nodes.iter().map(|n| n.marker.id().to_string()).collect();
    let arrows: Vec<[f32; 3]> = nodes.iter().map(|n| forward(&n.world_transform)).collect();

    recording.log(
        format!("{}/markers", topic),
        &rerun::Points3D::new(positions.clone())
            .with_colors(colors.clone())
            .with_labels(labels)
            .with_radii([rerun::Radius::new_ui_points(5.0)]),
    )?;
    recording.log(
        format!("{}/markers/forward", topic),
        &rerun::Arrows3D::from_vectors(arrows)
            .with_origins(positions)
            .with_colors(colors),
    )?;

    let reticle = canvas.reticle();
    match (reticle.visible, reticle.world_transform) {
        (true, Some(world)) => {
            recording.log(
                format!("{}/reticle", topic),
                &rerun::Points3D::new([to_f32(&world.translation.vector)])
                    .with_radii([rerun::Radius::new_ui_points(8.0)]),
            )?;
        }
        _ => {
            recording.log(format!("{}/reticle", topic), &rerun::Clear::flat())?;
        }
    }
    Ok(())
}
