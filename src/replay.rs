//! Trace-driven collaborators: pose, motion and location streams replayed
//! from a recorded JSON trace, and still images served from a folder.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use glob::glob;
use image::{DynamicImage, ImageReader};
use indicatif::ParallelProgressIterator;
use log::{debug, trace, warn};
use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ImageCaptureError, ReplayError, SourceError};
use crate::sources::{ImageReply, SampleSender, SampleSource, StillImageSource};
use crate::types::{
    CameraIntrinsics, LocationSample, MotionSample, Pose, PoseSample, quaternion_from_xyzw,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePose {
    pub t: f64,
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub orientation: [f64; 4],
    #[serde(default = "default_scan_ready")]
    pub scan_ready: bool,
    #[serde(default)]
    pub intrinsics: Option<CameraIntrinsics>,
}

fn default_scan_ready() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMotion {
    pub t: f64,
    pub attitude: [f64; 4],
    #[serde(default)]
    pub rotation_rate: [f64; 3],
    #[serde(default)]
    pub gravity: [f64; 3],
    #[serde(default)]
    pub user_acceleration: [f64; 3],
}

/// A recorded session: sensor streams plus the timestamps at which the
/// shutter was pressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trace {
    pub poses: Vec<TracePose>,
    pub motion: Vec<TraceMotion>,
    pub locations: Vec<LocationSample>,
    pub captures: Vec<f64>,
}

impl TracePose {
    pub fn to_sample(&self) -> Result<PoseSample, ReplayError> {
        let rotation = quaternion_from_xyzw(self.orientation).ok_or_else(|| {
            ReplayError::InvalidSample(format!("zero orientation at t={}", self.t))
        })?;
        let [x, y, z] = self.position;
        let transform = na::Isometry3::from_parts(na::Translation3::new(x, y, z), rotation);
        Ok(PoseSample {
            pose: Pose::new(transform, self.t),
            intrinsics: self.intrinsics,
            scan_ready: self.scan_ready,
        })
    }
}

impl TraceMotion {
    pub fn to_sample(&self) -> Result<MotionSample, ReplayError> {
        let attitude = quaternion_from_xyzw(self.attitude).ok_or_else(|| {
            ReplayError::InvalidSample(format!("zero attitude at t={}", self.t))
        })?;
        Ok(MotionSample {
            attitude,
            rotation_rate: na::Vector3::from(self.rotation_rate),
            gravity: na::Vector3::from(self.gravity),
            user_acceleration: na::Vector3::from(self.user_acceleration),
            timestamp: self.t,
        })
    }
}

pub fn load_trace(path: &Path) -> Result<Trace, ReplayError> {
    let contents = std::fs::read_to_string(path)?;
    let trace: Trace = serde_json::from_str(&contents)?;
    debug!(
        "trace {}: {} poses, {} motion, {} locations, {} captures",
        path.display(),
        trace.poses.len(),
        trace.motion.len(),
        trace.locations.len(),
        trace.captures.len()
    );
    Ok(trace)
}

/// A sample source whose samples are pushed by a paired [`ReplayHandle`].
pub struct ReplaySource<T> {
    name: &'static str,
    sink: Arc<Mutex<Option<SampleSender<T>>>>,
}

/// Pushes samples into a subscribed [`ReplaySource`]. Can live on any thread.
pub struct ReplayHandle<T> {
    sink: Arc<Mutex<Option<SampleSender<T>>>>,
}

impl<T> Clone for ReplayHandle<T> {
    fn clone(&self) -> Self {
        ReplayHandle {
            sink: Arc::clone(&self.sink),
        }
    }
}

pub fn replay_source<T>(name: &'static str) -> (ReplaySource<T>, ReplayHandle<T>) {
    let sink = Arc::new(Mutex::new(None));
    (
        ReplaySource {
            name,
            sink: Arc::clone(&sink),
        },
        ReplayHandle { sink },
    )
}

impl<T> ReplayHandle<T> {
    /// Returns false when nobody is subscribed or the sample was dropped.
    pub fn emit(&self, sample: T) -> bool {
        match self.sink.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|s| s.send(sample)),
            Err(_) => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl<T> SampleSource<T> for ReplaySource<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribe(&mut self, sink: SampleSender<T>) -> Result<(), SourceError> {
        let mut guard = self.sink.lock().map_err(|_| SourceError::Unavailable {
            source_name: self.name,
            reason: "replay state poisoned".to_string(),
        })?;
        if guard.is_some() {
            return Err(SourceError::AlreadySubscribed(self.name));
        }
        *guard = Some(sink);
        trace!("{} subscribed", self.name);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Ok(mut guard) = self.sink.lock() {
            *guard = None;
        }
        trace!("{} unsubscribed", self.name);
    }
}

enum TraceItem {
    Pose(PoseSample),
    Motion(MotionSample),
    Location(LocationSample),
}

impl TraceItem {
    fn timestamp(&self) -> f64 {
        match self {
            TraceItem::Pose(s) => s.pose.timestamp,
            TraceItem::Motion(s) => s.timestamp,
            TraceItem::Location(s) => s.timestamp,
        }
    }
}

/// Plays a [`Trace`] into three replay sources in timestamp order.
pub struct TraceReplay {
    items: VecDeque<TraceItem>,
    pose: ReplayHandle<PoseSample>,
    motion: ReplayHandle<MotionSample>,
    location: ReplayHandle<LocationSample>,
}

pub struct ReplaySources {
    pub pose: ReplaySource<PoseSample>,
    pub motion: ReplaySource<MotionSample>,
    pub location: ReplaySource<LocationSample>,
}

impl TraceReplay {
    pub fn new(trace: &Trace) -> Result<(TraceReplay, ReplaySources), ReplayError> {
        let mut items = Vec::with_capacity(
            trace.poses.len() + trace.motion.len() + trace.locations.len(),
        );
        for p in &trace.poses {
            items.push(TraceItem::Pose(p.to_sample()?));
        }
        for m in &trace.motion {
            items.push(TraceItem::Motion(m.to_sample()?));
        }
        items.extend(trace.locations.iter().copied().map(TraceItem::Location));
        items.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));

        let (pose_source, pose) = replay_source("pose");
        let (motion_source, motion) = replay_source("motion");
        let (location_source, location) = replay_source("location");
        Ok((
            TraceReplay {
                items: items.into(),
                pose,
                motion,
                location,
            },
            ReplaySources {
                pose: pose_source,
                motion: motion_source,
                location: location_source,
            },
        ))
    }

    /// Emits every remaining sample with timestamp `<= t`. Returns the count emitted.
    pub fn advance_to(&mut self, t: f64) -> usize {
        let mut emitted = 0;
        while self.items.front().is_some_and(|i| i.timestamp() <= t) {
            let Some(item) = self.items.pop_front() else {
                break;
            };
            let delivered = match item {
                TraceItem::Pose(s) => self.pose.emit(s),
                TraceItem::Motion(s) => self.motion.emit(s),
                TraceItem::Location(s) => self.location.emit(s),
            };
            if delivered {
                emitted += 1;
            }
        }
        emitted
    }

    pub fn next_timestamp(&self) -> Option<f64> {
        self.items.front().map(TraceItem::timestamp)
    }

    pub fn is_finished(&self) -> bool {
        self.items.is_empty()
    }
}

fn img_filter(rp: glob::GlobResult) -> Option<PathBuf> {
    if let Ok(p) = rp {
        for ext in &[".png", ".jpg", ".jpeg"] {
            if p.as_os_str().to_string_lossy().to_lowercase().ends_with(ext) {
                return Some(p);
            }
        }
    }
    None
}

/// Serves pre-recorded stills in file-name order, one per request.
pub struct FolderImageSource {
    images: VecDeque<DynamicImage>,
}

impl FolderImageSource {
    /// Decodes every png/jpg in `folder` in parallel.
    pub fn load(folder: &Path) -> Result<FolderImageSource, ReplayError> {
        let pattern = folder.join("*");
        let mut paths: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
            .filter_map(img_filter)
            .collect();
        paths.sort();
        let images: Vec<DynamicImage> = paths
            .par_iter()
            .progress_count(paths.len() as u64)
            .map(|path| -> Result<DynamicImage, ReplayError> {
                Ok(ImageReader::open(path)?.decode()?)
            })
            .collect::<Result<_, _>>()?;
        debug!("loaded {} stills from {}", images.len(), folder.display());
        Ok(FolderImageSource {
            images: images.into(),
        })
    }

    pub fn from_images(images: Vec<DynamicImage>) -> FolderImageSource {
        FolderImageSource {
            images: images.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.images.len()
    }
}

impl StillImageSource for FolderImageSource {
    fn capture_image(&mut self, reply: ImageReply) {
        match self.images.pop_front() {
            Some(img) => reply.send(Ok(img)),
            None => {
                warn!("no stills left for request {}", reply.request());
                reply.send(Err(ImageCaptureError::Unavailable(
                    "image folder exhausted".to_string(),
                )));
            }
        }
    }
}

/// Generates a flat colored frame per request; stands in for a camera when
/// no image folder is given.
pub struct SyntheticImageSource {
    width: u32,
    height: u32,
    count: u32,
}

impl SyntheticImageSource {
    pub fn new(width: u32, height: u32) -> SyntheticImageSource {
        SyntheticImageSource {
            width,
            height,
            count: 0,
        }
    }
}

impl StillImageSource for SyntheticImageSource {
    fn capture_image(&mut self, reply: ImageReply) {
        if self.width == 0 || self.height == 0 {
            reply.send(Err(ImageCaptureError::Unavailable(
                "zero-sized synthetic frame".to_string(),
            )));
            return;
        }
        self.count += 1;
        let shade = (self.count.wrapping_mul(53) % 256) as u8;
        let img = image::RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb([shade, (x % 256) as u8, (y % 256) as u8])
        });
        reply.send(Ok(DynamicImage::ImageRgb8(img)));
    }
}
