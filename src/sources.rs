//! Collaborator interfaces and the channel plumbing that marshals their
//! output into the coordinator's thread.
//!
//! Sources may deliver from any thread. Streamed samples go through a
//! bounded channel. When it is full the oldest queued sample is evicted to
//! make room, so the newest sample always gets through. One-shot results (still images, storage, export) go
//! through an unbounded channel so they are never lost.

use std::fmt;
use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::DynamicImage;
use log::{debug, trace, warn};

use crate::capture::FusedCaptureRecord;
use crate::error::{ImageCaptureError, PersistenceError, SourceError};
use crate::types::{LocationSample, MotionSample, PoseSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the sink put the full-resolution asset. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub image_path: String,
}

pub type ImageResult = Result<DynamicImage, ImageCaptureError>;
pub type StoreResult = Result<StoredAsset, PersistenceError>;
pub type ExportResult = Result<PathBuf, PersistenceError>;

/// Everything that flows from collaborators into the coordinator.
/// A `None` result means the collaborator dropped its reply handle.
#[derive(Debug)]
pub enum SessionEvent {
    Pose(PoseSample),
    Motion(MotionSample),
    Location(LocationSample),
    Image {
        request: RequestId,
        result: Option<ImageResult>,
    },
    Stored {
        request: RequestId,
        result: Option<StoreResult>,
    },
    Exported {
        request: RequestId,
        result: Option<ExportResult>,
    },
}

impl SessionEvent {
    fn image(request: RequestId, result: Option<ImageResult>) -> SessionEvent {
        SessionEvent::Image { request, result }
    }

    fn stored(request: RequestId, result: Option<StoreResult>) -> SessionEvent {
        SessionEvent::Stored { request, result }
    }

    fn exported(request: RequestId, result: Option<ExportResult>) -> SessionEvent {
        SessionEvent::Exported { request, result }
    }
}

/// Handle a streaming source pushes samples through.
pub struct SampleSender<T> {
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
    wrap: fn(T) -> SessionEvent,
}

impl<T> Clone for SampleSender<T> {
    fn clone(&self) -> Self {
        SampleSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            wrap: self.wrap,
        }
    }
}

impl<T> SampleSender<T> {
    pub(crate) fn new(
        tx: Sender<SessionEvent>,
        rx: Receiver<SessionEvent>,
        wrap: fn(T) -> SessionEvent,
    ) -> SampleSender<T> {
        SampleSender { tx, rx, wrap }
    }

    /// Queues a sample, evicting the oldest queued one if the channel is
    /// full. Returns false if the sample could not be queued.
    ///
    /// The handle keeps the channel open, so sources must drop it on
    /// `unsubscribe`. The coordinator unsubscribes every source when dropped.
    pub fn send(&self, sample: T) -> bool {
        match self.tx.try_send((self.wrap)(sample)) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                // The evicted sample may belong to another stream; each
                // stream only keeps its newest value anyway.
                if self.rx.try_recv().is_ok() {
                    debug!("sample channel full, evicted oldest sample");
                }
                match self.tx.try_send(event) {
                    Ok(()) => true,
                    Err(_) => {
                        warn!("sample channel full, dropping sample");
                        false
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("coordinator gone, sample discarded");
                false
            }
        }
    }
}

/// One-shot reply handle. Dropping it unanswered reports the drop to the
/// coordinator so an in-flight request never hangs.
pub struct Reply<T> {
    tx: Option<Sender<SessionEvent>>,
    request: RequestId,
    wrap: fn(RequestId, Option<T>) -> SessionEvent,
}

pub type ImageReply = Reply<ImageResult>;
pub type StoreReply = Reply<StoreResult>;
pub type ExportReply = Reply<ExportResult>;

impl<T> Reply<T> {
    fn new(
        tx: Sender<SessionEvent>,
        request: RequestId,
        wrap: fn(RequestId, Option<T>) -> SessionEvent,
    ) -> Reply<T> {
        Reply {
            tx: Some(tx),
            request,
            wrap,
        }
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    pub fn send(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            if tx.send((self.wrap)(self.request, Some(value))).is_err() {
                trace!("reply for {} discarded, coordinator gone", self.request);
            }
        }
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send((self.wrap)(self.request, None));
        }
    }
}

impl ImageReply {
    pub(crate) fn for_image(tx: Sender<SessionEvent>, request: RequestId) -> ImageReply {
        Reply::new(tx, request, SessionEvent::image)
    }
}

impl StoreReply {
    pub(crate) fn for_store(tx: Sender<SessionEvent>, request: RequestId) -> StoreReply {
        Reply::new(tx, request, SessionEvent::stored)
    }
}

impl ExportReply {
    pub(crate) fn for_export(tx: Sender<SessionEvent>, request: RequestId) -> ExportReply {
        Reply::new(tx, request, SessionEvent::exported)
    }
}

/// A continuous stream of samples (pose, motion or location).
pub trait SampleSource<T> {
    fn name(&self) -> &'static str;
    fn subscribe(&mut self, sink: SampleSender<T>) -> Result<(), SourceError>;
    fn unsubscribe(&mut self);
}

pub type PoseSource = dyn SampleSource<PoseSample>;
pub type MotionSource = dyn SampleSource<MotionSample>;
pub type LocationSource = dyn SampleSource<LocationSample>;

/// High-resolution still capture. The coordinator never has more than one
/// request outstanding.
pub trait StillImageSource {
    fn capture_image(&mut self, reply: ImageReply);
}

pub trait PersistenceSink {
    fn store(&mut self, record: FusedCaptureRecord, reply: StoreReply);

    fn export_all(&mut self, reply: ExportReply);

    /// Called when a stored capture was aborted before it became a marker.
    fn discard(&mut self, _asset: &StoredAsset) {}

    fn reset_session(&mut self) {}
}

/// The external collaborators a coordinator drives.
pub struct Collaborators {
    pub pose: Box<PoseSource>,
    pub motion: Box<MotionSource>,
    pub location: Box<LocationSource>,
    pub camera: Box<dyn StillImageSource>,
    pub sink: Box<dyn PersistenceSink>,
}
