//! Capture coordination: session lifecycle, sample marshalling and the
//! two-phase capture pipeline (still image, then storage, then marker).
//!
//! The coordinator lives on one thread. Collaborators push into channels
//! from wherever they run and [`CaptureCoordinator::pump`] applies the
//! queued events in order, so all canvas mutation and every completion
//! happens on the owning thread.

pub mod record;
pub mod state;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, info, trace, warn};
use rand::Rng;
use time::OffsetDateTime;

use crate::canvas::SpatialCanvas;
use crate::config::SessionConfig;
use crate::error::{CanvasError, CaptureError, ImageCaptureError, PersistenceError};
use crate::sources::{
    Collaborators, ExportReply, ExportResult, ImageReply, ImageResult, LocationSource,
    MotionSource, PersistenceSink, PoseSource, RequestId, SampleSender, SessionEvent,
    StillImageSource, StoreReply, StoreResult, StoredAsset,
};
use crate::types::{
    AnchorFrame, LocationSample, MarkerId, MotionSample, PhotoMarker, PoseSample, RelativePose,
    Thumbnail,
};

pub use record::{CaptureMetadata, FrozenInputs, FusedCaptureRecord, MotionMetadata};
pub use state::SessionState;

pub type CaptureCompletion = Box<dyn FnOnce(Result<PhotoMarker, CaptureError>)>;
pub type ExportCompletion = Box<dyn FnOnce(ExportResult)>;

/// Upward notifications for the UI. All methods default to no-ops.
pub trait SessionObserver {
    fn on_state_changed(&self, _state: SessionState) {}
    fn on_preview_pose_changed(&self, _relative: &RelativePose) {}
    fn on_scan_quality_changed(&self, _ready: bool) {}
    fn on_markers_changed(&self, _markers: &[PhotoMarker]) {}
    fn on_capture_completed(&self, _result: &Result<PhotoMarker, CaptureError>) {}
    fn on_export_completed(&self, _result: &ExportResult) {}
}

/// What survives from a record once the sink owns the image.
struct PendingMarker {
    id: MarkerId,
    relative: RelativePose,
    thumbnail: Thumbnail,
    captured_at: OffsetDateTime,
    metadata: CaptureMetadata,
}

enum CapturePhase {
    AwaitingImage,
    Storing(PendingMarker),
}

struct InFlightCapture {
    request: RequestId,
    epoch: u64,
    inputs: FrozenInputs,
    phase: CapturePhase,
    completion: CaptureCompletion,
}

pub struct CaptureCoordinator {
    config: SessionConfig,
    canvas: SpatialCanvas,
    pose_source: Box<PoseSource>,
    motion_source: Box<MotionSource>,
    location_source: Box<LocationSource>,
    camera: Box<dyn StillImageSource>,
    sink: Box<dyn PersistenceSink>,
    samples_tx: Sender<SessionEvent>,
    samples_rx: Receiver<SessionEvent>,
    replies_tx: Sender<SessionEvent>,
    replies_rx: Receiver<SessionEvent>,
    state: SessionState,
    services_running: bool,
    latest_pose: Option<PoseSample>,
    latest_motion: Option<MotionSample>,
    latest_location: Option<LocationSample>,
    scan_ready: bool,
    in_flight: Option<InFlightCapture>,
    pending_exports: HashMap<RequestId, ExportCompletion>,
    /// Bumped on every reset; results from an older epoch never commit.
    epoch: u64,
    next_request: u64,
    next_marker_seq: u64,
    id_prefix: String,
    photo_count: usize,
    captures: Vec<CaptureMetadata>,
    observer: Option<Weak<dyn SessionObserver>>,
}

impl CaptureCoordinator {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> CaptureCoordinator {
        let (samples_tx, samples_rx) = bounded(config.event_capacity.max(1));
        let (replies_tx, replies_rx) = unbounded();
        let id_prefix = config
            .marker_id_prefix
            .clone()
            .unwrap_or_else(|| format!("{:08x}", rand::rng().random::<u32>()));
        CaptureCoordinator {
            config,
            canvas: SpatialCanvas::new(),
            pose_source: collaborators.pose,
            motion_source: collaborators.motion,
            location_source: collaborators.location,
            camera: collaborators.camera,
            sink: collaborators.sink,
            samples_tx,
            samples_rx,
            replies_tx,
            replies_rx,
            state: SessionState::Idle,
            services_running: false,
            latest_pose: None,
            latest_motion: None,
            latest_location: None,
            scan_ready: false,
            in_flight: None,
            pending_exports: HashMap::new(),
            epoch: 0,
            next_request: 0,
            next_marker_seq: 0,
            id_prefix,
            photo_count: 0,
            captures: Vec::new(),
            observer: None,
        }
    }

    /// Registers the single observer. The coordinator does not keep it alive.
    pub fn set_observer(&mut self, observer: Weak<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.services_running
    }

    pub fn canvas(&self) -> &SpatialCanvas {
        &self.canvas
    }

    pub fn markers(&self) -> Vec<PhotoMarker> {
        self.canvas.markers()
    }

    /// Number of captures committed since the last reset.
    pub fn photo_count(&self) -> usize {
        self.photo_count
    }

    /// Metadata of every capture committed since the last reset.
    pub fn captures(&self) -> &[CaptureMetadata] {
        &self.captures
    }

    pub fn latest_pose(&self) -> Option<&PoseSample> {
        self.latest_pose.as_ref()
    }

    pub fn scan_ready(&self) -> bool {
        self.scan_ready
    }

    /// True while a still-image or storage request is outstanding, including
    /// one left over from a reset session.
    pub fn has_capture_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn start_services(&mut self) -> Result<(), CaptureError> {
        if self.services_running {
            trace!("services already running");
            return Ok(());
        }
        self.pose_source
            .subscribe(SampleSender::new(
                self.samples_tx.clone(),
                self.samples_rx.clone(),
                SessionEvent::Pose,
            ))?;
        if let Err(e) = self
            .motion_source
            .subscribe(SampleSender::new(
                self.samples_tx.clone(),
                self.samples_rx.clone(),
                SessionEvent::Motion,
            ))
        {
            warn!("continuing without motion samples: {}", e);
        }
        if let Err(e) = self
            .location_source
            .subscribe(SampleSender::new(
                self.samples_tx.clone(),
                self.samples_rx.clone(),
                SessionEvent::Location,
            ))
        {
            warn!("continuing without location samples: {}", e);
        }
        self.services_running = true;
        info!("services started");
        self.set_state(self.state.started());
        Ok(())
    }

    /// Starts the streams and restores an anchor from a previously saved map,
    /// skipping the scanning phase.
    pub fn start_services_with_anchor(&mut self, anchor: AnchorFrame) -> Result<(), CaptureError> {
        if self.canvas.is_initialized() {
            return Err(CanvasError::AlreadyInitialized.into());
        }
        self.start_services()?;
        self.canvas.initialize_anchor(anchor)?;
        self.refresh_preview();
        self.set_state(SessionState::Active);
        Ok(())
    }

    /// Halts the streams. The anchor and markers are kept.
    pub fn stop_services(&mut self) {
        if !self.services_running {
            return;
        }
        self.pose_source.unsubscribe();
        self.motion_source.unsubscribe();
        self.location_source.unsubscribe();
        self.services_running = false;
        info!("services stopped");
        self.set_state(self.state.stopped());
    }

    /// Accepts `anchor` as the session origin. Only valid while scanning.
    pub fn place_anchor(&mut self, anchor: AnchorFrame) -> Result<(), CaptureError> {
        match self.state {
            SessionState::Scanning => {}
            SessionState::Active | SessionState::Capturing => {
                return Err(CanvasError::AlreadyInitialized.into());
            }
            SessionState::Idle => {
                return Err(CaptureError::InvalidState {
                    expected: "scanning",
                    found: self.state,
                });
            }
        }
        if self.config.require_scan_quality && !self.scan_ready {
            return Err(CaptureError::ScanInsufficient);
        }
        self.canvas.initialize_anchor(anchor)?;
        self.refresh_preview();
        self.set_state(SessionState::Active);
        Ok(())
    }

    /// Places the anchor where the device currently is.
    pub fn place_anchor_at_current_pose(&mut self) -> Result<AnchorFrame, CaptureError> {
        let pose = self.latest_pose.ok_or(CaptureError::NoPose)?;
        let anchor = AnchorFrame::new(pose.pose.transform);
        self.place_anchor(anchor)?;
        Ok(anchor)
    }

    /// Starts a capture. State errors are returned immediately and the
    /// completion is dropped; otherwise the completion runs from a later
    /// [`pump`](Self::pump) with the committed marker or the failure.
    pub fn capture_photo<F>(&mut self, completion: F) -> Result<RequestId, CaptureError>
    where
        F: FnOnce(Result<PhotoMarker, CaptureError>) + 'static,
    {
        match self.state {
            SessionState::Capturing => return Err(CaptureError::Busy),
            SessionState::Idle | SessionState::Scanning => return Err(CaptureError::NoAnchor),
            SessionState::Active => {}
        }
        if self.in_flight.is_some() {
            debug!("still-image request from a previous session is outstanding");
            return Err(CaptureError::Busy);
        }
        let pose = self.latest_pose.ok_or(CaptureError::NoPose)?;
        let inputs = FrozenInputs {
            pose,
            motion: self.latest_motion,
            location: self.latest_location,
        };
        if inputs.motion.is_none() {
            debug!("capturing without a motion sample");
        }
        if inputs.location.is_none() {
            debug!("capturing without a location sample");
        }
        if let Some((lag, stream)) = inputs.pose_lag() {
            if lag > self.config.max_pose_age_secs {
                warn!("frozen pose is {:.3}s older than the latest {} sample", lag, stream);
            }
        }

        let request = self.next_request_id();
        self.in_flight = Some(InFlightCapture {
            request,
            epoch: self.epoch,
            inputs,
            phase: CapturePhase::AwaitingImage,
            completion: Box::new(completion),
        });
        self.set_state(SessionState::Capturing);
        debug!("capture {} requested at t={:.3}", request, pose.pose.timestamp);
        self.camera
            .capture_image(ImageReply::for_image(self.replies_tx.clone(), request));
        Ok(request)
    }

    /// Tears the session down to `Idle`: streams stop, anchor and markers are
    /// cleared. An in-flight capture is left to finish and will abort.
    pub fn reset_session(&mut self) {
        self.stop_services();
        self.canvas.reset();
        self.epoch += 1;
        self.photo_count = 0;
        self.captures.clear();
        self.latest_pose = None;
        self.latest_motion = None;
        self.latest_location = None;
        let dropped = self.samples_rx.try_iter().count();
        if dropped > 0 {
            trace!("discarded {} queued samples on reset", dropped);
        }
        if self.scan_ready {
            self.scan_ready = false;
            self.notify(|o| o.on_scan_quality_changed(false));
        }
        self.sink.reset_session();
        info!("session reset (epoch {})", self.epoch);
        self.set_state(SessionState::Idle);
        self.notify(|o| o.on_markers_changed(&[]));
    }

    /// Replaces the thumbnail and asset metadata of an existing marker.
    pub fn update_marker(&mut self, marker: &PhotoMarker) -> Result<(), CaptureError> {
        self.canvas.update_marker(marker)?;
        self.notify_markers();
        Ok(())
    }

    /// Unknown ids are ignored. Returns whether a marker was removed.
    pub fn remove_marker(&mut self, id: &MarkerId) -> bool {
        let removed = self.canvas.remove_marker(id);
        if removed {
            self.notify_markers();
        }
        removed
    }

    /// Asks the sink to package the session. The completion runs from a
    /// later [`pump`](Self::pump).
    pub fn export_session<F>(&mut self, completion: F) -> RequestId
    where
        F: FnOnce(ExportResult) + 'static,
    {
        let request = self.next_request_id();
        self.pending_exports.insert(request, Box::new(completion));
        self.sink
            .export_all(ExportReply::for_export(self.replies_tx.clone(), request));
        request
    }

    /// Applies every queued event in delivery order. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        for _ in 0..self.samples_rx.len() {
            match self.samples_rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
            handled += 1;
        }
        while let Ok(event) = self.replies_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for the first event, then drains the queues.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let first = crossbeam_channel::select! {
            recv(self.replies_rx) -> event => event.ok(),
            recv(self.samples_rx) -> event => event.ok(),
            default(timeout) => None,
        };
        let mut handled = 0;
        if let Some(event) = first {
            self.handle_event(event);
            handled += 1;
        }
        handled + self.pump()
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Pose(sample) => self.apply_pose(sample),
            SessionEvent::Motion(sample) => self.latest_motion = Some(sample),
            SessionEvent::Location(sample) => self.latest_location = Some(sample),
            SessionEvent::Image { request, result } => {
                let result = result.unwrap_or(Err(ImageCaptureError::Dropped));
                self.on_image(request, result);
            }
            SessionEvent::Stored { request, result } => {
                let result = result.unwrap_or_else(|| {
                    Err(PersistenceError::Unavailable(
                        "store request dropped".to_string(),
                    ))
                });
                self.on_stored(request, result);
            }
            SessionEvent::Exported { request, result } => {
                let result = result.unwrap_or_else(|| {
                    Err(PersistenceError::Unavailable(
                        "export request dropped".to_string(),
                    ))
                });
                self.on_exported(request, result);
            }
        }
    }

    fn apply_pose(&mut self, sample: PoseSample) {
        if let Some(latest) = &self.latest_pose {
            if sample.pose.timestamp <= latest.pose.timestamp {
                debug!(
                    "dropping out-of-order pose t={:.4} (latest t={:.4})",
                    sample.pose.timestamp, latest.pose.timestamp
                );
                return;
            }
        }
        self.latest_pose = Some(sample);
        if sample.scan_ready != self.scan_ready {
            self.scan_ready = sample.scan_ready;
            debug!("scan quality changed: {}", self.scan_ready);
            self.notify(|o| o.on_scan_quality_changed(sample.scan_ready));
        }
        self.refresh_preview();
    }

    fn refresh_preview(&mut self) {
        let Some(sample) = self.latest_pose else {
            return;
        };
        if let Some(relative) = self.canvas.update_preview_pose(&sample.pose) {
            self.notify(|o| o.on_preview_pose_changed(&relative));
        }
    }

    fn on_image(&mut self, request: RequestId, result: ImageResult) {
        let Some(capture) = self.take_in_flight(request) else {
            return;
        };
        if capture.epoch != self.epoch {
            self.finish(capture, Err(CaptureError::Aborted));
            return;
        }
        let image = match result {
            Ok(image) => image,
            Err(e) => {
                warn!("capture {} failed: {}", request, e);
                self.finish(capture, Err(e.into()));
                return;
            }
        };
        let Some(anchor) = self.canvas.anchor().copied() else {
            self.finish(capture, Err(CaptureError::Aborted));
            return;
        };
        let id = self.allocate_marker_id();
        let captured_at = OffsetDateTime::now_utc();
        let record = FusedCaptureRecord::assemble(
            id,
            &anchor,
            capture.inputs,
            image,
            self.config.thumbnail_max_edge,
            captured_at,
        );
        let pending = PendingMarker {
            id: record.id.clone(),
            relative: record.relative,
            thumbnail: record.thumbnail.clone(),
            captured_at,
            metadata: record.metadata.clone(),
        };
        debug!("capture {} fused as {}, storing", request, pending.id);
        self.in_flight = Some(InFlightCapture {
            phase: CapturePhase::Storing(pending),
            ..capture
        });
        self.sink
            .store(record, StoreReply::for_store(self.replies_tx.clone(), request));
    }

    fn on_stored(&mut self, request: RequestId, result: StoreResult) {
        let Some(mut capture) = self.take_in_flight(request) else {
            return;
        };
        let pending = match std::mem::replace(&mut capture.phase, CapturePhase::AwaitingImage) {
            CapturePhase::Storing(pending) => pending,
            CapturePhase::AwaitingImage => {
                error!("storage result for capture {} before its image", request);
                if let Ok(asset) = &result {
                    self.sink.discard(asset);
                }
                self.finish(
                    capture,
                    Err(PersistenceError::Unavailable("unexpected storage result".to_string()).into()),
                );
                return;
            }
        };
        if !self.is_current(&capture) {
            if let Ok(asset) = &result {
                self.sink.discard(asset);
            }
            self.finish(capture, Err(CaptureError::Aborted));
            return;
        }
        let asset = match result {
            Ok(asset) => asset,
            Err(e) => {
                warn!("storing {} failed: {}", pending.id, e);
                self.finish(capture, Err(e.into()));
                return;
            }
        };
        self.commit(capture, pending, asset);
    }

    fn commit(&mut self, capture: InFlightCapture, pending: PendingMarker, asset: StoredAsset) {
        let marker = PhotoMarker::new(
            pending.id,
            pending.relative,
            pending.thumbnail,
            pending.captured_at,
            asset.image_path.clone(),
        );
        if let Err(e) = self.canvas.add_marker(marker.clone()) {
            error!("marker {} rejected by canvas: {}", marker.id(), e);
            self.sink.discard(&asset);
            self.finish(capture, Err(e.into()));
            return;
        }
        let mut metadata = pending.metadata;
        metadata.image_path = Some(asset.image_path);
        self.captures.push(metadata);
        self.photo_count += 1;
        let p = marker.relative_position();
        info!(
            "captured {} at ({:.3}, {:.3}, {:.3}), {} in session",
            marker.id(),
            p.x,
            p.y,
            p.z,
            self.photo_count
        );
        self.notify_markers();
        self.finish(capture, Ok(marker));
    }

    fn on_exported(&mut self, request: RequestId, result: ExportResult) {
        match &result {
            Ok(path) => info!("session exported to {}", path.display()),
            Err(e) => warn!("export {} failed: {}", request, e),
        }
        self.notify(|o| o.on_export_completed(&result));
        match self.pending_exports.remove(&request) {
            Some(completion) => completion(result),
            None => warn!("export result {} has no pending request", request),
        }
    }

    fn take_in_flight(&mut self, request: RequestId) -> Option<InFlightCapture> {
        match self.in_flight.take() {
            Some(capture) if capture.request == request => Some(capture),
            other => {
                warn!("ignoring result for unknown capture {}", request);
                self.in_flight = other;
                None
            }
        }
    }

    fn is_current(&self, capture: &InFlightCapture) -> bool {
        capture.epoch == self.epoch && self.canvas.is_initialized()
    }

    fn finish(&mut self, capture: InFlightCapture, result: Result<PhotoMarker, CaptureError>) {
        if result.as_ref().is_err_and(|e| e.is_cancellation()) {
            debug!("capture {} aborted by reset", capture.request);
        }
        if capture.epoch == self.epoch && self.state == SessionState::Capturing {
            self.set_state(SessionState::Active);
        }
        self.notify(|o| o.on_capture_completed(&result));
        (capture.completion)(result);
    }

    fn allocate_marker_id(&mut self) -> MarkerId {
        self.next_marker_seq += 1;
        MarkerId::new(format!("{}-{:04}", self.id_prefix, self.next_marker_seq))
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("session state {} -> {}", self.state, state);
        self.state = state;
        self.notify(|o| o.on_state_changed(state));
    }

    fn notify_markers(&self) {
        if let Some(observer) = self.upgraded_observer() {
            observer.on_markers_changed(&self.canvas.markers());
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn SessionObserver)) {
        if let Some(observer) = self.upgraded_observer() {
            f(observer.as_ref());
        }
    }

    fn upgraded_observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.observer.as_ref().and_then(|o| o.upgrade())
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.stop_services();
    }
}
