//! Fake capture device and fake peer transport.
//!
//! `FakeCapture` scripts device availability and can end a screen track
//! externally, like the OS-level "stop sharing" control. `FakeTransport`
//! hands out `FakeLink`s that record every description, candidate and
//! track replacement in receipt order, auto-signal `PathConnected` when a
//! handshake completes, and can fail or recover their media path on
//! demand.

use async_trait::async_trait;
use room_client::media::{
    CaptureError, CaptureEvent, LocalTrack, MediaCapture, TrackId, TrackKind, TrackSource,
};
use room_client::transport::{
    PeerLink, PeerTransport, RemoteTrack, RenegotiationNeed, TransportError, TransportEvent,
    TransportEventKind,
};
use signal_protocol::{CandidateBlob, SessionDescription, SessionId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const CAPTURE_EVENT_BUFFER: usize = 16;

/// Scriptable capture device.
pub struct FakeCapture {
    camera_available: AtomicBool,
    microphone_available: AtomicBool,
    screen_available: AtomicBool,
    screen_held: AtomicBool,
    next_track: AtomicUsize,
    current_screen: Mutex<Option<TrackId>>,
    event_senders: Mutex<Vec<mpsc::Sender<CaptureEvent>>>,
}

impl FakeCapture {
    /// Camera, microphone and screen all available.
    pub fn all_devices() -> Arc<Self> {
        Arc::new(Self::new(true, true, true))
    }

    /// Microphone only.
    pub fn no_camera() -> Arc<Self> {
        Arc::new(Self::new(false, true, true))
    }

    /// Nothing available.
    pub fn no_devices() -> Arc<Self> {
        Arc::new(Self::new(false, false, false))
    }

    fn new(camera: bool, microphone: bool, screen: bool) -> Self {
        Self {
            camera_available: AtomicBool::new(camera),
            microphone_available: AtomicBool::new(microphone),
            screen_available: AtomicBool::new(screen),
            screen_held: AtomicBool::new(false),
            next_track: AtomicUsize::new(0),
            current_screen: Mutex::new(None),
            event_senders: Mutex::new(Vec::new()),
        }
    }

    /// Make later screen acquisitions fail (user cancels the picker).
    pub fn set_screen_available(&self, available: bool) {
        self.screen_available.store(available, Ordering::SeqCst);
    }

    /// Make screen acquisition hang, like an OS permission prompt the
    /// user never answers.
    pub fn hold_screen_acquisition(&self, hold: bool) {
        self.screen_held.store(hold, Ordering::SeqCst);
    }

    /// End the live screen track from outside the client.
    pub async fn end_screen_track(&self) {
        let Some(track_id) = self.current_screen.lock().unwrap().take() else {
            return;
        };
        let senders: Vec<_> = self.event_senders.lock().unwrap().clone();
        for sender in senders {
            let _ = sender
                .send(CaptureEvent::ScreenEnded {
                    track_id: track_id.clone(),
                })
                .await;
        }
    }

    fn make_track(&self, prefix: &str, kind: TrackKind, source: TrackSource) -> LocalTrack {
        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        LocalTrack::new(TrackId(format!("{prefix}-{n}")), kind, source)
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire_camera(&self) -> Result<LocalTrack, CaptureError> {
        if self.camera_available.load(Ordering::SeqCst) {
            Ok(self.make_track("camera", TrackKind::Video, TrackSource::Camera))
        } else {
            Err(CaptureError::DeviceUnavailable("no camera".to_string()))
        }
    }

    async fn acquire_microphone(&self) -> Result<LocalTrack, CaptureError> {
        if self.microphone_available.load(Ordering::SeqCst) {
            Ok(self.make_track("mic", TrackKind::Audio, TrackSource::Microphone))
        } else {
            Err(CaptureError::DeviceUnavailable("no microphone".to_string()))
        }
    }

    async fn acquire_screen(&self) -> Result<LocalTrack, CaptureError> {
        if self.screen_held.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.screen_available.load(Ordering::SeqCst) {
            let track = self.make_track("screen", TrackKind::Video, TrackSource::Screen);
            *self.current_screen.lock().unwrap() = Some(track.id().clone());
            Ok(track)
        } else {
            Err(CaptureError::PermissionDenied(
                "screen picker cancelled".to_string(),
            ))
        }
    }

    fn events(&self) -> mpsc::Receiver<CaptureEvent> {
        let (tx, rx) = mpsc::channel(CAPTURE_EVENT_BUFFER);
        self.event_senders.lock().unwrap().push(tx);
        rx
    }
}

/// Everything one fake link observed, in receipt order.
#[derive(Debug, Default, Clone)]
pub struct LinkRecord {
    pub offers_created: usize,
    /// Remote descriptions applied (offers and answers), in order.
    pub descriptions_received: Vec<String>,
    /// Candidates applied, in order.
    pub candidates_received: Vec<String>,
    /// Video track ids swapped in, in order.
    pub video_replacements: Vec<TrackId>,
    /// Times the outgoing video track was detached with no replacement.
    pub video_removals: usize,
    pub closed: bool,
}

struct LinkShared {
    local: SessionId,
    remote: SessionId,
    record: Mutex<LinkRecord>,
    events: mpsc::Sender<TransportEvent>,
}

struct TransportInner {
    links: Vec<Arc<LinkShared>>,
    renegotiation_need: RenegotiationNeed,
    fail_link_setup: bool,
}

/// Scriptable peer transport; cheap to clone and share with assertions.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransportInner {
                links: Vec::new(),
                renegotiation_need: RenegotiationNeed::None,
                fail_link_setup: false,
            })),
        }
    }

    /// Make `replace_video_track` demand a fresh offer/answer exchange.
    pub fn require_renegotiation(&self, need: RenegotiationNeed) {
        self.inner.lock().unwrap().renegotiation_need = need;
    }

    /// Make later `create_link` calls fail.
    pub fn fail_link_setup(&self, fail: bool) {
        self.inner.lock().unwrap().fail_link_setup = fail;
    }

    /// Number of links ever created.
    pub fn links_created(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }

    /// Number of links not yet closed.
    pub fn open_links(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .links
            .iter()
            .filter(|l| !l.record.lock().unwrap().closed)
            .count()
    }

    /// Record of the newest link to `remote`. Panics if none exists.
    pub fn link_record(&self, remote: &SessionId) -> LinkRecord {
        self.find_link(remote)
            .expect("no link to remote")
            .record
            .lock()
            .unwrap()
            .clone()
    }

    /// Video replacements summed across every link.
    pub fn total_video_replacements(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .links
            .iter()
            .map(|l| l.record.lock().unwrap().video_replacements.len())
            .sum()
    }

    /// Drop the media path to `remote`.
    pub async fn fail_path(&self, remote: &SessionId) {
        self.send_event(remote, TransportEventKind::PathLost).await;
    }

    /// Bring the media path to `remote` back.
    pub async fn recover_path(&self, remote: &SessionId) {
        self.send_event(remote, TransportEventKind::PathRecovered)
            .await;
    }

    /// Surface a remote track on the link to `remote`.
    pub async fn attach_remote_track(&self, remote: &SessionId, track: RemoteTrack) {
        self.send_event(remote, TransportEventKind::RemoteTrackAdded(track))
            .await;
    }

    async fn send_event(&self, remote: &SessionId, kind: TransportEventKind) {
        let Some(link) = self.find_link(remote) else {
            return;
        };
        let _ = link
            .events
            .send(TransportEvent {
                remote: remote.clone(),
                kind,
            })
            .await;
    }

    fn find_link(&self, remote: &SessionId) -> Option<Arc<LinkShared>> {
        self.inner
            .lock()
            .unwrap()
            .links
            .iter()
            .rev()
            .find(|l| &l.remote == remote)
            .cloned()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_link(
        &self,
        local: SessionId,
        remote: SessionId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerLink>, TransportError> {
        let (shared, reneg) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_link_setup {
                return Err(TransportError::Setup("link setup scripted to fail".to_string()));
            }
            let shared = Arc::new(LinkShared {
                local,
                remote,
                record: Mutex::new(LinkRecord::default()),
                events,
            });
            inner.links.push(Arc::clone(&shared));
            (shared, Arc::clone(&self.inner))
        };
        Ok(Box::new(FakeLink {
            shared,
            transport: reneg,
        }))
    }
}

/// One fake pairwise link.
pub struct FakeLink {
    shared: Arc<LinkShared>,
    transport: Arc<Mutex<TransportInner>>,
}

impl FakeLink {
    async fn signal_path_connected(&self) {
        let event = TransportEvent {
            remote: self.shared.remote.clone(),
            kind: TransportEventKind::PathConnected,
        };
        let _ = self.shared.events.send(event).await;
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(
        &mut self,
        _tracks: &[LocalTrack],
    ) -> Result<SessionDescription, TransportError> {
        let mut record = self.shared.record.lock().unwrap();
        if record.closed {
            return Err(TransportError::Closed);
        }
        record.offers_created += 1;
        Ok(SessionDescription(format!(
            "offer:{}->{}:{}",
            self.shared.local, self.shared.remote, record.offers_created
        )))
    }

    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
        _tracks: &[LocalTrack],
    ) -> Result<SessionDescription, TransportError> {
        {
            let mut record = self.shared.record.lock().unwrap();
            if record.closed {
                return Err(TransportError::Closed);
            }
            record.descriptions_received.push(offer.0);
        }
        // The answerer's handshake is complete once the offer is applied
        self.signal_path_connected().await;
        Ok(SessionDescription(format!(
            "answer:{}->{}",
            self.shared.local, self.shared.remote
        )))
    }

    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), TransportError> {
        {
            let mut record = self.shared.record.lock().unwrap();
            if record.closed {
                return Err(TransportError::Closed);
            }
            record.descriptions_received.push(answer.0);
        }
        // The offerer's handshake is complete once the answer lands
        self.signal_path_connected().await;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: CandidateBlob) -> Result<(), TransportError> {
        let mut record = self.shared.record.lock().unwrap();
        if record.closed {
            return Err(TransportError::Closed);
        }
        record.candidates_received.push(candidate.0);
        Ok(())
    }

    async fn replace_video_track(
        &mut self,
        new: LocalTrack,
    ) -> Result<RenegotiationNeed, TransportError> {
        {
            let mut record = self.shared.record.lock().unwrap();
            if record.closed {
                return Err(TransportError::Closed);
            }
            record.video_replacements.push(new.id().clone());
        }
        Ok(self.transport.lock().unwrap().renegotiation_need)
    }

    async fn remove_video_track(&mut self) -> Result<RenegotiationNeed, TransportError> {
        {
            let mut record = self.shared.record.lock().unwrap();
            if record.closed {
                return Err(TransportError::Closed);
            }
            record.video_removals += 1;
        }
        Ok(self.transport.lock().unwrap().renegotiation_need)
    }

    async fn close(&mut self) {
        self.shared.record.lock().unwrap().closed = true;
    }
}
