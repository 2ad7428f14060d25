//! The controller task. Owns every piece of per-participant session state
//! and applies commands, permission results, match detections, queue
//! notices and peer events one at a time.

use std::sync::Arc;

use spark_common::{
    MatchNotice, Notification, NotificationQueue, ParticipantId, QueueStatus, RoomId, SessionError,
};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detector::{first_match, Detection, Found};
use super::types::{Command, ControllerConfig, ControllerEvent, Phase, Reply, Services};
use crate::media::{MediaConstraints, MediaStream, PermissionFlow, PermissionOutcome, TrackKind};
use crate::peer::{start_session, PeerEvent, PeerHandle, PeerParams, PeerState};
use crate::subscription::Subscription;

const MAX_NOTIFICATIONS: usize = 8;

/// Result of a background media request.
pub(super) struct Acquired {
    attempt: u32,
    result: Result<MediaStream, SessionError>,
}

type SearchOutput = (Option<Detection>, Subscription<MatchNotice>);

struct Search {
    cancel: CancellationToken,
    task: JoinHandle<SearchOutput>,
}

struct ActivePeer {
    handle: PeerHandle,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    room_id: RoomId,
}

pub(super) struct Controller {
    config: ControllerConfig,
    services: Services,
    events: mpsc::Sender<ControllerEvent>,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    participant: Option<ParticipantId>,

    permission: PermissionFlow,
    acquired_tx: mpsc::UnboundedSender<Acquired>,
    /// Granted media not yet handed to a peer session.
    media: Option<MediaStream>,
    pending_start: Option<Reply>,
    /// A match was detected before media was ready.
    awaiting_media: bool,

    /// Held here whenever no search task owns it.
    notices: Option<Subscription<MatchNotice>>,
    search: Option<Search>,
    peer: Option<ActivePeer>,

    audio_enabled: bool,
    video_enabled: bool,
    notifications: NotificationQueue,
}

impl Controller {
    pub(super) fn new(
        config: ControllerConfig,
        services: Services,
        events: mpsc::Sender<ControllerEvent>,
        phase_tx: watch::Sender<Phase>,
        acquired_tx: mpsc::UnboundedSender<Acquired>,
    ) -> Self {
        let audio_enabled = !config.media.start_audio_muted;
        Self {
            config,
            services,
            events,
            phase: Phase::NotStarted,
            phase_tx,
            participant: None,
            permission: PermissionFlow::new(),
            acquired_tx,
            media: None,
            pending_start: None,
            awaiting_media: false,
            notices: None,
            search: None,
            peer: None,
            audio_enabled,
            video_enabled: true,
            notifications: NotificationQueue::new(MAX_NOTIFICATIONS),
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut acquired: mpsc::UnboundedReceiver<Acquired>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!(event_id = %self.config.event_id, "Room handle dropped");
                        self.leave().await;
                        break;
                    }
                },
                Some(done) = acquired.recv() => self.on_acquired(done).await,
                finished = search_finished(&mut self.search) => {
                    self.search = None;
                    self.on_search_finished(finished).await;
                }
                notice = next_notice(&mut self.notices) => self.on_notice(notice).await,
                event = next_peer_event(&mut self.peer) => self.on_peer_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.start(reply).await,
            Command::Next(reply) => {
                let result = self.next().await;
                let _ = reply.send(result);
            }
            Command::Leave(reply) => {
                self.leave().await;
                let _ = reply.send(());
            }
            Command::Toggle(kind, reply) => {
                let enabled = self.toggle(kind).await;
                let _ = reply.send(enabled);
            }
            Command::Notifications(reply) => {
                let visible = self.notifications.visible().into_iter().cloned().collect();
                let _ = reply.send(visible);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    async fn start(&mut self, reply: Reply) {
        if self.phase != Phase::NotStarted {
            let _ = reply.send(Ok(()));
            return;
        }
        if self.permission.is_requesting() {
            // The newest caller hears the outcome; the older one resolves quietly.
            self.pending_start = Some(reply);
            return;
        }

        let Some(profile) = self.services.identity.current().await else {
            self.reject_start(reply, SessionError::NotSignedIn).await;
            return;
        };
        if !self.services.tickets.has_ticket(&self.config.event_id).await {
            let err = SessionError::NoTicket(self.config.event_id.clone());
            self.reject_start(reply, err).await;
            return;
        }
        self.participant = Some(profile.participant_id.clone());

        if self.media.is_some() {
            let result = self.enter_queue().await;
            let _ = reply.send(result);
            return;
        }
        self.pending_start = Some(reply);
        self.request_media().await;
    }

    async fn reject_start(&mut self, reply: Reply, err: SessionError) {
        info!(event_id = %self.config.event_id, error = %err, "Start refused");
        self.notify(Notification::from_error(&err)).await;
        let _ = reply.send(Err(err));
    }

    async fn request_media(&mut self) {
        let Some(attempt) = self.permission.begin() else {
            return;
        };
        self.emit(ControllerEvent::Permission(self.permission.state().clone()))
            .await;

        let devices = Arc::clone(&self.services.devices);
        let constraints = MediaConstraints::from(&self.config.media);
        let tx = self.acquired_tx.clone();
        tokio::spawn(async move {
            let result = devices.acquire(constraints).await;
            // Nobody left to hand the stream to: release the devices here.
            if let Err(mpsc::error::SendError(Acquired {
                result: Ok(stream), ..
            })) = tx.send(Acquired { attempt, result })
            {
                stream.stop_all();
            }
        });
    }

    async fn on_acquired(&mut self, done: Acquired) {
        match self.permission.resolve(done.attempt, done.result) {
            PermissionOutcome::Granted(stream) => {
                stream.set_enabled(TrackKind::Audio, self.audio_enabled);
                stream.set_enabled(TrackKind::Video, self.video_enabled);
                self.emit(ControllerEvent::Permission(self.permission.state().clone()))
                    .await;
                self.emit(ControllerEvent::LocalStream(stream.clone())).await;
                self.media = Some(stream);

                if let Some(reply) = self.pending_start.take() {
                    let result = self.enter_queue().await;
                    let _ = reply.send(result);
                } else if self.awaiting_media {
                    self.awaiting_media = false;
                    self.confirm_match().await;
                }
            }
            PermissionOutcome::Denied(err) => {
                warn!(event_id = %self.config.event_id, error = %err, "Media request failed");
                self.emit(ControllerEvent::Permission(self.permission.state().clone()))
                    .await;
                self.notify(Notification::from_error(&err)).await;
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Err(err));
                } else if self.phase == Phase::Searching {
                    // No media for the next partner: step out until the user retries.
                    self.stop_search().await;
                    self.awaiting_media = false;
                    self.leave_queue().await;
                    self.set_phase(Phase::NotStarted).await;
                }
            }
            PermissionOutcome::Discarded => {}
        }
    }

    /// Join the queue and start watching for a match.
    async fn enter_queue(&mut self) -> Result<(), SessionError> {
        if let Err(err) = self.requeue().await {
            warn!(event_id = %self.config.event_id, error = %err, "Join failed");
            if let Some(media) = self.media.take() {
                media.stop_all();
            }
            self.permission.release();
            self.notify(Notification::from_error(&err)).await;
            return Err(err);
        }
        self.set_phase(Phase::Searching).await;
        self.begin_search().await;
        Ok(())
    }

    async fn requeue(&self) -> Result<(), SessionError> {
        let event_id = &self.config.event_id;
        let joined = self.services.queue.join(event_id).await?;
        debug!(event_id = %event_id, status = ?joined.status, "Joined queue");
        if self.config.search.trigger_on_join && !joined.matched {
            // Best-effort; polling still finds matches made by anyone else.
            if let Err(e) = self.services.queue.trigger_match(event_id).await {
                warn!(event_id = %event_id, error = %e, "Matching pass failed");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Searching
    // -----------------------------------------------------------------------

    async fn begin_search(&mut self) {
        if self.search.is_some() {
            return;
        }
        let Some(participant) = self.participant.clone() else {
            return;
        };
        let mut notices = match self.notices.take() {
            Some(n) => n,
            None => {
                match self
                    .services
                    .notices
                    .subscribe(&self.config.event_id, &participant)
                    .await
                {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Queue subscription failed; polling only");
                        let (_tx, rx) = mpsc::unbounded_channel();
                        Subscription::detached(rx)
                    }
                }
            }
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let queue = Arc::clone(&self.services.queue);
        let event_id = self.config.event_id.clone();
        let every = self.config.poll_interval();
        let task = tokio::spawn(async move {
            let found = first_match(queue.as_ref(), &mut notices, &event_id, every, &token).await;
            (found, notices)
        });
        self.search = Some(Search { cancel, task });
    }

    async fn stop_search(&mut self) {
        let Some(search) = self.search.take() else {
            return;
        };
        search.cancel.cancel();
        if let Ok((_, notices)) = search.task.await {
            self.notices = Some(notices);
        }
    }

    async fn on_search_finished(&mut self, finished: Result<SearchOutput, JoinError>) {
        match finished {
            Ok((found, notices)) => {
                self.notices = Some(notices);
                if self.phase != Phase::Searching {
                    return;
                }
                match found {
                    Some(Detection { found: Found::Matched(_), .. }) => self.confirm_match().await,
                    Some(Detection { found: Found::Dropped, .. }) => self.rejoin().await,
                    None => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Match detector ended abnormally");
                if self.phase == Phase::Searching {
                    self.begin_search().await;
                }
            }
        }
    }

    /// Read the authoritative status for the room and partner, then connect.
    async fn confirm_match(&mut self) {
        let status = match self.services.queue.status(&self.config.event_id).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Status read after match failed");
                self.begin_search().await;
                return;
            }
        };
        match (status.status, status.room_id, status.partner_id) {
            (QueueStatus::Matched, Some(room_id), Some(partner)) => {
                self.connect(room_id, partner).await;
            }
            (QueueStatus::NotInQueue, ..) => self.rejoin().await,
            _ => {
                debug!("Match no longer current; searching again");
                self.begin_search().await;
            }
        }
    }

    /// The queue lost us while searching; join again and keep looking.
    async fn rejoin(&mut self) {
        info!(event_id = %self.config.event_id, "Dropped from the queue; rejoining");
        if let Err(e) = self.requeue().await {
            warn!(error = %e, "Rejoin failed");
        }
        self.begin_search().await;
    }

    // -----------------------------------------------------------------------
    // Connected
    // -----------------------------------------------------------------------

    async fn connect(&mut self, room_id: RoomId, partner: ParticipantId) {
        let Some(participant) = self.participant.clone() else {
            return;
        };
        let Some(stream) = self.media.take() else {
            self.awaiting_media = true;
            self.request_media().await;
            return;
        };

        let mut params = PeerParams::new(room_id.clone(), participant, partner.clone(), &self.config.peer);
        params.start_audio_muted = !self.audio_enabled;
        let started = start_session(
            params,
            stream,
            Arc::clone(&self.services.relay),
            self.services.connections.as_ref(),
        )
        .await;

        match started {
            Ok((handle, events)) => {
                info!(room_id = %room_id, partner = %partner, role = ?handle.role(), "Matched");
                let role = handle.role();
                self.peer = Some(ActivePeer {
                    handle,
                    events,
                    room_id: room_id.clone(),
                });
                self.set_phase(Phase::Connected).await;
                self.emit(ControllerEvent::Matched {
                    room_id,
                    partner,
                    role,
                })
                .await;
            }
            Err(err) => {
                self.permission.release();
                self.session_failed(err).await;
            }
        }
    }

    async fn on_notice(&mut self, notice: Option<MatchNotice>) {
        let Some(notice) = notice else {
            debug!("Queue notices closed");
            self.notices = None;
            return;
        };
        let Some(peer) = &self.peer else {
            return;
        };
        let ours = notice.is_matched && notice.current_room_id.as_ref() == Some(&peer.room_id);
        if !ours {
            self.check_partner().await;
        }
    }

    async fn on_peer_event(&mut self, event: Option<PeerEvent>) {
        let Some(event) = event else {
            if self.peer.is_some() {
                let err = SessionError::NegotiationFailure("peer session ended".into());
                self.session_failed(err).await;
            }
            return;
        };
        match event {
            PeerEvent::State(state) => {
                self.emit(ControllerEvent::Peer(state)).await;
                if state == PeerState::Disconnected {
                    self.check_partner().await;
                }
            }
            PeerEvent::RemoteStream(stream) => {
                self.emit(ControllerEvent::RemoteStream(stream)).await;
            }
            PeerEvent::Failed(err) => self.session_failed(err).await,
            PeerEvent::Connection(_) | PeerEvent::Closed => {}
        }
    }

    /// Queue status decides whether the partner is really gone. If the room
    /// is still ours the peer session keeps trying until its deadline.
    async fn check_partner(&mut self) {
        let Some(room_id) = self.peer.as_ref().map(|p| p.room_id.clone()) else {
            return;
        };
        match self.services.queue.status(&self.config.event_id).await {
            Ok(status)
                if status.status == QueueStatus::Matched
                    && status.room_id.as_ref() == Some(&room_id) => {}
            Ok(_) => self.partner_left().await,
            Err(e) => warn!(room_id = %room_id, error = %e, "Status read failed"),
        }
    }

    async fn partner_left(&mut self) {
        let Some(room_id) = self.close_peer().await else {
            return;
        };
        info!(room_id = %room_id, "Partner left");
        self.emit(ControllerEvent::PartnerLeft { room_id }).await;
        self.notify(Notification::info("Your partner left. Finding someone new..."))
            .await;
        if let Err(e) = self.requeue().await {
            warn!(error = %e, "Rejoin failed");
        }
        self.resume_search().await;
    }

    /// Terminal peer failure: tell the user and move on to the next partner.
    async fn session_failed(&mut self, err: SessionError) {
        self.close_peer().await;
        warn!(event_id = %self.config.event_id, error = %err, "Peer session failed");
        self.notify(Notification::from_error(&err)).await;
        if let Err(e) = self.services.queue.next_match(&self.config.event_id).await {
            warn!(error = %e, "Next match failed");
            if let Err(e) = self.requeue().await {
                warn!(error = %e, "Rejoin failed");
            }
        }
        self.resume_search().await;
    }

    async fn resume_search(&mut self) {
        self.set_phase(Phase::Searching).await;
        self.request_media().await;
        self.begin_search().await;
    }

    /// Tear down the active session and wait until its media is released.
    async fn close_peer(&mut self) -> Option<RoomId> {
        let peer = self.peer.take()?;
        peer.handle.close().await;
        self.permission.release();
        Some(peer.room_id)
    }

    // -----------------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------------

    async fn next(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Connected {
            return Ok(());
        }
        self.close_peer().await;
        let result = match self.services.queue.next_match(&self.config.event_id).await {
            Ok(r) => {
                debug!(matched = r.matched, "Next match requested");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Next match failed");
                if let Err(e) = self.requeue().await {
                    warn!(error = %e, "Rejoin failed");
                }
                Err(err)
            }
        };
        self.resume_search().await;
        result
    }

    /// Idempotent; from any phase ends in `Terminated` with media released
    /// and the queue entry gone.
    async fn leave(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        let was_queued = matches!(self.phase, Phase::Searching | Phase::Connected);

        // A prompt still open resolves later and is discarded.
        self.permission.cancel();
        self.pending_start = None;
        self.awaiting_media = false;
        self.stop_search().await;
        self.close_peer().await;
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        self.permission.release();
        if was_queued {
            self.leave_queue().await;
        }
        if let Some(notices) = self.notices.take() {
            notices.unsubscribe();
        }
        self.set_phase(Phase::Terminated).await;
    }

    async fn leave_queue(&self) {
        if let Err(e) = self.services.queue.leave(&self.config.event_id).await {
            warn!(event_id = %self.config.event_id, error = %e, "Leave failed");
        }
    }

    async fn toggle(&mut self, kind: TrackKind) -> bool {
        let enabled = match kind {
            TrackKind::Audio => {
                self.audio_enabled = !self.audio_enabled;
                self.audio_enabled
            }
            TrackKind::Video => {
                self.video_enabled = !self.video_enabled;
                self.video_enabled
            }
        };
        if let Some(peer) = &self.peer {
            peer.handle.set_track_enabled(kind, enabled);
        }
        if let Some(media) = &self.media {
            media.set_enabled(kind, enabled);
        }
        self.emit(ControllerEvent::MediaToggled { kind, enabled })
            .await;
        enabled
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    async fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        info!(event_id = %self.config.event_id, from = ?self.phase, to = ?phase, "Phase changed");
        self.phase = phase;
        self.phase_tx.send_replace(phase);
        self.emit(ControllerEvent::Phase(phase)).await;
    }

    async fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification.clone());
        self.emit(ControllerEvent::Notice(notification)).await;
    }

    async fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event).await;
    }
}

async fn search_finished(search: &mut Option<Search>) -> Result<SearchOutput, JoinError> {
    match search {
        Some(s) => (&mut s.task).await,
        None => std::future::pending().await,
    }
}

async fn next_notice(notices: &mut Option<Subscription<MatchNotice>>) -> Option<MatchNotice> {
    match notices {
        Some(n) => n.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_peer_event(peer: &mut Option<ActivePeer>) -> Option<PeerEvent> {
    match peer {
        Some(p) => p.events.recv().await,
        None => std::future::pending().await,
    }
}
