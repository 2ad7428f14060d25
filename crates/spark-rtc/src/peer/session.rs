//! Per-participant negotiation of one room's peer connection.
//!
//! The offerer is the participant with the smaller id; it creates the offer
//! on entering the room and re-sends it, with the candidates gathered so
//! far, until an answer arrives. The answerer waits for an offer, answers it
//! once, and ignores duplicates. Remote candidates that arrive before a
//! remote description are buffered and applied right after it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use spark_common::{ParticipantId, RoomId, SessionError};
use spark_config::schema::PeerConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::{
    ConnectionEvent, ConnectionEvents, ConnectionState, PeerConnection, PeerConnectionFactory,
};
use crate::media::{MediaStream, TrackKind};
use crate::protocol::{channel_for_room, IceCandidate, SdpKind, SessionDescription, Signal, SignalingMessage};
use crate::relay::SignalingRelay;
use crate::subscription::Subscription;

// ---------------------------------------------------------------------------
// Roles, states, events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    /// The lexicographically smaller id offers. Depends on nothing but the ids.
    pub fn for_pair(local: &ParticipantId, remote: &ParticipantId) -> Self {
        if local < remote {
            Role::Offerer
        } else {
            Role::Answerer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Answerer waiting for an offer.
    Idle,
    /// Offer published, no answer applied yet.
    AwaitingAnswer,
    Connecting,
    Connected,
    IceRestarting,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    State(PeerState),
    Connection(ConnectionState),
    RemoteStream(MediaStream),
    /// Terminal failure. Teardown follows.
    Failed(SessionError),
    /// Teardown finished: tracks stopped, connection closed, channel left.
    Closed,
}

#[derive(Debug, Clone)]
pub struct PeerParams {
    pub room_id: RoomId,
    pub local: ParticipantId,
    pub remote: ParticipantId,
    pub negotiation_timeout: Duration,
    pub offer_resend_interval: Duration,
    pub ice_restarts: u32,
    pub ice_servers: Vec<String>,
    pub start_audio_muted: bool,
}

impl PeerParams {
    pub fn new(room_id: RoomId, local: ParticipantId, remote: ParticipantId, config: &PeerConfig) -> Self {
        Self {
            room_id,
            local,
            remote,
            negotiation_timeout: Duration::from_secs(config.negotiation_timeout_secs),
            offer_resend_interval: Duration::from_millis(config.offer_resend_interval_ms),
            ice_restarts: config.ice_restarts,
            ice_servers: config.ice_servers.clone(),
            start_audio_muted: true,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

struct PeerMachine {
    params: PeerParams,
    role: Role,
    channel: String,
    state: PeerState,
    connection: Arc<dyn PeerConnection>,
    relay: Arc<dyn SignalingRelay>,
    local_stream: MediaStream,
    events: mpsc::UnboundedSender<PeerEvent>,

    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    /// Candidates already applied or buffered; the relay may duplicate.
    seen_candidates: HashSet<String>,
    /// Our current offer and every local candidate since, for re-sending.
    outgoing_offer: Option<SessionDescription>,
    local_candidates: Vec<IceCandidate>,
    /// Remote offer SDP already answered.
    answered_offer: Option<String>,
    /// Remote answer SDP already applied.
    applied_answer: Option<String>,
    restarts_used: u32,
    deadline: Option<Instant>,
    next_resend: Option<Instant>,
    failure: Option<SessionError>,
}

impl PeerMachine {
    fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            debug!(room_id = %self.params.room_id, from = ?self.state, to = ?state, "Peer state");
            self.state = state;
            let _ = self.events.send(PeerEvent::State(state));
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.params.negotiation_timeout);
    }

    fn fail(&mut self, error: SessionError) {
        if self.failure.is_none() {
            warn!(room_id = %self.params.room_id, error = %error, "Peer session failed");
            self.failure = Some(error);
        }
    }

    fn is_done(&self) -> bool {
        self.failure.is_some() || self.state == PeerState::Closed
    }

    /// Publish with one retry on a transport error.
    async fn publish(&self, signal: &Signal) -> Result<(), SessionError> {
        let message = SignalingMessage::new(&self.params.local, signal)?;
        match self.relay.publish(&self.channel, message.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(room_id = %self.params.room_id, error = %first, "Publish failed, retrying once");
                self.relay.publish(&self.channel, message).await
            }
        }
    }

    async fn enter(&mut self) -> Result<(), SessionError> {
        self.arm_deadline();
        match self.role {
            Role::Offerer => self.send_offer(false).await,
            Role::Answerer => Ok(()),
        }
    }

    async fn send_offer(&mut self, ice_restart: bool) -> Result<(), SessionError> {
        let offer = self.connection.create_offer(ice_restart).await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.local_candidates.clear();
        self.outgoing_offer = Some(offer.clone());
        self.publish(&Signal::Offer(offer)).await?;
        self.next_resend = Some(Instant::now() + self.params.offer_resend_interval);
        if !ice_restart {
            self.set_state(PeerState::AwaitingAnswer);
        }
        info!(room_id = %self.params.room_id, ice_restart, "Offer sent");
        Ok(())
    }

    /// Re-send the outstanding offer and the candidates gathered for it,
    /// covering an answerer that subscribed after the first send.
    async fn resend_offer(&mut self) -> Result<(), SessionError> {
        let Some(offer) = self.outgoing_offer.clone() else {
            self.next_resend = None;
            return Ok(());
        };
        debug!(room_id = %self.params.room_id, "Re-sending offer");
        self.publish(&Signal::Offer(offer)).await?;
        for candidate in self.local_candidates.clone() {
            self.publish(&Signal::IceCandidate(candidate)).await?;
        }
        self.next_resend = Some(Instant::now() + self.params.offer_resend_interval);
        Ok(())
    }

    async fn on_signal(&mut self, message: SignalingMessage) -> Result<(), SessionError> {
        if message.is_from(&self.params.local) {
            return Ok(());
        }
        if !message.is_from(&self.params.remote) {
            debug!(room_id = %self.params.room_id, from = %message.from, "Ignoring stranger on room channel");
            return Ok(());
        }

        let signal = match message.signal() {
            Ok(signal) => signal,
            Err(e) => {
                warn!(room_id = %self.params.room_id, error = %e, "Dropping malformed signal");
                return Ok(());
            }
        };
        match signal {
            Signal::Offer(offer) => self.on_offer(offer).await,
            Signal::Answer(answer) => self.on_answer(answer).await,
            Signal::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        if self.role != Role::Answerer || offer.kind != SdpKind::Offer {
            debug!(room_id = %self.params.room_id, "Ignoring offer in offerer role");
            return Ok(());
        }
        if self.answered_offer.as_deref() == Some(offer.sdp.as_str()) {
            return Ok(());
        }

        let sdp = offer.sdp.clone();
        self.connection.set_remote_description(offer).await?;
        self.apply_remote_description().await?;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.publish(&Signal::Answer(answer)).await?;
        self.answered_offer = Some(sdp);
        info!(room_id = %self.params.room_id, "Answer sent");

        if self.state != PeerState::Connected {
            self.set_state(PeerState::Connecting);
        }
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        let waiting = matches!(self.state, PeerState::AwaitingAnswer | PeerState::IceRestarting);
        if self.role != Role::Offerer || !waiting || self.outgoing_offer.is_none() {
            return Ok(());
        }
        if self.applied_answer.as_deref() == Some(answer.sdp.as_str()) {
            return Ok(());
        }

        self.applied_answer = Some(answer.sdp.clone());
        self.connection.set_remote_description(answer).await?;
        self.outgoing_offer = None;
        self.next_resend = None;
        self.apply_remote_description().await?;
        self.set_state(PeerState::Connecting);
        Ok(())
    }

    async fn apply_remote_description(&mut self) -> Result<(), SessionError> {
        self.remote_description_set = true;
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(room_id = %self.params.room_id, count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in pending {
            self.connection.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        if !self.seen_candidates.insert(candidate.candidate.clone()) {
            return Ok(());
        }
        if self.remote_description_set {
            self.connection.add_ice_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) -> Result<(), SessionError> {
        match event {
            ConnectionEvent::IceCandidate(candidate) => {
                if self.outgoing_offer.is_some() {
                    self.local_candidates.push(candidate.clone());
                }
                self.publish(&Signal::IceCandidate(candidate)).await
            }
            ConnectionEvent::RemoteStream(stream) => {
                let _ = self.events.send(PeerEvent::RemoteStream(stream));
                Ok(())
            }
            ConnectionEvent::StateChanged(state) => {
                let _ = self.events.send(PeerEvent::Connection(state));
                self.on_connection_state(state).await
            }
        }
    }

    async fn on_connection_state(&mut self, state: ConnectionState) -> Result<(), SessionError> {
        match state {
            ConnectionState::Connecting => {
                if self.state == PeerState::Disconnected {
                    self.set_state(PeerState::Connecting);
                }
            }
            ConnectionState::Connected => {
                self.deadline = None;
                self.set_state(PeerState::Connected);
                info!(room_id = %self.params.room_id, remote = %self.params.remote, "Peer connected");
            }
            ConnectionState::Disconnected => {
                self.arm_deadline();
                self.set_state(PeerState::Disconnected);
            }
            ConnectionState::Failed => self.on_ice_failed().await?,
            ConnectionState::New | ConnectionState::Closed => {}
        }
        Ok(())
    }

    async fn on_ice_failed(&mut self) -> Result<(), SessionError> {
        if self.restarts_used >= self.params.ice_restarts {
            self.fail(SessionError::NegotiationFailure(
                "connection failed after ICE restart".into(),
            ));
            return Ok(());
        }
        self.restarts_used += 1;
        info!(room_id = %self.params.room_id, attempt = self.restarts_used, "ICE failed, restarting");

        // The next remote description replaces the current one; buffer until then.
        self.remote_description_set = false;
        self.arm_deadline();
        self.set_state(PeerState::IceRestarting);
        if self.role == Role::Offerer {
            self.send_offer(true).await?;
        }
        Ok(())
    }

    fn on_timeout(&mut self) {
        let what = match self.state {
            PeerState::Idle => "no offer received",
            PeerState::AwaitingAnswer => "no answer received",
            PeerState::Disconnected => "connection lost",
            _ => "connection not established",
        };
        self.fail(SessionError::NegotiationFailure(format!(
            "{what} within {}s",
            self.params.negotiation_timeout.as_secs()
        )));
    }

    /// Stop local tracks, close the connection, then leave the channel.
    async fn teardown(&mut self, signals: Subscription<SignalingMessage>) {
        self.local_stream.stop_all();
        self.connection.close().await;
        signals.unsubscribe();
        self.set_state(PeerState::Closed);
        info!(room_id = %self.params.room_id, "Peer session closed");
    }
}

// ---------------------------------------------------------------------------
// Task & handle
// ---------------------------------------------------------------------------

enum PeerCommand {
    Close,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut machine: PeerMachine,
    mut signals: Subscription<SignalingMessage>,
    mut connection_events: ConnectionEvents,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
) {
    if let Err(e) = machine.enter().await {
        machine.fail(e);
    }

    while !machine.is_done() {
        let deadline = machine.deadline;
        let resend = machine.next_resend;
        let step = tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(PeerCommand::Close) | None => break,
            },
            Some(message) = signals.recv() => machine.on_signal(message).await,
            Some(event) = connection_events.recv() => machine.on_connection_event(event).await,
            _ = sleep_until(resend) => machine.resend_offer().await,
            _ = sleep_until(deadline) => {
                machine.on_timeout();
                Ok(())
            }
        };
        if let Err(e) = step {
            machine.fail(e);
        }
    }

    let failure = machine.failure.clone();
    machine.teardown(signals).await;
    if let Some(error) = failure {
        let _ = machine.events.send(PeerEvent::Failed(error));
    }
    let _ = machine.events.send(PeerEvent::Closed);
}

/// Owner's handle on a running peer session.
pub struct PeerHandle {
    role: Role,
    room_id: RoomId,
    local_stream: MediaStream,
    commands: mpsc::UnboundedSender<PeerCommand>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn local_stream(&self) -> &MediaStream {
        &self.local_stream
    }

    /// Flip the existing track; no renegotiation.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        self.local_stream.set_enabled(kind, enabled)
    }

    /// Tear the session down and wait until its media is released.
    pub async fn close(self) {
        let _ = self.commands.send(PeerCommand::Close);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Peer session task ended abnormally");
        }
    }
}

/// Start negotiating `params.room_id` with `local_stream` as our media.
///
/// Subscribes to the room channel before anything is published so the
/// answer to our own offer cannot be missed. On error the stream is stopped.
pub async fn start_session(
    params: PeerParams,
    local_stream: MediaStream,
    relay: Arc<dyn SignalingRelay>,
    factory: &dyn PeerConnectionFactory,
) -> Result<(PeerHandle, mpsc::UnboundedReceiver<PeerEvent>), SessionError> {
    let channel = channel_for_room(&params.room_id);
    let role = Role::for_pair(&params.local, &params.remote);

    let signals = match relay.subscribe(&channel).await {
        Ok(s) => s,
        Err(e) => {
            local_stream.stop_all();
            return Err(e);
        }
    };
    let (connection, connection_events) = match factory.create(&params.ice_servers).await {
        Ok(created) => created,
        Err(e) => {
            local_stream.stop_all();
            return Err(e);
        }
    };
    if let Err(e) = connection.add_stream(&local_stream).await {
        local_stream.stop_all();
        connection.close().await;
        return Err(e);
    }
    if params.start_audio_muted {
        local_stream.set_enabled(TrackKind::Audio, false);
    }

    info!(room_id = %params.room_id, local = %params.local, remote = %params.remote, role = ?role, "Starting peer session");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let room_id = params.room_id.clone();
    let machine = PeerMachine {
        params,
        role,
        channel,
        state: PeerState::Idle,
        connection,
        relay,
        local_stream: local_stream.clone(),
        events: events_tx,
        remote_description_set: false,
        pending_candidates: Vec::new(),
        seen_candidates: HashSet::new(),
        outgoing_offer: None,
        local_candidates: Vec::new(),
        answered_offer: None,
        applied_answer: None,
        restarts_used: 0,
        deadline: None,
        next_resend: None,
        failure: None,
    };
    let task = tokio::spawn(run(machine, signals, connection_events, commands_rx));

    Ok((
        PeerHandle {
            role,
            room_id,
            local_stream,
            commands: commands_tx,
            task,
        },
        events_rx,
    ))
}

#[cfg(test)]
mod tests;
