//! In-process peer connections that negotiate with each other through the
//! ordinary offer/answer/candidate flow.
//!
//! Descriptions and candidates name the connection that produced them and
//! its ICE generation. Two connections link once each has a local
//! description, the other's description, and at least one of the other's
//! candidates for that generation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use spark_common::SessionError;
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::{
    ConnectionEvent, ConnectionEvents, ConnectionState, PeerConnection, PeerConnectionFactory,
};
use crate::media::MediaStream;
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

const CANDIDATES_PER_GENERATION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoint {
    conn: u64,
    generation: u32,
}

struct Conn {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    stream: Option<MediaStream>,
    generation: u32,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    remote_candidate_seen: bool,
    state: ConnectionState,
    /// (local, remote) endpoints of the last link attempt.
    linked: Option<(Endpoint, Endpoint)>,
    remote_stream_sent: bool,
}

impl Conn {
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.emit(ConnectionEvent::StateChanged(state));
        }
    }

    fn ready(&self) -> bool {
        self.state != ConnectionState::Closed
            && self.local.is_some()
            && self.remote.is_some()
            && self.remote_candidate_seen
    }
}

#[derive(Default)]
struct NetState {
    next_id: u64,
    conns: HashMap<u64, Conn>,
    failures: u32,
    links: u32,
}

impl NetState {
    fn conn(&mut self, id: u64) -> Result<&mut Conn, SessionError> {
        self.conns
            .get_mut(&id)
            .ok_or_else(|| SessionError::NegotiationFailure(format!("connection {id} is gone")))
    }

    fn evaluate(&mut self, id: u64) {
        let Some(me) = self.conns.get_mut(&id) else {
            return;
        };
        if !me.ready() {
            return;
        }
        if me.state == ConnectionState::New {
            me.set_state(ConnectionState::Connecting);
        }
        let (Some(local), Some(remote)) = (me.local, me.remote) else {
            return;
        };
        if me.linked == Some((local, remote)) {
            return;
        }
        let Some(peer) = self.conns.get(&remote.conn) else {
            return;
        };
        if !peer.ready() || peer.local != Some(remote) || peer.remote != Some(local) {
            return;
        }

        let fail = self.failures > 0;
        if fail {
            self.failures -= 1;
        } else {
            self.links += 1;
        }
        debug!(a = id, b = remote.conn, fail, "Loopback link attempt");

        let streams = [
            self.conns.get(&id).and_then(|c| c.stream.clone()),
            self.conns.get(&remote.conn).and_then(|c| c.stream.clone()),
        ];
        for (conn_id, endpoints, peer_stream) in [
            (id, (local, remote), streams[1].clone()),
            (remote.conn, (remote, local), streams[0].clone()),
        ] {
            let Some(conn) = self.conns.get_mut(&conn_id) else {
                continue;
            };
            conn.linked = Some(endpoints);
            if fail {
                conn.set_state(ConnectionState::Failed);
                continue;
            }
            if conn.state != ConnectionState::Connecting {
                conn.set_state(ConnectionState::Connecting);
            }
            if !conn.remote_stream_sent {
                if let Some(stream) = peer_stream {
                    conn.emit(ConnectionEvent::RemoteStream(stream));
                    conn.remote_stream_sent = true;
                }
            }
            conn.set_state(ConnectionState::Connected);
        }
    }
}

/// Factory and switchboard for loopback connections. Clones share state.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetState> {
        lock(&self.state)
    }

    /// The next `n` link attempts end in `failed` instead of `connected`.
    pub fn fail_next_links(&self, n: u32) {
        self.state().failures += n;
    }

    /// Successful links so far.
    pub fn links(&self) -> u32 {
        self.state().links
    }

    /// Connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state()
            .conns
            .values()
            .filter(|c| c.state != ConnectionState::Closed)
            .count()
    }
}

fn lock(state: &Mutex<NetState>) -> MutexGuard<'_, NetState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl PeerConnectionFactory for LoopbackNetwork {
    async fn create(
        &self,
        _ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, ConnectionEvents), SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.conns.insert(
            id,
            Conn {
                events: tx,
                stream: None,
                generation: 0,
                local: None,
                remote: None,
                remote_candidate_seen: false,
                state: ConnectionState::New,
                linked: None,
                remote_stream_sent: false,
            },
        );
        let conn = LoopbackConnection {
            id,
            state: Arc::clone(&self.state),
        };
        Ok((Arc::new(conn), rx))
    }
}

pub struct LoopbackConnection {
    id: u64,
    state: Arc<Mutex<NetState>>,
}

impl LoopbackConnection {
    fn describe(&self, kind: SdpKind, restart: bool) -> Result<SessionDescription, SessionError> {
        let mut state = lock(&self.state);
        let conn = state.conn(self.id)?;
        if conn.generation == 0 || restart || kind == SdpKind::Answer {
            conn.generation += 1;
        }
        Ok(SessionDescription {
            kind,
            sdp: format!(
                "v=0\r\no=loopback {} {} IN IP4 127.0.0.1\r\ns=-\r\n",
                self.id, conn.generation
            ),
        })
    }
}

fn parse_sdp(sdp: &str) -> Option<Endpoint> {
    let origin = sdp.lines().find_map(|l| l.strip_prefix("o=loopback "))?;
    let mut parts = origin.split_whitespace();
    Some(Endpoint {
        conn: parts.next()?.parse().ok()?,
        generation: parts.next()?.parse().ok()?,
    })
}

fn parse_candidate(candidate: &str) -> Option<Endpoint> {
    let rest = candidate.strip_prefix("candidate:loopback-")?;
    let mut parts = rest.split('-');
    Some(Endpoint {
        conn: parts.next()?.parse().ok()?,
        generation: parts.next()?.parse().ok()?,
    })
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), SessionError> {
        lock(&self.state).conn(self.id)?.stream = Some(stream.clone());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, SessionError> {
        self.describe(SdpKind::Offer, ice_restart)
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        if lock(&self.state).conn(self.id)?.remote.is_none() {
            return Err(SessionError::NegotiationFailure(
                "answer requested without a remote offer".into(),
            ));
        }
        self.describe(SdpKind::Answer, false)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        let endpoint = parse_sdp(&desc.sdp)
            .filter(|e| e.conn == self.id)
            .ok_or_else(|| SessionError::NegotiationFailure("foreign local description".into()))?;

        let mut state = lock(&self.state);
        let conn = state.conn(self.id)?;
        conn.local = Some(endpoint);
        for n in 0..CANDIDATES_PER_GENERATION {
            conn.emit(ConnectionEvent::IceCandidate(IceCandidate {
                candidate: format!("candidate:loopback-{}-{}-{n}", self.id, endpoint.generation),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }));
        }
        state.evaluate(self.id);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        let endpoint = parse_sdp(&desc.sdp)
            .ok_or_else(|| SessionError::NegotiationFailure("unparseable remote description".into()))?;

        let mut state = lock(&self.state);
        let conn = state.conn(self.id)?;
        if conn.remote != Some(endpoint) {
            conn.remote = Some(endpoint);
            conn.remote_candidate_seen = false;
        }
        state.evaluate(self.id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        let conn = state.conn(self.id)?;
        let Some(remote) = conn.remote else {
            return Err(SessionError::NegotiationFailure(
                "candidate added before the remote description".into(),
            ));
        };
        // Candidates from another generation are stale and ignored.
        if parse_candidate(&candidate.candidate) == Some(remote) {
            conn.remote_candidate_seen = true;
            state.evaluate(self.id);
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = lock(&self.state);
        let Some(conn) = state.conns.get_mut(&self.id) else {
            return;
        };
        if conn.state == ConnectionState::Closed {
            return;
        }
        conn.state = ConnectionState::Closed;
        let remote = conn.remote;

        // The peer notices only once its consent checks stop answering.
        if let Some(peer) = remote.and_then(|r| state.conns.get_mut(&r.conn)) {
            if peer.remote.map(|r| r.conn) == Some(self.id)
                && matches!(peer.state, ConnectionState::Connected | ConnectionState::Connecting)
            {
                peer.set_state(ConnectionState::Disconnected);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut ConnectionEvents) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn candidates(events: &[ConnectionEvent]) -> Vec<IceCandidate> {
        events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::IceCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn states(events: &[ConnectionEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn offer_answer_and_candidates_connect_both_sides() {
        let net = LoopbackNetwork::new();
        let (a, mut a_rx) = net.create(&[]).await.unwrap();
        let (b, mut b_rx) = net.create(&[]).await.unwrap();

        let offer = a.create_offer(false).await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        let a_events = drain(&mut a_rx).await;
        let b_events = drain(&mut b_rx).await;
        for c in candidates(&a_events) {
            b.add_ice_candidate(c).await.unwrap();
        }
        for c in candidates(&b_events) {
            a.add_ice_candidate(c).await.unwrap();
        }

        assert_eq!(states(&drain(&mut a_rx).await).last(), Some(&ConnectionState::Connected));
        assert_eq!(states(&drain(&mut b_rx).await).last(), Some(&ConnectionState::Connected));
        assert_eq!(net.links(), 1);
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_rejected() {
        let net = LoopbackNetwork::new();
        let (a, _rx) = net.create(&[]).await.unwrap();
        let err = a
            .add_ice_candidate(IceCandidate {
                candidate: "candidate:loopback-9-1-0".into(),
                sdp_mid: None,
                sdp_mline_index: None,
                username_fragment: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NegotiationFailure(_)));
    }

    #[tokio::test]
    async fn answer_without_offer_fails() {
        let net = LoopbackNetwork::new();
        let (a, _rx) = net.create(&[]).await.unwrap();
        assert!(a.create_answer().await.is_err());
    }

    #[test]
    fn sdp_and_candidate_names_parse() {
        assert_eq!(
            parse_sdp("v=0\r\no=loopback 3 2 IN IP4 127.0.0.1\r\n"),
            Some(Endpoint { conn: 3, generation: 2 })
        );
        assert_eq!(
            parse_candidate("candidate:loopback-3-2-1"),
            Some(Endpoint { conn: 3, generation: 2 })
        );
        assert_eq!(parse_candidate("candidate:1 1 udp 1 10.0.0.1 9 typ host"), None);
    }
}
