use std::sync::Mutex;

use async_trait::async_trait;

use super::*;
use crate::media::MediaTrack;
use crate::peer::LoopbackNetwork;
use crate::protocol::SignalKind;
use crate::relay::MemoryRelay;

fn p(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

fn stream(tag: &str) -> MediaStream {
    MediaStream::new(
        tag,
        vec![
            MediaTrack::new(format!("{tag}-mic"), TrackKind::Audio),
            MediaTrack::new(format!("{tag}-cam"), TrackKind::Video),
        ],
    )
}

fn params(local: &str, remote: &str) -> PeerParams {
    PeerParams::new(RoomId::from("r1"), p(local), p(remote), &PeerConfig::default())
}

type Events = mpsc::UnboundedReceiver<PeerEvent>;

async fn start(
    local: &str,
    remote: &str,
    relay: &MemoryRelay,
    net: &LoopbackNetwork,
) -> (PeerHandle, Events) {
    start_session(
        params(local, remote),
        stream(local),
        Arc::new(relay.clone()),
        net,
    )
    .await
    .unwrap()
}

async fn wait_for(events: &mut Events, what: &str, pred: impl Fn(&PeerEvent) -> bool) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("peer events ended while waiting for {what}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn is_connected(ev: &PeerEvent) -> bool {
    matches!(ev, PeerEvent::State(PeerState::Connected))
}

fn is_failure(ev: &PeerEvent) -> bool {
    matches!(ev, PeerEvent::Failed(_))
}

#[test]
fn role_depends_only_on_ids() {
    assert_eq!(Role::for_pair(&p("a1"), &p("b2")), Role::Offerer);
    assert_eq!(Role::for_pair(&p("b2"), &p("a1")), Role::Answerer);
}

#[tokio::test(start_paused = true)]
async fn pair_connects_with_audio_muted() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    let (a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (b, mut b_events) = start("b2", "a1", &relay, &net).await;

    assert_eq!(a.role(), Role::Offerer);
    assert_eq!(b.role(), Role::Answerer);

    wait_for(&mut a_events, "a1 connected", is_connected).await;
    wait_for(&mut b_events, "b2 connected", is_connected).await;
    assert_eq!(net.links(), 1);

    let local = a.local_stream();
    assert!(!local.track(TrackKind::Audio).unwrap().is_enabled());
    assert!(local.track(TrackKind::Video).unwrap().is_enabled());
}

#[tokio::test(start_paused = true)]
async fn remote_stream_is_the_partners_media() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    let (_a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (_b, _b_events) = start("b2", "a1", &relay, &net).await;

    let ev = wait_for(&mut a_events, "remote stream", |e| {
        matches!(e, PeerEvent::RemoteStream(_))
    })
    .await;
    let PeerEvent::RemoteStream(remote) = ev else {
        unreachable!()
    };
    assert_eq!(remote.id(), "b2");
}

#[tokio::test(start_paused = true)]
async fn answerer_subscribing_after_the_offer_still_connects() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    let (_a, mut a_events) = start("a1", "b2", &relay, &net).await;
    wait_for(&mut a_events, "offer sent", |e| {
        matches!(e, PeerEvent::State(PeerState::AwaitingAnswer))
    })
    .await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    let (_b, mut b_events) = start("b2", "a1", &relay, &net).await;

    wait_for(&mut b_events, "b2 connected", is_connected).await;
    wait_for(&mut a_events, "a1 connected", is_connected).await;
}

#[tokio::test(start_paused = true)]
async fn candidates_arriving_before_the_offer_are_buffered() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    relay.hold_next(|m| m.kind == SignalKind::Offer);

    let (_b, mut b_events) = start("b2", "a1", &relay, &net).await;
    let (_a, mut a_events) = start("a1", "b2", &relay, &net).await;

    // The loopback connection rejects candidates added before a remote
    // description, so connecting proves they were held and flushed.
    wait_for(&mut b_events, "b2 connected", |e| {
        assert!(!is_failure(e), "b2 failed: {e:?}");
        is_connected(e)
    })
    .await;
    wait_for(&mut a_events, "a1 connected", is_connected).await;
}

#[tokio::test(start_paused = true)]
async fn dropped_answer_ends_in_negotiation_failure() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    relay.drop_next(|m| m.kind == SignalKind::Answer);

    let (_a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (_b, _b_events) = start("b2", "a1", &relay, &net).await;

    let started = Instant::now();
    let ev = wait_for(&mut a_events, "failure", is_failure).await;
    let PeerEvent::Failed(err) = ev else {
        unreachable!()
    };
    assert!(matches!(err, SessionError::NegotiationFailure(ref m) if m.contains("no answer")));
    assert!(started.elapsed() >= Duration::from_secs(12));
    wait_for(&mut a_events, "closed", |e| matches!(e, PeerEvent::Closed)).await;
    assert_eq!(net.links(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_ice_failure_is_recovered_by_restart() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    net.fail_next_links(1);

    let (_a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (_b, mut b_events) = start("b2", "a1", &relay, &net).await;

    wait_for(&mut a_events, "restart", |e| {
        matches!(e, PeerEvent::State(PeerState::IceRestarting))
    })
    .await;
    wait_for(&mut a_events, "a1 connected", is_connected).await;
    wait_for(&mut b_events, "b2 connected", is_connected).await;
    assert_eq!(net.links(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_ice_failure_is_terminal() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    net.fail_next_links(2);

    let (a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (_b, mut b_events) = start("b2", "a1", &relay, &net).await;

    let PeerEvent::Failed(err) = wait_for(&mut a_events, "a1 failure", is_failure).await else {
        unreachable!()
    };
    assert!(matches!(err, SessionError::NegotiationFailure(_)));
    wait_for(&mut b_events, "b2 failure", is_failure).await;
    wait_for(&mut a_events, "closed", |e| matches!(e, PeerEvent::Closed)).await;
    assert!(a.local_stream().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn partner_closing_is_seen_as_disconnected() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    let (a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let (_b, mut b_events) = start("b2", "a1", &relay, &net).await;
    wait_for(&mut a_events, "a1 connected", is_connected).await;
    wait_for(&mut b_events, "b2 connected", is_connected).await;

    a.close().await;
    wait_for(&mut b_events, "b2 disconnected", |e| {
        matches!(e, PeerEvent::State(PeerState::Disconnected))
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn close_releases_media_and_channel() {
    let relay = MemoryRelay::new();
    let net = LoopbackNetwork::new();
    let (a, mut a_events) = start("a1", "b2", &relay, &net).await;
    let media = a.local_stream().clone();
    assert_eq!(relay.subscriber_count("room:r1"), 1);

    a.close().await;
    assert!(media.is_stopped());
    assert_eq!(relay.subscriber_count("room:r1"), 0);
    assert_eq!(net.open_connections(), 0);
    wait_for(&mut a_events, "closed", |e| matches!(e, PeerEvent::Closed)).await;
}

// ---------------------------------------------------------------------------
// Teardown ordering
// ---------------------------------------------------------------------------

/// Records, at the moment `close` is called, whether local media was already
/// stopped and how many subscribers the room channel still had.
struct InspectableConnection {
    stream: Mutex<Option<MediaStream>>,
    relay: MemoryRelay,
    seen_at_close: Arc<Mutex<Option<(bool, usize)>>>,
}

#[async_trait]
impl PeerConnection for InspectableConnection {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), SessionError> {
        *self.stream.lock().unwrap() = Some(stream.clone());
        Ok(())
    }

    async fn create_offer(&self, _ice_restart: bool) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0\r\n".into(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0\r\n".into(),
        })
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), SessionError> {
        Ok(())
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), SessionError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self) {
        let stopped = self
            .stream
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(MediaStream::is_stopped);
        *self.seen_at_close.lock().unwrap() = Some((stopped, self.relay.subscriber_count("room:r1")));
    }
}

struct InspectableFactory {
    relay: MemoryRelay,
    seen_at_close: Arc<Mutex<Option<(bool, usize)>>>,
}

#[async_trait]
impl PeerConnectionFactory for InspectableFactory {
    async fn create(
        &self,
        _ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, ConnectionEvents), SessionError> {
        let (_tx, rx) = mpsc::unbounded_channel();
        let conn = InspectableConnection {
            stream: Mutex::new(None),
            relay: self.relay.clone(),
            seen_at_close: Arc::clone(&self.seen_at_close),
        };
        Ok((Arc::new(conn), rx))
    }
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_tracks_then_closes_then_unsubscribes() {
    let relay = MemoryRelay::new();
    let seen = Arc::new(Mutex::new(None));
    let factory = InspectableFactory {
        relay: relay.clone(),
        seen_at_close: Arc::clone(&seen),
    };
    let (handle, _events) = start_session(
        params("a1", "b2"),
        stream("a1"),
        Arc::new(relay.clone()),
        &factory,
    )
    .await
    .unwrap();

    handle.close().await;

    // Tracks were stopped before close; the channel was still subscribed.
    assert_eq!(*seen.lock().unwrap(), Some((true, 1)));
    assert_eq!(relay.subscriber_count("room:r1"), 0);
}
