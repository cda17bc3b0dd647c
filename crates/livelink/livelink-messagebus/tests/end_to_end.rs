use livelink_core::{
    Client, ClientConfig, Clock, ConnectionSettings, CurveElement, ManualClock, RefSkeleton,
    SourceId, SourceState, Transform,
};
use livelink_messagebus::{
    DiscoveryPoller, LocalBus, LocalEndpoint, MessageBusSource, Provider, SourceHandle,
};
use livelink_test_fixtures::{recordings, skeletons};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct Recording {
    subject: String,
    frames: Vec<RecordedFrame>,
}

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    time: f64,
    frame_number: i32,
    transforms: Vec<Transform>,
    curves: Vec<CurveElement>,
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

struct Rig {
    bus: LocalBus,
    clock: Arc<ManualClock>,
    provider: Provider<LocalEndpoint>,
    client: Client,
    source_id: SourceId,
    handle: SourceHandle,
    recording: Recording,
}

/// Provider announces the biped, a client discovers it and connects.
fn connect() -> Rig {
    let bus = LocalBus::new();
    let clock = Arc::new(ManualClock::new(1000.0));
    let recording: Recording = recordings::load("walk-start").expect("recording fixture");
    let biped: RefSkeleton = skeletons::load("biped").expect("skeleton fixture");

    let mut provider = Provider::new(bus.endpoint(), "MocapBridge", "stage-pc", clock.clone());
    provider.update_subject(&recording.subject, biped.bone_names, biped.bone_parents);

    let mut poller = DiscoveryPoller::new(bus.endpoint());
    poller.start().expect("ping published");
    provider.pump().expect("provider pump");
    let found = poller.collect(Duration::from_millis(20)).expect("pongs");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].provider_name, "MocapBridge");

    let mut client = Client::with_clock(ClientConfig::default(), clock.clone());
    let source = MessageBusSource::new(poller.into_endpoint(), found[0].clone(), clock.clone());
    let handle = source.handle();
    assert_eq!(handle.state(), SourceState::Connecting);
    let source_id = client.add_source(Box::new(source));

    wait_until("connect at provider", || {
        provider.pump().expect("provider pump");
        !provider.clients().is_empty()
    });
    wait_until("skeleton replay", || {
        client.registry().contains(&recording.subject)
    });
    assert_eq!(handle.state(), SourceState::Active);

    Rig {
        bus,
        clock,
        provider,
        client,
        source_id,
        handle,
        recording,
    }
}

fn stream_recording(rig: &mut Rig) {
    for f in &rig.recording.frames {
        let reached = rig.provider.update_subject_frame(
            &rig.recording.subject,
            f.transforms.clone(),
            f.curves.clone(),
            f.time,
            f.frame_number,
        );
        assert_eq!(reached, 1);
    }
    let subject = rig.recording.subject.clone();
    let expected = rig.recording.frames.len();
    let registry = Arc::clone(rig.client.registry());
    wait_until("frames buffered", || {
        registry.buffered_frames(&subject) == Some(expected)
    });
}

/// it should stream a recorded take from provider to snapshot with local timing
#[test]
fn streamed_frames_reach_the_snapshot() {
    let mut rig = connect();
    stream_recording(&mut rig);
    let subject = rig.recording.subject.clone();

    rig.client.set_connection_settings(
        &subject,
        ConnectionSettings {
            use_interpolation: true,
            interpolation_offset: 0.05,
        },
    );
    // Producer time 100.0 arrived at local 1000.0, so 1000.2 - 0.05 lands
    // halfway between the second and third frames.
    rig.clock.set(1000.2);
    rig.client.tick();

    let snap = rig.client.get_subject_snapshot(&subject).expect("snapshot");
    assert!((snap.frame.transforms[0].translation[0] - 1.5).abs() < 1e-3);
    assert!((snap.curve_value("jaw_open").unwrap() - 0.375).abs() < 1e-3);
    assert_eq!(snap.last_modifier, Some(rig.source_id));
    assert!((snap.frame.time_code.offset - 900.0).abs() < 1e-9);
}

/// it should drop a frame that arrives behind the read cursor
#[test]
fn late_frames_over_the_wire_are_counted_stale() {
    let mut rig = connect();
    stream_recording(&mut rig);
    rig.client.tick();

    let bones = rig.recording.frames[0].transforms.len();
    rig.provider.update_subject_frame(
        &rig.recording.subject,
        vec![Transform::IDENTITY; bones],
        Vec::new(),
        99.0,
        -1,
    );
    let registry = Arc::clone(rig.client.registry());
    wait_until("stale drop", || {
        registry.diagnostics().snapshot().stale == 1
    });
    assert_eq!(registry.buffered_frames(&rig.recording.subject), Some(1));
}

/// it should stay alive while heartbeats are echoed and time out once they stop
#[test]
fn heartbeat_round_trip_then_timeout() {
    let mut rig = connect();
    stream_recording(&mut rig);
    let subject = rig.recording.subject.clone();

    for _ in 0..20 {
        rig.clock.advance(1.0);
        let seen = rig.handle.messages_received();
        rig.client.tick();
        rig.provider.pump().expect("provider pump");
        let handle = rig.handle.clone();
        wait_until("heartbeat echo", || handle.messages_received() > seen);
    }
    assert_eq!(rig.client.source_count(), 1);
    assert_eq!(rig.handle.last_activity(), rig.clock.now());

    // Provider goes quiet: no more pumping.
    let mut ticks = 0;
    while rig.client.source_count() > 0 {
        assert!(ticks < 20, "source never timed out");
        rig.clock.advance(1.0);
        rig.client.tick();
        ticks += 1;
    }
    assert_eq!(ticks, 15);
    assert_eq!(rig.handle.state(), SourceState::Closed);
    assert_eq!(rig.bus.endpoint_count(), 1);

    // Timed-out sources leave their subjects behind.
    assert!(rig.client.get_subject_snapshot(&subject).is_some());
}

/// it should forward ClearSubject and clear owned subjects on explicit removal
#[test]
fn clear_and_remove_source() {
    let mut rig = connect();
    stream_recording(&mut rig);
    let subject = rig.recording.subject.clone();

    rig.provider.clear_subject(&subject);
    let registry = Arc::clone(rig.client.registry());
    wait_until("clear forwarded", || !registry.contains(&subject));

    let biped: RefSkeleton = skeletons::load("biped").expect("skeleton fixture");
    rig.provider.update_subject(
        &subject,
        biped.bone_names.clone(),
        biped.bone_parents.clone(),
    );
    rig.provider.update_subject_frame(
        &subject,
        vec![Transform::IDENTITY; biped.len()],
        Vec::new(),
        200.0,
        0,
    );
    wait_until("frame after redeclare", || {
        registry.buffered_frames(&subject) == Some(1)
    });
    rig.client.tick();
    assert!(rig.client.get_subject_snapshot(&subject).is_some());

    assert!(rig.client.remove_source(rig.source_id));
    assert!(!registry.contains(&subject));
    rig.client.tick();
    assert!(rig.client.get_subject_snapshot(&subject).is_none());

    assert_eq!(rig.provider.clear_subject(&subject), 0);
    assert!(rig.provider.clients().is_empty());
}
