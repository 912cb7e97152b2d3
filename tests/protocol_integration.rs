//! Protocol integration tests: real sockets against the mount simulator.
//!
//! Each link opens its own TCP connection to the simulator, exactly as
//! against hardware, and the parsed results land in MountData.

use mountctl::data::MountData;
use mountctl::events::{EventBus, MountEvent};
use mountctl::protocol::fast::FastPoller;
use mountctl::protocol::link::MountLink;
use mountctl::protocol::medium::MediumPoller;
use mountctl::protocol::once::OncePoller;
use mountctl::protocol::slow::SlowPoller;
use mountctl::protocol::{CommandTemplate, Poller};
use mountctl::sim::{MountSimulator, SimState};
use mountctl::types::{MountStatus, Pierside};
use std::time::Duration;

async fn connected_link(
    name: &'static str,
    addr: std::net::SocketAddr,
    events: EventBus,
) -> MountLink {
    let mut link = MountLink::new(name, &addr.ip().to_string(), addr.port(), events);
    link.ensure_connected().await.expect("connect to simulator");
    link
}

#[tokio::test]
async fn once_poll_reads_identity_and_inverts_longitude() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut link = connected_link("once", addr, events.clone()).await;
    let mut poller = OncePoller::new(data.clone());
    poller.cycle(&mut link).await.expect("once cycle");

    let snapshot = data.read().await.snapshot();
    assert_eq!(snapshot.fw, 21_501);
    assert_eq!(snapshot.product_name, "10micron GM1000HPS");
    // East longitude: '-' on the wire, '+' in MountData, '-' again on send
    assert_eq!(snapshot.site_longitude, "+011:42:17.3");
    assert_eq!(snapshot.site_longitude_wire(), "-011:42:17.3");
    assert_eq!(snapshot.site_latitude, "+48:07:00");
    assert!((snapshot.site_height - 580.0).abs() < 1e-9);

    cancel.cancel();
}

#[tokio::test]
async fn fast_poll_updates_pointing_snapshot() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut link = connected_link("fast", addr, events.clone()).await;
    let mut poller = FastPoller::new(data.clone(), events);
    poller.cycle(&mut link).await.expect("fast cycle");

    let snapshot = data.read().await.snapshot();
    assert!((snapshot.ra_j_now - 12.0).abs() < 1e-6);
    assert!((snapshot.dec_j_now - 45.0).abs() < 1e-6);
    assert_eq!(snapshot.pierside, Pierside::West);
    assert_eq!(snapshot.status, MountStatus::Tracking);
    assert!(!snapshot.slewing);
    assert_eq!(snapshot.local_sidereal_time, "13:00:00.00");
    // J2000 derivation ran
    assert!((snapshot.ra_j2000 - snapshot.ra_j_now).abs() < 0.1);

    cancel.cancel();
}

#[tokio::test]
async fn fast_poll_emits_slew_finished_on_falling_edge() {
    let mut sim = SimState::default();
    sim.slew_duration = Duration::from_millis(80);
    let (addr, state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let mut link = connected_link("fast", addr, events.clone()).await;
    let mut poller = FastPoller::new(data.clone(), events.clone());

    // Command a slew directly on the simulator state
    {
        let mut command_link = connected_link("cmd", addr, events.clone()).await;
        let mut template = CommandTemplate::new();
        template.push(":Sz100*00#").push(":Sa+50*00#").push(":MS#");
        let fields = command_link.exchange(&template).await.expect("slew");
        assert_eq!(fields, vec!["1", "1", "0"]);
    }

    // Poll through the slew until it completes
    poller.cycle(&mut link).await.expect("cycle during slew");
    assert!(data.read().await.slewing);
    tokio::time::sleep(Duration::from_millis(120)).await;
    poller.cycle(&mut link).await.expect("cycle after slew");
    assert!(!data.read().await.slewing);

    let mut slew_finished = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, MountEvent::SlewFinished) {
            slew_finished += 1;
        }
    }
    assert_eq!(slew_finished, 1);

    // The mount arrived at the commanded target
    let snapshot = data.read().await.snapshot();
    assert!((snapshot.az - 100.0).abs() < 1e-6);
    assert!((snapshot.alt - 50.0).abs() < 1e-6);
    drop(state);
    cancel.cancel();
}

#[tokio::test]
async fn medium_poll_reads_counts_and_limits() {
    let mut sim = SimState::default();
    sim.seed_model(&[(4.0, 10.0), (2.1, 20.0), (9.3, 30.0)]);
    sim.model_names = vec!["winter".to_string(), "summer".to_string()];
    let (addr, _state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let mut link = connected_link("medium", addr, events.clone()).await;
    let mut poller = MediumPoller::new(data.clone(), events, None);
    poller.cycle(&mut link).await.expect("medium cycle");

    let snapshot = data.read().await.snapshot();
    assert!((snapshot.time_to_flip - 35.0).abs() < 1e-9);
    assert!((snapshot.meridian_limit_guide - 15.0).abs() < 1e-9);
    assert!((snapshot.meridian_limit_slew - 5.0).abs() < 1e-9);
    assert_eq!(snapshot.model_name_count, 2);
    assert_eq!(snapshot.model.number_alignment_stars, 3);
    assert_eq!(snapshot.refraction_pressure, "1013.0");

    // Both change triggers fired on the first observation
    let mut names_changed = false;
    let mut stars_changed = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            MountEvent::ModelNamesChanged => names_changed = true,
            MountEvent::AlignmentStarsChanged(n) => stars_changed = Some(n),
            _ => {}
        }
    }
    assert!(names_changed);
    assert_eq!(stars_changed, Some(3));

    cancel.cancel();
}

#[tokio::test]
async fn slow_poll_reads_switches_and_stars() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let data = MountData::default().into_shared();
    // Site must be known for the star positions
    data.write()
        .await
        .set_site("+48:07:00".into(), "+011:42:17.3".into(), 580.0);
    // Firmware gate for :GDUTV#
    data.write().await.fw = 21_501;

    let events = EventBus::new();
    let mut link = connected_link("slow", addr, events).await;
    let mut poller = SlowPoller::new(data.clone());
    poller.cycle(&mut link).await.expect("slow cycle");

    let snapshot = data.read().await.snapshot();
    assert!(snapshot.refraction_on);
    assert!(snapshot.utc_data_valid);
    assert_eq!(snapshot.utc_data_expiration, "2027-01-01");
    assert!(!snapshot.alignment_star_positions.is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn reconnect_after_connection_drop() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut link = connected_link("fast", addr, events.clone()).await;
    let mut poller = FastPoller::new(data.clone(), events);

    poller.cycle(&mut link).await.expect("first cycle");

    // Drop the link; the next ensure_connected brings it back
    link.disconnect().await;
    assert!(!link.is_connected());
    link.ensure_connected().await.expect("reconnect");
    poller.cycle(&mut link).await.expect("cycle after reconnect");

    cancel.cancel();
}
