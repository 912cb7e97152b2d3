//! Alignment-model lifecycle tests: download, upload, prune, optimize.

use mountctl::data::MountData;
use mountctl::events::{EventBus, MountEvent};
use mountctl::protocol::link::MountLink;
use mountctl::protocol::model_names::ModelNameLink;
use mountctl::protocol::model_read::ModelReadLink;
use mountctl::protocol::model_write::{ModelWriteLink, ProgramPoint};
use mountctl::sim::{MountSimulator, SimState};
use mountctl::types::Pierside;
use mountctl::SharedMountData;
use std::time::Duration;

fn link(name: &'static str, addr: std::net::SocketAddr, events: &EventBus) -> MountLink {
    MountLink::new(name, &addr.ip().to_string(), addr.port(), events.clone())
}

async fn data_with_site(fw: u32, star_count: usize) -> SharedMountData {
    let data = MountData::default().into_shared();
    {
        let mut d = data.write().await;
        d.set_site("+48:07:00".into(), "+011:42:17.3".into(), 580.0);
        d.local_sidereal_time = "13:00:00.00".into();
        d.fw = fw;
        d.model.number_alignment_stars = star_count;
    }
    data
}

#[tokio::test]
async fn model_download_commits_parallel_arrays() {
    let mut sim = SimState::default();
    sim.seed_model(&[(4.0, 10.0), (2.1, 20.0), (9.3, 30.0), (1.2, 40.0), (3.0, 50.0)]);
    let (addr, _state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = data_with_site(21_501, 5).await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let mut reader = ModelReadLink::new(link("model-read", addr, &events), data.clone(), events);

    reader.read_model().await.expect("model download");

    let snapshot = data.read().await.snapshot();
    // Invariant: all five arrays share the model length
    assert_eq!(snapshot.model.number, 5);
    assert_eq!(snapshot.model.number_alignment_stars, 5);
    assert!(snapshot.model.is_consistent());
    assert!(!snapshot.model_loading);
    assert!((snapshot.model.error[2] - 9.3).abs() < 1e-6);
    assert_eq!(snapshot.model.worst_point(), Some(2));
    // getain statistics arrived (firmware >= 21500)
    assert!(snapshot.model.rms > 0.0);
    assert!((snapshot.model.polar_error - 12.5).abs() < 1e-6);

    let mut model_read_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, MountEvent::ModelRead) {
            model_read_events += 1;
        }
    }
    assert_eq!(model_read_events, 1);

    cancel.cancel();
}

#[tokio::test]
async fn model_download_old_firmware_has_zero_stats() {
    let mut sim = SimState::default();
    sim.firmware = "2.10.0".to_string();
    sim.seed_model(&[(4.0, 10.0), (2.1, 20.0), (9.3, 30.0)]);
    let (addr, _state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = data_with_site(21_000, 3).await;
    let events = EventBus::new();
    let mut reader = ModelReadLink::new(link("model-read", addr, &events), data.clone(), events);
    reader.read_model().await.expect("model download");

    let snapshot = data.read().await.snapshot();
    assert_eq!(snapshot.model.number, 3);
    // No :getain# on old firmware: every aggregate field reads as zero
    assert_eq!(snapshot.model.rms, 0.0);
    assert_eq!(snapshot.model.polar_error, 0.0);

    cancel.cancel();
}

#[tokio::test]
async fn model_upload_round_trip() {
    let (addr, state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let data = data_with_site(21_501, 0).await;
    let events = EventBus::new();
    let mut writer = ModelWriteLink::new(link("model-write", addr, &events), data.clone());

    // Three points, each solved a known offset away from the commanded
    // position
    let points: Vec<ProgramPoint> = (0..3)
        .map(|i| ProgramPoint {
            ra_j_now: 10.0 + i as f64,
            dec_j_now: 20.0 + 10.0 * i as f64,
            pierside: Pierside::West,
            ra_j_now_solved: 10.0 + i as f64 + 1.0 / 3600.0,
            dec_j_now_solved: 20.0 + 10.0 * i as f64 + 2.0 / 3600.0,
            lst_hours: 13.0,
        })
        .collect();

    let outcome = writer.program_model(&points).await.expect("upload");
    assert!(outcome.success);
    assert_eq!(outcome.star_count, 3);
    assert!(outcome.rejected.is_empty());
    assert_eq!(data.read().await.model.number_alignment_stars, 3);
    assert_eq!(state.lock().expect("state").star_count(), 3);

    cancel.cancel();
}

#[tokio::test]
async fn model_upload_refused_on_old_firmware() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    // 2.8.14 predates the upload command set
    let data = data_with_site(20_814, 0).await;
    let events = EventBus::new();
    let mut writer = ModelWriteLink::new(link("model-write", addr, &events), data.clone());

    let point = ProgramPoint {
        ra_j_now: 10.0,
        dec_j_now: 20.0,
        pierside: Pierside::West,
        ra_j_now_solved: 10.0,
        dec_j_now_solved: 20.0,
        lst_hours: 13.0,
    };
    let result = writer.program_model(&[point]).await;
    assert!(result.is_err());
    // MountData untouched
    assert_eq!(data.read().await.model.number_alignment_stars, 0);

    cancel.cancel();
}

/// The reply-count contract: `newalig` + N×`newalpt` + `endalig` +
/// `getalst` = N+3 fields. One source variant expects `4 + 2N` instead;
/// that reading disagrees with the protocol table and is pinned here as
/// ignored so the discrepancy stays visible.
#[tokio::test]
async fn model_upload_reply_count_is_n_plus_3() {
    let (addr, _state, cancel) = MountSimulator::spawn(SimState::default())
        .await
        .expect("spawn simulator");

    let events = EventBus::new();
    let mut raw = link("raw", addr, &events);
    raw.ensure_connected().await.expect("connect");

    let mut template = mountctl::protocol::CommandTemplate::new();
    template.push(":newalig#");
    for i in 0..3 {
        template.push(&format!(
            ":newalpt12:30:0{i}.0,+45:00:00,W,12:30:0{i}.5,+45:00:30,13:00:00.0#"
        ));
    }
    template.push(":endalig#");
    template.push(":getalst#");

    let fields = raw.exchange(&template).await.expect("exchange");
    assert_eq!(fields.len(), 3 + 3); // N + 3
    assert_eq!(fields[0], "V");
    assert_eq!(fields[4], "V");
    assert_eq!(fields[5], "003");

    cancel.cancel();
}

#[tokio::test]
#[ignore = "alternate 4+2N reply-count reading; kept to preserve the source ambiguity"]
async fn model_upload_reply_count_alternate_reading() {
    // A second source variant counts 4 + 2N reply fields for the same
    // sequence (an extra field per point and one more frame field). No
    // observed firmware answers this shape; if one ever does, this test
    // documents what to expect.
    let n = 3usize;
    assert_eq!(4 + 2 * n, 10);
}

#[tokio::test]
async fn model_name_catalog_enumeration() {
    let mut sim = SimState::default();
    sim.model_names = vec!["winter".to_string(), "alpe".to_string()];
    let (addr, _state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = MountData::default().into_shared();
    let events = EventBus::new();
    let mut names = ModelNameLink::new(link("model-names", addr, &events), data.clone());
    names.read_names().await.expect("enumerate");

    let snapshot = data.read().await.snapshot();
    assert_eq!(snapshot.model_names, vec!["winter", "alpe"]);
    assert_eq!(snapshot.model_name_count, 2);

    cancel.cancel();
}

#[tokio::test]
async fn model_loading_flag_window() {
    let mut sim = SimState::default();
    sim.seed_model(&[(4.0, 10.0), (2.1, 20.0)]);
    let (addr, _state, cancel) = MountSimulator::spawn(sim).await.expect("spawn simulator");

    let data = data_with_site(21_501, 2).await;
    let events = EventBus::new();
    let mut reader = ModelReadLink::new(link("model-read", addr, &events), data.clone(), events);

    assert!(!data.read().await.model_loading);
    reader.read_model().await.expect("download");
    // After the commit the flag is released
    assert!(!data.read().await.model_loading);
    assert_eq!(data.read().await.model.number, 2);

    cancel.cancel();
}

#[tokio::test]
async fn model_download_failure_releases_loading_flag() {
    // No simulator: connection refused
    let data = data_with_site(21_501, 2).await;
    let events = EventBus::new();
    let dead = MountLink::new("model-read", "127.0.0.1", 1, events.clone());
    let mut reader = ModelReadLink::new(dead, data.clone(), events);

    let result = tokio::time::timeout(Duration::from_secs(5), reader.read_model()).await;
    assert!(matches!(result, Ok(Err(_))));
    assert!(!data.read().await.model_loading);
}
