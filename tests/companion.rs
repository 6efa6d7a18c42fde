mod common;

use std::{sync::Arc, time::Duration};

use chrono::{Local, Utc};
use common::{peer, temp_database, Call, FakeLink, ManualNotifier};
use dosekeeper_lib::{
    db::{LogSource, NewSchedule, StoreChange},
    device::{ConnectionState, LinkEvent, SENSOR_SERVICE},
    reminders::Notifier,
    settings::CompanionSettings,
    Companion,
};
use tokio::sync::mpsc;

async fn start(
    db: dosekeeper_lib::db::Database,
) -> (
    Companion,
    FakeLink,
    Arc<ManualNotifier>,
    mpsc::UnboundedSender<LinkEvent>,
) {
    let link = FakeLink::default();
    let notifier = Arc::new(ManualNotifier::default());
    let shared: Arc<dyn Notifier> = notifier.clone();
    let (events_tx, events) = mpsc::unbounded_channel();
    let companion = Companion::start(
        CompanionSettings::default(),
        db,
        link.clone(),
        events,
        shared,
    )
    .await;
    (companion, link, notifier, events_tx)
}

#[tokio::test]
async fn manual_log_is_durable_before_callback() {
    let (_dir, db) = temp_database();
    let (companion, _link, _notifier, _events) = start(db).await;
    let mut feed = companion.subscribe();

    let before = Utc::now().timestamp();
    let mut callbacks = 0;
    let record = companion
        .manual_log(|logged| {
            callbacks += 1;
            assert_eq!(logged.source, LogSource::Manual);
        })
        .await
        .unwrap();

    assert_eq!(callbacks, 1);
    assert!(record.timestamp >= before && record.timestamp <= Utc::now().timestamp());
    assert_eq!(companion.logs().await.unwrap(), vec![record.clone()]);
    assert!(matches!(feed.try_recv(), Ok(StoreChange::LogInserted(inserted)) if inserted == record));
    assert_eq!(*companion.sensor_reading().borrow(), Some(1));

    assert_eq!(companion.clear_logs().await.unwrap(), 1);
    assert!(companion.logs().await.unwrap().is_empty());
    assert!(matches!(feed.try_recv(), Ok(StoreChange::LogsCleared)));

    companion.shutdown().await;
}

#[tokio::test]
async fn start_restores_reminders_for_stored_schedules() {
    let (_dir, db) = temp_database();
    db.insert_schedule(&NewSchedule {
        name: None,
        time: Utc::now(),
        repeats_daily: true,
    })
    .await
    .unwrap();

    let (companion, _link, notifier, _events) = start(db).await;

    assert_eq!(notifier.scheduled().len(), 1);
    assert_eq!(companion.reminders().active_loops(), 1);
    assert!(companion.health().reminders_enabled);

    companion.shutdown().await;
    assert_eq!(notifier.pending().len(), 1);
}

#[tokio::test]
async fn reschedule_by_id_swaps_the_pending_reminder() {
    let (_dir, db) = temp_database();
    let (companion, _link, notifier, _events) = start(db).await;
    let record = companion
        .save_schedule(NewSchedule {
            name: None,
            time: Utc::now(),
            repeats_daily: true,
        })
        .await
        .unwrap();

    let token = companion.reschedule(record.id).await.unwrap().unwrap();

    assert_ne!(Some(token), record.notification_id);
    assert_eq!(notifier.pending().into_iter().collect::<Vec<_>>(), vec![token]);
    assert_eq!(companion.reschedule(record.id + 100).await.unwrap(), None);

    companion.shutdown().await;
}

#[tokio::test]
async fn link_events_drive_connection_state() {
    let (_dir, db) = temp_database();
    let (companion, link, _notifier, events) = start(db).await;
    let mut state = companion.device().watch_state();

    events
        .send(LinkEvent::StackStateChanged { powered: true })
        .unwrap();
    events
        .send(LinkEvent::PeerDiscovered {
            peer: peer("tracker"),
            services: vec![SENSOR_SERVICE],
        })
        .unwrap();
    events
        .send(LinkEvent::Connected {
            peer: peer("tracker"),
        })
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| state.is_connected()),
    )
    .await
    .expect("connected in time")
    .unwrap();

    assert_eq!(companion.health().link_state, "connected");
    assert!(link.calls().contains(&Call::DiscoverServices(peer("tracker"))));

    events
        .send(LinkEvent::Disconnected {
            peer: peer("tracker"),
            reason: None,
        })
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == ConnectionState::Scanning),
    )
    .await
    .expect("rescanning in time")
    .unwrap();

    companion.shutdown().await;
}

#[tokio::test]
async fn progress_counts_todays_dose() {
    let (_dir, db) = temp_database();
    let (companion, _link, _notifier, _events) = start(db).await;

    let progress = companion.progress(Local::now().date_naive()).await.unwrap();
    assert_eq!(progress.weekly.scheduled, 0);
    assert_eq!(progress.weekly.ratio(), 0.0);
    assert_eq!(progress.series.len(), dosekeeper_lib::SERIES_WEEKS);

    companion
        .save_schedule(NewSchedule {
            name: Some("Vitamin D".into()),
            time: Utc::now(),
            repeats_daily: false,
        })
        .await
        .unwrap();
    companion.manual_log(|_| {}).await.unwrap();

    let progress = companion.progress(Local::now().date_naive()).await.unwrap();
    assert_eq!(progress.weekly.scheduled, 1);
    assert_eq!(progress.weekly.taken, 1);
    assert_eq!(progress.monthly.percent(), 100);

    companion.shutdown().await;
}
