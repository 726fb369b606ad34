//! Round-trips through the real filesystem watcher: a user edit must settle
//! into exactly one outbound message, and the daemon's own writes must not
//! echo back into the engine.

use std::fs;
use std::time::{Duration, Instant};

use libazul::{DaemonMessage, EditorMessage, Guid, SyncWatcher, WatchEvent};

use crate::azul_test::{full_snapshot, instance, script, TestSession};

const UTIL_GUID: &str = "aaaa1111aaaa1111";
const STORAGE_GUID: &str = "e1e1e1e1e1e1e1e1";

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Collects watcher events until `idle` passes with nothing new.
fn settle(watcher: &SyncWatcher, total: Duration, idle: Duration) -> Vec<WatchEvent> {
    let receiver = watcher.event_receiver();
    let deadline = Instant::now() + total;
    let mut events = Vec::new();

    loop {
        let timeout = if events.is_empty() {
            deadline.saturating_duration_since(Instant::now())
        } else {
            idle
        };
        match receiver.recv_timeout(timeout) {
            Ok(event) => events.push(event),
            Err(_) => return events,
        }
    }
}

fn primed_session() -> TestSession {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(vec![
        instance(STORAGE_GUID, "Folder", &["ReplicatedStorage"]),
        script(
            UTIL_GUID,
            "ModuleScript",
            &["ReplicatedStorage", "Util"],
            "return {}",
        ),
    ]));
    session
}

#[test]
fn local_edit_emits_exactly_one_source_change() {
    let mut session = primed_session();
    let watcher = SyncWatcher::new(&session.sync_path(""), DEBOUNCE).unwrap();

    fs::write(
        session.sync_path("ReplicatedStorage/Util.luau"),
        "return 42",
    )
    .unwrap();

    let events = settle(&watcher, Duration::from_secs(5), Duration::from_millis(400));
    assert!(!events.is_empty(), "watcher never reported the edit");

    let mut outbound = Vec::new();
    for event in events {
        outbound.extend(session.engine.handle_watch_event(event));
    }

    assert_eq!(
        outbound,
        vec![DaemonMessage::ScriptSourceChanged {
            guid: Guid::from(UTIL_GUID),
            source: "return 42".to_owned(),
        }]
    );
}

#[test]
fn daemon_writes_do_not_echo() {
    let mut session = primed_session();
    let watcher = SyncWatcher::new(&session.sync_path(""), DEBOUNCE).unwrap();

    // The editor pushes new source; the engine writes the file itself.
    session.send(EditorMessage::ScriptSourceChanged {
        guid: Guid::from(UTIL_GUID),
        source: "return 'from studio'".to_owned(),
    });

    let events = settle(&watcher, Duration::from_secs(3), Duration::from_millis(400));

    let mut outbound = Vec::new();
    for event in events {
        outbound.extend(session.engine.handle_watch_event(event));
    }
    assert_eq!(outbound, Vec::new());
}

#[test]
fn burst_of_writes_settles_into_one_event_per_path() {
    let mut session = primed_session();
    let watcher = SyncWatcher::new(&session.sync_path(""), DEBOUNCE).unwrap();

    let target = session.sync_path("ReplicatedStorage/Util.luau");
    for body in ["return 1", "return 2", "return 3"] {
        fs::write(&target, body).unwrap();
    }

    let events = settle(&watcher, Duration::from_secs(5), Duration::from_millis(400));
    let changes: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, WatchEvent::Changed(_)))
        .collect();
    assert_eq!(changes.len(), 1, "burst did not collapse: {:?}", events);

    let mut outbound = Vec::new();
    for event in events {
        outbound.extend(session.engine.handle_watch_event(event));
    }
    assert_eq!(
        outbound,
        vec![DaemonMessage::ScriptSourceChanged {
            guid: Guid::from(UTIL_GUID),
            source: "return 3".to_owned(),
        }]
    );
}

#[test]
fn local_unlink_round_trips_through_the_watcher() {
    let mut session = primed_session();
    let watcher = SyncWatcher::new(&session.sync_path(""), DEBOUNCE).unwrap();

    fs::remove_file(session.sync_path("ReplicatedStorage/Util.luau")).unwrap();

    let events = settle(&watcher, Duration::from_secs(5), Duration::from_millis(400));
    let mut outbound = Vec::new();
    for event in events {
        outbound.extend(session.engine.handle_watch_event(event));
    }

    assert_eq!(
        outbound,
        vec![DaemonMessage::InstanceDeleted {
            guid: Guid::from(UTIL_GUID),
        }]
    );
    assert!(session
        .engine
        .tree()
        .get_node(&Guid::from(UTIL_GUID))
        .is_none());
}
