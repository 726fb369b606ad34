//! End-to-end scenarios over the sync engine: a cold connect, renames,
//! moves, same-name siblings, deletions, and reconnect orphan handling, all
//! asserted against the real filesystem and the real sourcemap file.

use std::fs;

use libazul::{DaemonMessage, EditorMessage, Guid, SessionState, WatchEvent};
use pretty_assertions::assert_eq;

use crate::azul_test::{find_node, full_snapshot, instance, script, updated, TestSession};

const UTIL_GUID: &str = "aaaa1111aaaa1111";
const WORKSPACE_GUID: &str = "f0f0f0f0f0f0f0f0";
const STORAGE_GUID: &str = "e1e1e1e1e1e1e1e1";

fn base_snapshot() -> EditorMessage {
    full_snapshot(vec![
        instance(WORKSPACE_GUID, "Folder", &["Workspace"]),
        instance(STORAGE_GUID, "Folder", &["ReplicatedStorage"]),
        script(
            UTIL_GUID,
            "ModuleScript",
            &["ReplicatedStorage", "Util"],
            "return {}",
        ),
    ])
}

#[test]
fn connect_requests_a_snapshot() {
    let mut session = TestSession::new();
    let messages = session.connect();
    assert_eq!(messages, vec![DaemonMessage::request_snapshot()]);
    assert_eq!(session.engine.state(), SessionState::Priming);
}

#[test]
fn connect_without_auto_request_stays_quiet() {
    let mut session = TestSession::with_options(|options| {
        options.request_snapshot_on_connect = false;
    });
    assert_eq!(session.connect(), Vec::new());
}

#[test]
fn cold_connect_projects_scripts_and_sourcemap() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    assert_eq!(session.engine.state(), SessionState::Live);

    let util_file = session.sync_path("ReplicatedStorage/Util.luau");
    assert_eq!(fs::read_to_string(&util_file).unwrap(), "return {}");

    let root = session.sourcemap();
    assert_eq!(root.name, "Game");
    assert_eq!(root.class_name, "DataModel");

    let util = find_node(&root, &["ReplicatedStorage", "Util"]).unwrap();
    assert_eq!(util.guid, Some(Guid::from(UTIL_GUID)));
    assert_eq!(util.class_name, "ModuleScript");
    assert_eq!(util.file_paths.len(), 1);
    assert!(util.file_paths[0].ends_with("sync/ReplicatedStorage/Util.luau"));
    assert!(!util.file_paths[0].contains('\\'));
}

#[test]
fn snapshot_applied_twice_is_identical() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());
    let first = fs::read_to_string(session.sourcemap_path()).unwrap();

    session.send(base_snapshot());
    let second = fs::read_to_string(session.sourcemap_path()).unwrap();

    assert_eq!(first, second);
    assert_eq!(session.engine.tree().stats().total_nodes, 3);
}

#[test]
fn rename_moves_file_and_sourcemap_entry() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    let mut renamed = script(
        UTIL_GUID,
        "ModuleScript",
        &["ReplicatedStorage", "Util"],
        "return {}",
    );
    renamed.name = "Helper".to_owned();
    session.send(updated(renamed));

    assert!(!session.sync_path("ReplicatedStorage/Util.luau").exists());
    let helper_file = session.sync_path("ReplicatedStorage/Helper.luau");
    assert_eq!(fs::read_to_string(&helper_file).unwrap(), "return {}");

    let root = session.sourcemap();
    assert!(find_node(&root, &["ReplicatedStorage", "Util"]).is_none());
    let helper = find_node(&root, &["ReplicatedStorage", "Helper"]).unwrap();
    assert_eq!(helper.guid, Some(Guid::from(UTIL_GUID)));
}

#[test]
fn move_relocates_file_and_prunes_empty_directory() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    let mut moved = script(
        UTIL_GUID,
        "ModuleScript",
        &["ReplicatedStorage", "Util"],
        "return {}",
    );
    moved.parent_guid = Some(Guid::from(WORKSPACE_GUID));
    moved.path = vec!["Workspace".to_owned(), "Util".to_owned()];
    session.send(updated(moved));

    assert!(!session.sync_path("ReplicatedStorage/Util.luau").exists());
    assert!(!session.sync_path("ReplicatedStorage").exists());
    assert!(session.sync_path("Workspace/Util.luau").exists());

    let root = session.sourcemap();
    let storage = find_node(&root, &["ReplicatedStorage"]).unwrap();
    assert!(storage.children.is_empty());
    let util = find_node(&root, &["Workspace", "Util"]).unwrap();
    assert_eq!(util.guid, Some(Guid::from(UTIL_GUID)));
}

#[test]
fn folder_rename_moves_descendant_script_files() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(vec![
        instance(STORAGE_GUID, "Folder", &["ReplicatedStorage"]),
        instance("d2d2d2d2", "Folder", &["ReplicatedStorage", "Modules"]),
        script(
            UTIL_GUID,
            "ModuleScript",
            &["ReplicatedStorage", "Modules", "Util"],
            "return 1",
        ),
    ]));

    let mut renamed = instance("d2d2d2d2", "Folder", &["ReplicatedStorage", "Modules"]);
    renamed.name = "Shared".to_owned();
    session.send(updated(renamed));

    assert!(!session
        .sync_path("ReplicatedStorage/Modules/Util.luau")
        .exists());
    assert!(session
        .sync_path("ReplicatedStorage/Shared/Util.luau")
        .exists());

    let root = session.sourcemap();
    assert!(find_node(&root, &["ReplicatedStorage", "Modules"]).is_none());
    let util = find_node(&root, &["ReplicatedStorage", "Shared", "Util"]).unwrap();
    assert_eq!(util.guid, Some(Guid::from(UTIL_GUID)));
}

#[test]
fn same_name_siblings_coexist_on_disk_and_in_sourcemap() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(vec![instance(
        STORAGE_GUID,
        "Folder",
        &["ReplicatedStorage"],
    )]));

    session.send(updated(script(
        "bbbb2222bbbb2222",
        "ModuleScript",
        &["ReplicatedStorage", "Shared"],
        "return 1",
    )));
    session.send(updated(script(
        "cccc3333cccc3333",
        "ModuleScript",
        &["ReplicatedStorage", "Shared"],
        "return 2",
    )));

    let plain = session.sync_path("ReplicatedStorage/Shared.luau");
    let suffixed = session.sync_path("ReplicatedStorage/Shared__cccc3333.luau");
    assert_eq!(fs::read_to_string(&plain).unwrap(), "return 1");
    assert_eq!(fs::read_to_string(&suffixed).unwrap(), "return 2");

    let root = session.sourcemap();
    let storage = find_node(&root, &["ReplicatedStorage"]).unwrap();
    let shared: Vec<_> = storage
        .children
        .iter()
        .filter(|child| child.name == "Shared")
        .collect();
    assert_eq!(shared.len(), 2);
    assert_ne!(shared[0].guid, shared[1].guid);
}

#[test]
fn delete_removes_file_but_keeps_service_directory() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(vec![
        instance(WORKSPACE_GUID, "Folder", &["Workspace"]),
        script(
            UTIL_GUID,
            "ModuleScript",
            &["Workspace", "Helper"],
            "return {}",
        ),
    ]));

    session.send(EditorMessage::InstanceDeleted {
        guid: Guid::from(UTIL_GUID),
    });

    assert!(!session.sync_path("Workspace/Helper.luau").exists());
    assert!(session.sync_path("Workspace").exists());

    let root = session.sourcemap();
    assert!(find_node(&root, &["Workspace", "Helper"]).is_none());
    assert!(find_node(&root, &["Workspace"]).is_some());
}

#[test]
fn deleting_a_folder_removes_descendant_script_files() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(vec![
        instance(STORAGE_GUID, "Folder", &["ReplicatedStorage"]),
        instance("d2d2d2d2", "Folder", &["ReplicatedStorage", "Modules"]),
        script(
            UTIL_GUID,
            "ModuleScript",
            &["ReplicatedStorage", "Modules", "Util"],
            "return 1",
        ),
        script(
            "bbbb2222bbbb2222",
            "Script",
            &["ReplicatedStorage", "Modules", "Boot"],
            "print(1)",
        ),
    ]));

    session.send(EditorMessage::InstanceDeleted {
        guid: Guid::from("d2d2d2d2"),
    });

    assert!(!session.sync_path("ReplicatedStorage/Modules").exists());
    let root = session.sourcemap();
    assert!(find_node(&root, &["ReplicatedStorage", "Modules"]).is_none());
}

#[test]
fn rename_round_trip_leaves_no_strays() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    let mut renamed = script(
        UTIL_GUID,
        "ModuleScript",
        &["ReplicatedStorage", "Util"],
        "return {}",
    );
    renamed.name = "Helper".to_owned();
    session.send(updated(renamed));

    let mut back = script(
        UTIL_GUID,
        "ModuleScript",
        &["ReplicatedStorage", "Helper"],
        "return {}",
    );
    back.name = "Util".to_owned();
    session.send(updated(back));

    assert!(session.sync_path("ReplicatedStorage/Util.luau").exists());
    assert!(!session.sync_path("ReplicatedStorage/Helper.luau").exists());

    let root = session.sourcemap();
    let storage = find_node(&root, &["ReplicatedStorage"]).unwrap();
    assert_eq!(storage.children.len(), 1);
    assert_eq!(storage.children[0].name, "Util");
    assert_eq!(storage.children[0].guid, Some(Guid::from(UTIL_GUID)));
}

#[test]
fn source_change_from_editor_rewrites_the_file() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    session.send(EditorMessage::ScriptSourceChanged {
        guid: Guid::from(UTIL_GUID),
        source: "return 42".to_owned(),
    });

    assert_eq!(
        fs::read_to_string(session.sync_path("ReplicatedStorage/Util.luau")).unwrap(),
        "return 42"
    );
}

#[test]
fn orphans_are_swept_when_configured() {
    let mut session = TestSession::with_options(|options| {
        options.delete_orphans_on_connect = true;
    });
    let stray = session.sync_path("Stray.luau");
    fs::write(&stray, "-- left over").unwrap();

    session.connect();
    session.send(base_snapshot());

    assert!(!stray.exists());
    assert!(session.sync_path("ReplicatedStorage/Util.luau").exists());
}

#[test]
fn orphans_are_kept_by_default() {
    let mut session = TestSession::new();
    let stray = session.sync_path("Stray.luau");
    fs::write(&stray, "-- left over").unwrap();

    session.connect();
    session.send(base_snapshot());

    assert!(stray.exists());
}

#[test]
fn watcher_unlink_deletes_the_instance_and_notifies_the_editor() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    let util_file = session.sync_path("ReplicatedStorage/Util.luau");
    fs::remove_file(&util_file).unwrap();

    let messages = session
        .engine
        .handle_watch_event(WatchEvent::Removed(util_file));
    assert_eq!(
        messages,
        vec![DaemonMessage::InstanceDeleted {
            guid: Guid::from(UTIL_GUID),
        }]
    );

    assert!(session
        .engine
        .tree()
        .get_node(&Guid::from(UTIL_GUID))
        .is_none());
    let root = session.sourcemap();
    assert!(find_node(&root, &["ReplicatedStorage", "Util"]).is_none());
}

#[test]
fn watcher_events_for_unmapped_paths_are_ignored() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    let unmapped = session.sync_path("ReplicatedStorage/NotOurs.txt");
    fs::write(&unmapped, "hello").unwrap();

    assert_eq!(
        session
            .engine
            .handle_watch_event(WatchEvent::Changed(unmapped.clone())),
        Vec::new()
    );
    assert_eq!(
        session.engine.handle_watch_event(WatchEvent::Removed(unmapped)),
        Vec::new()
    );
}

#[test]
fn disconnect_retains_tree_for_reconnect() {
    let mut session = TestSession::new();
    session.connect();
    session.send(base_snapshot());

    session
        .engine
        .handle_session_event(libazul::SessionEvent::Disconnected);
    assert_eq!(session.engine.state(), SessionState::Disconnected);
    assert_eq!(session.engine.tree().stats().total_nodes, 3);

    // Reconnect primes again and a fresh snapshot lands cleanly.
    let messages = session.connect();
    assert_eq!(messages, vec![DaemonMessage::request_snapshot()]);
    session.send(base_snapshot());
    assert_eq!(session.engine.state(), SessionState::Live);
}
