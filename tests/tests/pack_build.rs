//! The pack → build law: packing a property-laden snapshot and then
//! building from the packed sourcemap reproduces the snapshot.

use std::collections::HashMap;

use libazul::{
    instances_from_sourcemap, merge_snapshot, sourcemap, Guid, InstanceData, PACK_VERSION,
};
use pretty_assertions::assert_eq;

use crate::azul_test::{full_snapshot, instance, script, TestSession};

const UTIL_GUID: &str = "aaaa1111aaaa1111";
const WORKSPACE_GUID: &str = "f0f0f0f0f0f0f0f0";
const STORAGE_GUID: &str = "e1e1e1e1e1e1e1e1";

fn property_snapshot() -> Vec<InstanceData> {
    let mut workspace = instance(WORKSPACE_GUID, "Workspace", &["Workspace"]);
    let mut workspace_props = serde_json::Map::new();
    workspace_props.insert("Gravity".to_owned(), serde_json::json!(196.2));
    workspace.properties = Some(workspace_props);

    let storage = instance(STORAGE_GUID, "Folder", &["ReplicatedStorage"]);

    let mut util = script(
        UTIL_GUID,
        "ModuleScript",
        &["ReplicatedStorage", "Util"],
        "return {}",
    );
    let mut util_attrs = serde_json::Map::new();
    util_attrs.insert("Version".to_owned(), serde_json::json!("1.2.0"));
    util.attributes = Some(util_attrs);

    vec![workspace, storage, util]
}

#[test]
fn pack_then_build_reproduces_the_snapshot() {
    // Live-sync first so script files and filePaths exist for build to read.
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(property_snapshot()));
    let previous = session.sourcemap();

    let packed = merge_snapshot(property_snapshot(), Some(&previous), "full");
    let built = instances_from_sourcemap(&packed).unwrap();

    assert_eq!(built.len(), 3);

    // Sorted by path length, parents first.
    let lengths: Vec<usize> = built.iter().map(|data| data.path.len()).collect();
    let mut sorted = lengths.clone();
    sorted.sort_unstable();
    assert_eq!(lengths, sorted);

    let by_guid: HashMap<&Guid, &InstanceData> =
        built.iter().map(|data| (&data.guid, data)).collect();

    for original in property_snapshot() {
        let rebuilt = by_guid
            .get(&original.guid)
            .unwrap_or_else(|| panic!("guid {} missing from build output", original.guid));
        assert_eq!(rebuilt.class_name, original.class_name);
        assert_eq!(rebuilt.name, original.name);
        assert_eq!(rebuilt.path, original.path);
        assert_eq!(rebuilt.source, original.source);
        assert_eq!(rebuilt.properties, original.properties);
        assert_eq!(rebuilt.attributes, original.attributes);
    }
}

#[test]
fn packed_sourcemap_is_stamped_and_valid() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(property_snapshot()));
    let previous = session.sourcemap();

    let packed = merge_snapshot(property_snapshot(), Some(&previous), "full");

    let meta = packed.azul.as_ref().unwrap();
    assert_eq!(meta.pack_version, PACK_VERSION);
    assert_eq!(meta.mode, "full");
    assert!(meta.packed_at.ends_with('Z') || meta.packed_at.contains('+'));

    // Every filePath carried over from the live sourcemap exists on disk.
    let report = sourcemap::validate(&packed);
    assert!(report.valid, "unexpected errors: {:?}", report.errors);
}

#[test]
fn packed_sourcemap_round_trips_through_disk() {
    let mut session = TestSession::new();
    session.connect();
    session.send(full_snapshot(property_snapshot()));
    let previous = session.sourcemap();

    let packed = merge_snapshot(property_snapshot(), Some(&previous), "full");
    let output = session.dir.path().join("packed.json");
    sourcemap::write(&packed, &output).unwrap();

    let reloaded = sourcemap::load(&output).unwrap();
    assert_eq!(reloaded, packed);
}
