//! The in-memory mirror of the editor's DataModel.
//!
//! Identity is the guid, full stop: containment lives in a node table keyed
//! by guid, `parent` is a back-reference that is looked up on demand, and a
//! path index maps each full path to the set of guids that currently occupy
//! it. Same-name siblings are legal, which is why the index is a multimap
//! and why path-only lookups refuse to guess between multiple candidates.

use std::collections::{HashMap, VecDeque};

use crate::message::{Guid, InstanceData};
use crate::multimap::MultiMap;

#[inline]
pub fn is_script_class(class_name: &str) -> bool {
    matches!(class_name, "Script" | "LocalScript" | "ModuleScript")
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub guid: Guid,
    pub class_name: String,
    pub name: String,
    /// Segments from the root service down to this node, inclusive of its
    /// own name. Length 1 for services, empty for the synthetic root.
    pub path: Vec<String>,
    pub parent: Option<Guid>,
    pub source: Option<String>,
    pub children: Vec<Guid>,
}

impl TreeNode {
    pub fn is_script(&self) -> bool {
        is_script_class(&self.class_name)
    }
}

/// What `update_instance` observed and did, so the caller can mirror the
/// change to disk and into the sourcemap.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReceipt {
    pub guid: Guid,
    pub is_new: bool,
    pub path_changed: bool,
    pub name_changed: bool,
    pub parent_changed: bool,
    pub prev_path: Option<Vec<String>>,
    pub prev_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub script_nodes: usize,
    pub services: usize,
}

#[derive(Debug, Default)]
pub struct SyncTree {
    nodes: HashMap<Guid, TreeNode>,
    path_index: MultiMap<Vec<String>, Guid>,
}

impl SyncTree {
    pub fn new() -> Self {
        SyncTree {
            nodes: HashMap::new(),
            path_index: MultiMap::new(),
        }
    }

    /// The synthetic DataModel root, created the first time anything needs
    /// to hang a service off of it.
    fn ensure_root(&mut self) -> Guid {
        let root = Guid::root();
        self.nodes.entry(root.clone()).or_insert_with(|| TreeNode {
            guid: Guid::root(),
            class_name: "DataModel".to_owned(),
            name: "DataModel".to_owned(),
            path: Vec::new(),
            parent: None,
            source: None,
            children: Vec::new(),
        });
        root
    }

    /// Replaces the entire tree with the given snapshot.
    ///
    /// Two passes: materialize every node first, then link children, so that
    /// parent resolution sees the whole snapshot no matter what order the
    /// plugin serialized it in.
    pub fn apply_full_snapshot(&mut self, instances: Vec<InstanceData>) {
        self.nodes.clear();
        self.path_index.clear();

        for data in &instances {
            let node = TreeNode {
                guid: data.guid.clone(),
                class_name: data.class_name.clone(),
                name: data.name.clone(),
                path: data.path.clone(),
                parent: None,
                source: data.source.clone(),
                children: Vec::new(),
            };
            if let Some(previous) = self.nodes.insert(data.guid.clone(), node) {
                log::warn!(
                    "Snapshot lists guid {} more than once; keeping the last entry",
                    data.guid
                );
                self.path_index.remove(&previous.path, &previous.guid);
            }
            self.path_index
                .insert(data.path.clone(), data.guid.clone());
        }

        for data in &instances {
            match self.resolve_parent(data.parent_guid.as_ref(), &data.path) {
                Some(parent) => self.attach(&data.guid, &parent),
                None => log::warn!(
                    "No unambiguous parent for {} (guid {}); left unparented until the next snapshot",
                    data.path.join("."),
                    data.guid
                ),
            }
        }

        log::debug!("Applied full snapshot of {} instances", instances.len());
    }

    /// Upserts one instance, keyed by guid.
    pub fn update_instance(&mut self, data: InstanceData) -> UpdateReceipt {
        if !self.nodes.contains_key(&data.guid) {
            return self.insert_new(data);
        }

        let (prev_name, prev_path, prev_parent) = {
            let node = &self.nodes[&data.guid];
            (node.name.clone(), node.path.clone(), node.parent.clone())
        };

        let name_changed = data.name != prev_name;

        let desired_parent = self
            .resolve_parent(data.parent_guid.as_ref(), &data.path)
            .or_else(|| prev_parent.clone());
        let parent_changed = desired_parent != prev_parent;

        let new_path = match &desired_parent {
            Some(parent) => {
                let mut path = self.nodes[parent].path.clone();
                path.push(data.name.clone());
                path
            }
            None => data.path.clone(),
        };
        let path_changed = new_path != prev_path;

        if name_changed || parent_changed || path_changed {
            self.unregister_subtree(&data.guid);

            if let Some(parent) = &desired_parent {
                self.attach(&data.guid, parent);
            }

            let node = self.nodes.get_mut(&data.guid).expect("node exists");
            node.name = data.name.clone();
            node.class_name = data.class_name.clone();
            node.path = new_path;
            if let Some(source) = data.source {
                node.source = Some(source);
            }

            self.recalculate_descendant_paths(&data.guid);
            self.register_subtree(&data.guid);
        } else {
            let node = self.nodes.get_mut(&data.guid).expect("node exists");
            node.class_name = data.class_name.clone();
            if let Some(source) = data.source {
                node.source = Some(source);
            }
        }

        UpdateReceipt {
            guid: data.guid,
            is_new: false,
            path_changed,
            name_changed,
            parent_changed,
            prev_path: path_changed.then_some(prev_path),
            prev_name: name_changed.then_some(prev_name),
        }
    }

    fn insert_new(&mut self, data: InstanceData) -> UpdateReceipt {
        let guid = data.guid.clone();
        let node = TreeNode {
            guid: guid.clone(),
            class_name: data.class_name.clone(),
            name: data.name.clone(),
            path: data.path.clone(),
            parent: None,
            source: data.source.clone(),
            children: Vec::new(),
        };
        self.nodes.insert(guid.clone(), node);

        match self.resolve_parent(data.parent_guid.as_ref(), &data.path) {
            Some(parent) => {
                self.attach(&guid, &parent);
                let mut path = self.nodes[&parent].path.clone();
                path.push(data.name);
                self.nodes.get_mut(&guid).expect("node exists").path = path;
            }
            None => log::warn!(
                "No unambiguous parent for new instance {} (guid {}); kept with its reported path",
                data.path.join("."),
                guid
            ),
        }

        let path = self.nodes[&guid].path.clone();
        self.path_index.insert(path, guid.clone());

        UpdateReceipt {
            guid,
            is_new: true,
            path_changed: false,
            name_changed: false,
            parent_changed: false,
            prev_path: None,
            prev_name: None,
        }
    }

    /// Removes an instance and its whole subtree, returning the detached
    /// root so callers can propagate file deletions and sourcemap pruning.
    pub fn delete_instance(&mut self, guid: &Guid) -> Option<TreeNode> {
        let parent = self.nodes.get(guid)?.parent.clone();
        if let Some(parent) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|child| child != guid);
            }
        }

        let mut removed_root = None;
        for member in self.subtree_guids(guid) {
            if let Some(node) = self.nodes.remove(&member) {
                self.path_index.remove(&node.path, &member);
                if member == *guid {
                    removed_root = Some(node);
                }
            }
        }
        removed_root
    }

    /// Source-only mutation for script edits that carry no structural
    /// change. Returns false if the guid is unknown.
    pub fn update_script_source(&mut self, guid: &Guid, source: String) -> bool {
        match self.nodes.get_mut(guid) {
            Some(node) => {
                node.source = Some(source);
                true
            }
            None => false,
        }
    }

    pub fn get_node(&self, guid: &Guid) -> Option<&TreeNode> {
        self.nodes.get(guid)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn script_nodes(&self) -> Vec<&TreeNode> {
        let mut scripts: Vec<_> = self.nodes.values().filter(|node| node.is_script()).collect();
        scripts.sort_by(|a, b| sibling_order(a, b));
        scripts
    }

    /// Every script in the subtree rooted at `guid`, the root included.
    pub fn descendant_scripts(&self, guid: &Guid) -> Vec<&TreeNode> {
        self.subtree_guids(guid)
            .iter()
            .filter_map(|member| self.nodes.get(member))
            .filter(|node| node.is_script())
            .collect()
    }

    /// Path-only lookup. Deliberately returns nothing when several nodes
    /// share the path: callers must disambiguate by guid or accept failure.
    pub fn lookup_path(&self, path: &[String]) -> Option<&Guid> {
        match self.path_index.get(&path.to_vec()) {
            [single] => Some(single),
            _ => None,
        }
    }

    pub fn nodes_at_path(&self, path: &[String]) -> &[Guid] {
        self.path_index.get(&path.to_vec())
    }

    /// Root services, ordered by (name, class, guid). Falls back to scanning
    /// for path-length-1 nodes when no synthetic root was ever created.
    pub fn services(&self) -> Vec<&TreeNode> {
        let mut services: Vec<&TreeNode> = match self.nodes.get(&Guid::root()) {
            Some(root) => root
                .children
                .iter()
                .filter_map(|child| self.nodes.get(child))
                .collect(),
            None => self
                .nodes
                .values()
                .filter(|node| node.path.len() == 1)
                .collect(),
        };
        services.sort_by(|a, b| sibling_order(a, b));
        services
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total_nodes: self
                .nodes
                .values()
                .filter(|node| !node.guid.is_root())
                .count(),
            script_nodes: self.nodes.values().filter(|node| node.is_script()).count(),
            services: self
                .nodes
                .values()
                .filter(|node| node.path.len() == 1)
                .count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats().total_nodes == 0
    }

    /// Resolves a parent: explicit guid wins, then a unique path-index match
    /// on the parent path, with services always attaching to the synthetic
    /// root. `None` means ambiguous or unknown.
    fn resolve_parent(&mut self, parent_guid: Option<&Guid>, path: &[String]) -> Option<Guid> {
        if let Some(parent) = parent_guid {
            if parent.is_root() {
                return Some(self.ensure_root());
            }
            if self.nodes.contains_key(parent) {
                return Some(parent.clone());
            }
        }

        if path.len() == 1 {
            return Some(self.ensure_root());
        }

        if path.len() > 1 {
            let parent_path = path[..path.len() - 1].to_vec();
            if let [single] = self.path_index.get(&parent_path) {
                return Some(single.clone());
            }
        }

        None
    }

    /// Links `child` under `parent`, detaching it from any previous parent.
    fn attach(&mut self, child: &Guid, parent: &Guid) {
        let previous = self.nodes.get(child).and_then(|node| node.parent.clone());
        if previous.as_ref() == Some(parent) {
            return;
        }
        if let Some(previous) = previous {
            if let Some(previous_node) = self.nodes.get_mut(&previous) {
                previous_node.children.retain(|existing| existing != child);
            }
        }

        if let Some(parent_node) = self.nodes.get_mut(parent) {
            if !parent_node.children.contains(child) {
                parent_node.children.push(child.clone());
            }
        }
        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = Some(parent.clone());
        }
    }

    /// Breadth-first guid listing of the subtree rooted at `guid`.
    fn subtree_guids(&self, guid: &Guid) -> Vec<Guid> {
        let mut members = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(guid.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                queue.extend(node.children.iter().cloned());
            }
            members.push(current);
        }
        members
    }

    fn unregister_subtree(&mut self, guid: &Guid) {
        for member in self.subtree_guids(guid) {
            if let Some(node) = self.nodes.get(&member) {
                let path = node.path.clone();
                self.path_index.remove(&path, &member);
            }
        }
    }

    fn register_subtree(&mut self, guid: &Guid) {
        for member in self.subtree_guids(guid) {
            if let Some(node) = self.nodes.get(&member) {
                let path = node.path.clone();
                self.path_index.insert(path, member);
            }
        }
    }

    /// Rewrites descendant paths after a rename or move, iteratively.
    fn recalculate_descendant_paths(&mut self, root: &Guid) {
        let Some(root_node) = self.nodes.get(root) else {
            return;
        };

        let mut queue: VecDeque<(Guid, Vec<String>)> = root_node
            .children
            .iter()
            .map(|child| (child.clone(), root_node.path.clone()))
            .collect();

        while let Some((guid, parent_path)) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(&guid) else {
                continue;
            };
            let mut path = parent_path;
            path.push(node.name.clone());
            node.path = path.clone();

            for child in node.children.clone() {
                queue.push_back((child, path.clone()));
            }
        }
    }
}

/// The deterministic sibling order used in every projected output.
pub fn sibling_order(a: &TreeNode, b: &TreeNode) -> std::cmp::Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.class_name.cmp(&b.class_name))
        .then_with(|| a.guid.cmp(&b.guid))
}
