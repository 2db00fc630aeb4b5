use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// A single entry in the repository tree. The synthetic root has an empty
/// `path`; every other node's path is `parent.path + "/" + name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    pub children: Vec<Node>,
    pub is_expanded: bool,
    pub is_missing: bool,
    pub is_binary: bool,
}

impl Node {
    pub fn root() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            kind: NodeKind::Directory,
            children: Vec::new(),
            is_expanded: true,
            is_missing: false,
            is_binary: false,
        }
    }

    fn new(name: &str, path: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind,
            children: Vec::new(),
            is_expanded: false,
            is_missing: false,
            is_binary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: NodeKind,
}

/// Display snapshot of one flattened node; cursor arithmetic and rendering
/// operate on these copies, never on the owned tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    pub depth: usize,
    pub is_expanded: bool,
    pub is_missing: bool,
    pub is_binary: bool,
}

impl FlatEntry {
    pub fn is_selectable_file(&self) -> bool {
        self.kind == NodeKind::File && !self.is_missing && !self.is_binary
    }
}

/// Build a nested tree from flat entries. Intermediate directories are
/// created on first sight and deduplicated by path; empty paths are skipped.
pub fn build_tree(entries: &[TreeEntry]) -> Node {
    let mut root = Node::root();

    for entry in entries {
        if entry.path.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.path.split('/').collect();
        let mut current = &mut root;
        let mut curr_path = String::new();

        for (i, name) in parts.iter().enumerate() {
            if !curr_path.is_empty() {
                curr_path.push('/');
            }
            curr_path.push_str(name);

            let pos = current.children.iter().position(|c| c.name == *name);
            let idx = match pos {
                Some(idx) => idx,
                None => {
                    let kind = if i == parts.len() - 1 {
                        entry.kind
                    } else {
                        NodeKind::Directory
                    };
                    current.children.push(Node::new(name, &curr_path, kind));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[idx];
        }
    }

    root
}

/// Sort each directory's children: directories before files, then byte-order
/// name.
pub fn sort_tree(node: &mut Node) {
    node.children.sort_by(|a, b| {
        let rank = |n: &Node| if n.kind == NodeKind::Directory { 0 } else { 1 };
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
    for child in &mut node.children {
        sort_tree(child);
    }
}

/// Flatten the tree into display order. The starting node itself is excluded;
/// collapsed directories contribute themselves but no descendants.
pub fn flatten(node: &Node) -> Vec<FlatEntry> {
    let mut out = Vec::new();
    flatten_into(node, 0, &mut out);
    out
}

fn flatten_into(node: &Node, depth: usize, out: &mut Vec<FlatEntry>) {
    if depth > 0 {
        out.push(FlatEntry {
            name: node.name.clone(),
            path: node.path.clone(),
            kind: node.kind,
            depth,
            is_expanded: node.is_expanded,
            is_missing: node.is_missing,
            is_binary: node.is_binary,
        });
    }
    if node.kind == NodeKind::Directory && node.is_expanded {
        for child in &node.children {
            flatten_into(child, depth + 1, out);
        }
    }
}

/// All selectable file paths under `node`, recursively. Phantom and binary
/// files are excluded; directories contribute only their descendants.
pub fn descendant_paths(node: &Node) -> Vec<String> {
    let mut paths = Vec::new();
    collect_descendants(node, &mut paths);
    paths
}

fn collect_descendants(node: &Node, out: &mut Vec<String>) {
    for child in &node.children {
        match child.kind {
            NodeKind::File => {
                if !child.is_missing && !child.is_binary {
                    out.push(child.path.clone());
                }
            }
            NodeKind::Directory => collect_descendants(child, out),
        }
    }
}

pub fn node_at<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for name in path.split('/') {
        current = current.children.iter().find(|c| c.name == name)?;
    }
    Some(current)
}

pub fn node_at_mut<'a>(root: &'a mut Node, path: &str) -> Option<&'a mut Node> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for name in path.split('/') {
        current = current.children.iter_mut().find(|c| c.name == name)?;
    }
    Some(current)
}

fn ancestor_paths(file_path: &str) -> Vec<String> {
    let parts: Vec<&str> = file_path.split('/').collect();
    let mut prefixes = Vec::new();
    let mut prefix = String::new();
    for part in &parts[..parts.len().saturating_sub(1)] {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        prefixes.push(prefix.clone());
    }
    prefixes
}

/// Merge previously-selected paths into a live tree. Ancestor directories of
/// every prior path are expanded; paths absent from the tree are synthesized
/// as phantom (`is_missing`) nodes. Idempotent, and insensitive to the order
/// of `prior_paths`.
pub fn merge_phantoms(root: &mut Node, prior_paths: &[String]) {
    let mut dirs_to_expand = HashSet::new();
    for path in prior_paths {
        for ancestor in ancestor_paths(path) {
            dirs_to_expand.insert(ancestor);
        }
    }
    expand_matching(root, &dirs_to_expand);

    let mut index: HashSet<String> = HashSet::new();
    index_paths(root, &mut index);

    for path in prior_paths {
        if path.is_empty() {
            continue;
        }
        for ancestor in ancestor_paths(path) {
            if index.contains(&ancestor) {
                continue;
            }
            let (parent_path, name) = split_parent(&ancestor);
            if let Some(parent) = node_at_mut(root, parent_path) {
                let mut dir = Node::new(name, &ancestor, NodeKind::Directory);
                dir.is_missing = true;
                dir.is_expanded = true;
                parent.children.push(dir);
                index.insert(ancestor);
            }
        }
        if !index.contains(path) {
            let (parent_path, name) = split_parent(path);
            if let Some(parent) = node_at_mut(root, parent_path) {
                let mut file = Node::new(name, path, NodeKind::File);
                file.is_missing = true;
                parent.children.push(file);
                index.insert(path.clone());
            }
        }
    }

    sort_tree(root);
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn expand_matching(node: &mut Node, targets: &HashSet<String>) {
    if targets.contains(&node.path) {
        node.is_expanded = true;
    }
    for child in &mut node.children {
        expand_matching(child, targets);
    }
}

fn index_paths(node: &Node, index: &mut HashSet<String>) {
    index.insert(node.path.clone());
    for child in &node.children {
        index_paths(child, index);
    }
}
