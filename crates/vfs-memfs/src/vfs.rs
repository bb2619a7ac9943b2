//! Virtual filesystem implementation for the memory backend

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use vfs_conformance_traits::{
    ErrorCode, Features, FileInfo, IdentityMgr, OsType, User, Vfs, VfsError, VfsResult,
};

use crate::config::MemFsConfig;
use crate::idm::MemIdm;

const MAX_SYMLINK_DEPTH: usize = 40;
const TEMP_DIR: &str = "/tmp";

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const SEARCH: u32 = 0o1;

/// Internal node ID for filesystem nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u64);

/// Filesystem node types
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File { data: Vec<u8> },
    Directory { children: BTreeMap<String, NodeId> },
    Symlink { target: PathBuf },
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }
}

/// The whole tree. Every operation holds the tree lock for its full duration,
/// so each call is atomic with respect to every other call.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_node_id: u64,
}

impl Tree {
    fn new() -> Self {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
                mode: 0o755,
                uid: 0,
                gid: 0,
            },
        );
        Self {
            nodes,
            root,
            next_node_id: 2,
        }
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn get(&self, id: NodeId) -> Result<&Node, ErrorCode> {
        self.nodes.get(&id).ok_or(ErrorCode::ENOENT)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, ErrorCode> {
        self.nodes.get_mut(&id).ok_or(ErrorCode::ENOENT)
    }

    fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        match &self.nodes.get(&parent)?.kind {
            NodeKind::Directory { children } => children.get(name).copied(),
            _ => None,
        }
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, node: Node) -> Result<NodeId, ErrorCode> {
        let id = self.allocate_node_id();
        match &mut self.get_mut(parent)?.kind {
            NodeKind::Directory { children } => {
                children.insert(name.to_string(), id);
            }
            _ => return Err(ErrorCode::ENOTDIR),
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Detach `name` from `parent` and drop the whole subtree below it.
    fn unlink_child(&mut self, parent: NodeId, name: &str) {
        let removed = match self.nodes.get_mut(&parent).map(|n| &mut n.kind) {
            Some(NodeKind::Directory { children }) => children.remove(name),
            _ => None,
        };
        if let Some(id) = removed {
            self.drop_subtree(id);
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            if let NodeKind::Directory { children } = node.kind {
                for child in children.into_values() {
                    self.drop_subtree(child);
                }
            }
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId, parents: &HashMap<NodeId, NodeId>) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match parents.get(&id) {
                Some(parent) => id = *parent,
                None => return false,
            }
        }
    }

    fn parent_map(&self) -> HashMap<NodeId, NodeId> {
        let mut parents = HashMap::new();
        for (id, node) in &self.nodes {
            if let NodeKind::Directory { children } = &node.kind {
                for child in children.values() {
                    parents.insert(*child, *id);
                }
            }
        }
        parents
    }
}

/// Lexically clean `path` into its normal components, rooted at `/`.
fn split(path: &Path) -> Vec<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    parts
}

fn join(parts: &[String]) -> PathBuf {
    let mut path = PathBuf::from("/");
    for part in parts {
        path.push(part);
    }
    path
}

struct Shared {
    config: MemFsConfig,
    idm: Arc<MemIdm>,
    tree: Mutex<Tree>,
}

/// Memory-backed filesystem.
///
/// Clones and handles derived with [`Vfs::with_user`] share one tree; each
/// handle carries the identity its operations are checked against.
#[derive(Clone)]
pub struct MemFs {
    shared: Arc<Shared>,
    user: User,
}

impl MemFs {
    /// Create an empty filesystem with a world-writable `/tmp`, acting as root.
    pub fn new(config: MemFsConfig) -> Self {
        let idm = Arc::new(MemIdm::new(config.read_only_idm));
        let user = idm.admin_user();
        let mut tree = Tree::new();
        let root = tree.root;
        // The root directory always exists, so this cannot fail.
        let _ = tree.insert_child(
            root,
            TEMP_DIR.trim_start_matches('/'),
            Node {
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
                mode: 0o777,
                uid: 0,
                gid: 0,
            },
        );

        Self {
            shared: Arc::new(Shared {
                config,
                idm,
                tree: Mutex::new(tree),
            }),
            user,
        }
    }

    /// The concrete identity manager, for callers that need more than the trait.
    pub fn mem_idm(&self) -> Arc<MemIdm> {
        self.shared.idm.clone()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.shared.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_windows(&self) -> bool {
        self.shared.config.os_type == OsType::Windows
    }

    /// Translate a POSIX code into the vocabulary of the emulated OS.
    fn code(&self, code: ErrorCode) -> ErrorCode {
        if !self.is_windows() {
            return code;
        }
        match code {
            ErrorCode::EACCES | ErrorCode::EPERM | ErrorCode::EISDIR => ErrorCode::ERROR_ACCESS_DENIED,
            ErrorCode::ENOENT => ErrorCode::ERROR_FILE_NOT_FOUND,
            ErrorCode::ENOTDIR => ErrorCode::ERROR_PATH_NOT_FOUND,
            ErrorCode::EEXIST => ErrorCode::ERROR_ALREADY_EXISTS,
            ErrorCode::ENOTEMPTY => ErrorCode::ERROR_DIR_NOT_EMPTY,
            ErrorCode::EINVAL | ErrorCode::ELOOP => ErrorCode::ERROR_INVALID_NAME,
            ErrorCode::ENOSYS => ErrorCode::ERROR_NOT_SUPPORTED,
            other => other,
        }
    }

    fn path_err(&self, op: &str, path: &Path, code: ErrorCode) -> VfsError {
        VfsError::path(op, path, self.code(code))
    }

    fn link_err(&self, op: &str, old: &Path, new: &Path, code: ErrorCode) -> VfsError {
        VfsError::link(op, old, new, self.code(code))
    }

    fn can(&self, node: &Node, want: u32) -> bool {
        if self.user.is_admin() {
            return true;
        }
        if self.is_windows() {
            return want & WRITE == 0 || node.mode & 0o200 != 0;
        }
        let shift = if node.uid == self.user.uid {
            6
        } else if node.gid == self.user.gid {
            3
        } else {
            0
        };
        (node.mode >> shift) & want == want
    }

    fn new_node(&self, kind: NodeKind, mode: u32) -> Node {
        Node {
            kind,
            mode: mode & !self.shared.config.umask & 0o7777,
            uid: self.user.uid,
            gid: self.user.gid,
        }
    }

    /// Resolve a cleaned path to a node, following symlinks in every
    /// component but the last unless `follow_last` is set.
    fn resolve(&self, tree: &Tree, parts: &[String], follow_last: bool) -> Result<NodeId, ErrorCode> {
        self.resolve_depth(tree, parts, follow_last, 0)
    }

    fn resolve_depth(
        &self,
        tree: &Tree,
        parts: &[String],
        follow_last: bool,
        depth: usize,
    ) -> Result<NodeId, ErrorCode> {
        let mut current = tree.root;

        for (i, name) in parts.iter().enumerate() {
            let node = tree.get(current)?;
            let NodeKind::Directory { children } = &node.kind else {
                return Err(ErrorCode::ENOTDIR);
            };
            if !self.can(node, SEARCH) {
                return Err(ErrorCode::EACCES);
            }
            let child_id = *children.get(name).ok_or(ErrorCode::ENOENT)?;

            let is_last = i + 1 == parts.len();
            if let NodeKind::Symlink { target } = &tree.get(child_id)?.kind {
                if !is_last || follow_last {
                    if depth >= MAX_SYMLINK_DEPTH {
                        return Err(ErrorCode::ELOOP);
                    }
                    let mut next = split(&join(&parts[..i]).join(target));
                    next.extend(parts[i + 1..].iter().cloned());
                    return self.resolve_depth(tree, &next, follow_last, depth + 1);
                }
            }
            current = child_id;
        }

        Ok(current)
    }

    /// Resolve the directory that holds the last component of `parts`.
    fn resolve_parent<'p>(&self, tree: &Tree, parts: &'p [String]) -> Result<(NodeId, &'p str), ErrorCode> {
        let (name, dir) = parts.split_last().ok_or(ErrorCode::EINVAL)?;
        let parent = self.resolve(tree, dir, true)?;
        let node = tree.get(parent)?;
        if !node.is_dir() {
            return Err(ErrorCode::ENOTDIR);
        }
        if !self.can(node, SEARCH) {
            return Err(ErrorCode::EACCES);
        }
        Ok((parent, name.as_str()))
    }

    fn mkdir_locked(&self, tree: &mut Tree, path: &Path, mode: u32) -> VfsResult<()> {
        let parts = split(path);
        let (parent, name) = self
            .resolve_parent(tree, &parts)
            .map_err(|code| self.path_err("mkdir", path, code))?;

        if tree.child(parent, name).is_some() {
            return Err(self.path_err("mkdir", path, ErrorCode::EEXIST));
        }
        let parent_node = tree.get(parent).map_err(|code| self.path_err("mkdir", path, code))?;
        if !self.can(parent_node, WRITE | SEARCH) {
            return Err(self.path_err("mkdir", path, ErrorCode::EACCES));
        }

        let node = self.new_node(
            NodeKind::Directory {
                children: BTreeMap::new(),
            },
            mode,
        );
        tree.insert_child(parent, name, node)
            .map_err(|code| self.path_err("mkdir", path, code))?;
        Ok(())
    }

    fn open_for_write(&self, tree: &mut Tree, path: &Path, mode: u32, exclusive: bool) -> VfsResult<NodeId> {
        let parts = split(path);
        let err = |code| self.path_err("open", path, code);

        let (parent, name) = self.resolve_parent(tree, &parts).map_err(err)?;
        if let Some(existing) = tree.child(parent, name) {
            if exclusive {
                return Err(err(ErrorCode::EEXIST));
            }
            let id = self.resolve(tree, &parts, true).map_err(err)?;
            let node = tree.get(id).map_err(err)?;
            if node.is_dir() {
                return Err(err(ErrorCode::EISDIR));
            }
            if !self.can(node, WRITE) {
                return Err(err(ErrorCode::EACCES));
            }
            debug!(path = %path.display(), node = ?existing, "truncating file");
            if let NodeKind::File { data } = &mut tree.get_mut(id).map_err(err)?.kind {
                data.clear();
            }
            return Ok(id);
        }

        let parent_node = tree.get(parent).map_err(err)?;
        if !self.can(parent_node, WRITE | SEARCH) {
            return Err(err(ErrorCode::EACCES));
        }
        let node = self.new_node(NodeKind::File { data: Vec::new() }, mode);
        tree.insert_child(parent, name, node).map_err(err)
    }

    fn file_info(&self, tree: &Tree, id: NodeId, path: &Path) -> Result<FileInfo, ErrorCode> {
        let node = tree.get(id)?;
        let size = match &node.kind {
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Directory { .. } => 0,
            NodeKind::Symlink { target } => target.as_os_str().len() as u64,
        };
        Ok(FileInfo {
            name: path
                .file_name()
                .map_or_else(|| "/".to_string(), |n| n.to_string_lossy().into_owned()),
            size,
            mode: node.mode & 0o777,
            is_dir: node.is_dir(),
            is_symlink: matches!(node.kind, NodeKind::Symlink { .. }),
            uid: node.uid,
            gid: node.gid,
        })
    }

    fn remove_tree(&self, tree: &mut Tree, parent: NodeId, name: &str, path: &Path) -> VfsResult<()> {
        let Some(id) = tree.child(parent, name) else {
            return Ok(());
        };
        let node = tree.get(id).map_err(|code| self.path_err("unlinkat", path, code))?;

        if let NodeKind::Directory { children } = &node.kind {
            if !children.is_empty() {
                if !self.can(node, READ | SEARCH) {
                    return Err(self.path_err("open", path, ErrorCode::EACCES));
                }
                let names: Vec<String> = children.keys().cloned().collect();
                if !self.can(node, WRITE | SEARCH) {
                    return Err(self.path_err("unlinkat", &path.join(&names[0]), ErrorCode::EACCES));
                }
                for child in &names {
                    self.remove_tree(tree, id, child, &path.join(child))?;
                }
            }
        }

        let parent_node = tree.get(parent).map_err(|code| self.path_err("unlinkat", path, code))?;
        if !self.can(parent_node, WRITE | SEARCH) {
            return Err(self.path_err("unlinkat", path, ErrorCode::EACCES));
        }
        tree.unlink_child(parent, name);
        Ok(())
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new(MemFsConfig::default())
    }
}

impl Vfs for MemFs {
    fn name(&self) -> &str {
        "memfs"
    }

    fn os_type(&self) -> OsType {
        self.shared.config.os_type
    }

    fn features(&self) -> Features {
        Features {
            symlink: self.shared.config.enable_symlinks,
            identity_mgr: true,
            read_only_idm: self.shared.config.read_only_idm,
            read_only: false,
            real_fs: false,
            chown: true,
        }
    }

    fn user(&self) -> &User {
        &self.user
    }

    fn with_user(&self, user: &User) -> VfsResult<Arc<dyn Vfs>> {
        let known = self
            .shared
            .idm
            .lookup_user(&user.name)
            .map_err(|e| VfsError::other(e.to_string()))?;
        Ok(Arc::new(Self {
            shared: self.shared.clone(),
            user: known,
        }))
    }

    fn idm(&self) -> Option<Arc<dyn IdentityMgr>> {
        let idm: Arc<dyn IdentityMgr> = self.shared.idm.clone();
        Some(idm)
    }

    fn temp_dir(&self) -> PathBuf {
        PathBuf::from(TEMP_DIR)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let mut tree = self.tree();
        self.mkdir_locked(&mut tree, path, mode)
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let mut tree = self.tree();
        let parts = split(path);

        for end in 1..=parts.len() {
            let prefix = join(&parts[..end]);
            match self.resolve(&tree, &parts[..end], true) {
                Ok(id) => {
                    let node = tree.get(id).map_err(|code| self.path_err("mkdir", &prefix, code))?;
                    if !node.is_dir() {
                        return Err(self.path_err("mkdir", &prefix, ErrorCode::ENOTDIR));
                    }
                }
                Err(ErrorCode::ENOENT) => self.mkdir_locked(&mut tree, &prefix, mode)?,
                Err(code) => return Err(self.path_err("mkdir", &prefix, code)),
            }
        }
        Ok(())
    }

    fn create_file(&self, path: &Path, mode: u32, exclusive: bool) -> VfsResult<()> {
        let mut tree = self.tree();
        self.open_for_write(&mut tree, path, mode, exclusive).map(|_| ())
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> VfsResult<()> {
        let mut tree = self.tree();
        let id = self.open_for_write(&mut tree, path, mode, false)?;
        if let NodeKind::File { data: content } = &mut tree
            .get_mut(id)
            .map_err(|code| self.path_err("write", path, code))?
            .kind
        {
            content.extend_from_slice(data);
        }
        Ok(())
    }

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let tree = self.tree();
        let parts = split(path);
        let id = self
            .resolve(&tree, &parts, true)
            .map_err(|code| self.path_err("open", path, code))?;
        let node = tree.get(id).map_err(|code| self.path_err("open", path, code))?;
        if !self.can(node, READ) {
            return Err(self.path_err("open", path, ErrorCode::EACCES));
        }
        match &node.kind {
            NodeKind::File { data } => Ok(data.clone()),
            _ => Err(self.path_err("read", path, ErrorCode::EISDIR)),
        }
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>> {
        let tree = self.tree();
        let parts = split(path);
        let id = self
            .resolve(&tree, &parts, true)
            .map_err(|code| self.path_err("open", path, code))?;
        let node = tree.get(id).map_err(|code| self.path_err("open", path, code))?;
        if !self.can(node, READ) {
            return Err(self.path_err("open", path, ErrorCode::EACCES));
        }
        match &node.kind {
            NodeKind::Directory { children } => Ok(children.keys().cloned().collect()),
            _ => Err(self.path_err("readdirent", path, ErrorCode::ENOTDIR)),
        }
    }

    fn stat(&self, path: &Path) -> VfsResult<FileInfo> {
        let tree = self.tree();
        let parts = split(path);
        self.resolve(&tree, &parts, true)
            .and_then(|id| self.file_info(&tree, id, path))
            .map_err(|code| self.path_err("stat", path, code))
    }

    fn lstat(&self, path: &Path) -> VfsResult<FileInfo> {
        let tree = self.tree();
        let parts = split(path);
        self.resolve(&tree, &parts, false)
            .and_then(|id| self.file_info(&tree, id, path))
            .map_err(|code| self.path_err("lstat", path, code))
    }

    fn remove(&self, path: &Path) -> VfsResult<()> {
        let mut tree = self.tree();
        let parts = split(path);
        let err = |code| self.path_err("remove", path, code);

        let (parent, name) = self.resolve_parent(&tree, &parts).map_err(err)?;
        let id = tree.child(parent, name).ok_or_else(|| err(ErrorCode::ENOENT))?;
        if let NodeKind::Directory { children } = &tree.get(id).map_err(err)?.kind {
            if !children.is_empty() {
                return Err(err(ErrorCode::ENOTEMPTY));
            }
        }
        if !self.can(tree.get(parent).map_err(err)?, WRITE | SEARCH) {
            return Err(err(ErrorCode::EACCES));
        }
        tree.unlink_child(parent, name);
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> VfsResult<()> {
        let mut tree = self.tree();
        let parts = split(path);
        if parts.is_empty() {
            return Err(self.path_err("unlinkat", path, ErrorCode::EINVAL));
        }

        match self.resolve_parent(&tree, &parts) {
            Ok((parent, name)) => self.remove_tree(&mut tree, parent, name, path),
            Err(ErrorCode::ENOENT) | Err(ErrorCode::ENOTDIR) => Ok(()),
            Err(code) => Err(self.path_err("unlinkat", path, code)),
        }
    }

    fn rename(&self, old: &Path, new: &Path) -> VfsResult<()> {
        let mut tree = self.tree();
        let err = |code| self.link_err("rename", old, new, code);
        let old_parts = split(old);
        let new_parts = split(new);

        let (old_parent, old_name) = self.resolve_parent(&tree, &old_parts).map_err(err)?;
        let (new_parent, new_name) = self.resolve_parent(&tree, &new_parts).map_err(err)?;
        let id = tree.child(old_parent, old_name).ok_or_else(|| err(ErrorCode::ENOENT))?;

        for parent in [old_parent, new_parent] {
            if !self.can(tree.get(parent).map_err(err)?, WRITE | SEARCH) {
                return Err(err(ErrorCode::EACCES));
            }
        }

        let moving_dir = tree.get(id).map_err(err)?.is_dir();
        if moving_dir && tree.is_ancestor(id, new_parent, &tree.parent_map()) {
            return Err(err(ErrorCode::EINVAL));
        }

        if let Some(target) = tree.child(new_parent, new_name) {
            if target == id {
                return Ok(());
            }
            match (&tree.get(target).map_err(err)?.kind, moving_dir) {
                (NodeKind::Directory { .. }, false) => return Err(err(ErrorCode::EISDIR)),
                (NodeKind::Directory { children }, true) if !children.is_empty() => {
                    return Err(err(ErrorCode::ENOTEMPTY));
                }
                (NodeKind::File { .. } | NodeKind::Symlink { .. }, true) => {
                    return Err(err(ErrorCode::ENOTDIR));
                }
                _ => {}
            }
            tree.unlink_child(new_parent, new_name);
        }

        if let Some(NodeKind::Directory { children }) =
            tree.nodes.get_mut(&old_parent).map(|n| &mut n.kind)
        {
            children.remove(old_name);
        }
        if let NodeKind::Directory { children } = &mut tree.get_mut(new_parent).map_err(err)?.kind {
            children.insert(new_name.to_string(), id);
        }
        Ok(())
    }

    fn symlink(&self, old: &Path, new: &Path) -> VfsResult<()> {
        if !self.shared.config.enable_symlinks {
            return Err(self.link_err("symlink", old, new, ErrorCode::ENOSYS));
        }
        let mut tree = self.tree();
        let err = |code| self.link_err("symlink", old, new, code);
        let parts = split(new);

        let (parent, name) = self.resolve_parent(&tree, &parts).map_err(err)?;
        if tree.child(parent, name).is_some() {
            return Err(err(ErrorCode::EEXIST));
        }
        if !self.can(tree.get(parent).map_err(err)?, WRITE | SEARCH) {
            return Err(err(ErrorCode::EACCES));
        }
        let mut node = self.new_node(
            NodeKind::Symlink {
                target: old.to_path_buf(),
            },
            0o777,
        );
        node.mode = 0o777;
        tree.insert_child(parent, name, node).map_err(err)?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let mut tree = self.tree();
        let err = |code| self.path_err("chmod", path, code);
        let id = self.resolve(&tree, &split(path), true).map_err(err)?;
        let node = tree.get_mut(id).map_err(err)?;
        if !self.user.is_admin() && node.uid != self.user.uid {
            return Err(err(ErrorCode::EPERM));
        }
        node.mode = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()> {
        let mut tree = self.tree();
        let err = |code| self.path_err("chown", path, code);
        let id = self.resolve(&tree, &split(path), true).map_err(err)?;
        let node = tree.get_mut(id).map_err(err)?;
        if !self.user.is_admin() {
            return Err(err(ErrorCode::EPERM));
        }
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }
}
