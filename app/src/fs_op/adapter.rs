//! The variable store seen as a filesystem.
//!
//! `FilesystemAdapter` owns the registry and everything that only exists
//! at the filesystem level (symlinks, extended attributes, open handles)
//! and serves [`VarFilesystem`] calls against them.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::errors::{PersistenceError, Result, VarsError};
use crate::fs_op::control::{self, Control};
use crate::fs_op::metadata::XattrStore;
use crate::fs_op::ops::VarFilesystem;
use crate::fs_op::path::VarPath;
use crate::fs_op::stat::{AttrChange, DirEntry, NodeKind, StatFs, VarAttr};
use crate::fs_op::symlink::{LinkTable, Symlink};
use crate::vars::liveness::Liveness;
use crate::vars::persist::LineCodec;
use crate::vars::record::{VariableRecord, DEFAULT_PERMISSIONS};
use crate::vars::registry::{DefunctReport, VariableRegistry};
use crate::vars::table::ProcessVariableTable;
use crate::vars::types::TypeSpec;

const ROOT_MODE: u32 = 0o755;
const LINK_MODE: u32 = 0o777;

/// Extension of tables written by [`FilesystemAdapter::save_all`].
pub const SAVE_EXTENSION: &str = "vars";

/// Largest content a single record may grow to, in bytes.
pub const DEFAULT_MAX_VARIABLE_SIZE: u64 = 16 * 1024 * 1024;

/// Policy knobs for the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Register unknown pids on `create`/`write` instead of failing.
    pub auto_create_process_table: bool,
    /// Permissions of records created without an explicit mode.
    pub default_file_mode: u32,
    /// Owner reported for the root and process directories and given to
    /// new records.
    pub uid: u32,
    pub gid: u32,
    /// Writes and truncations past this size fail with `TooLarge`.
    pub max_variable_size: u64,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            auto_create_process_table: true,
            default_file_mode: DEFAULT_PERMISSIONS,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            max_variable_size: DEFAULT_MAX_VARIABLE_SIZE,
        }
    }
}

/// What a path resolves to.
enum Node<'a> {
    Root,
    Table(&'a ProcessVariableTable),
    Record(&'a VariableRecord),
    Link(&'a Symlink),
}

pub struct FilesystemAdapter {
    registry: VariableRegistry,
    options: AdapterOptions,
    links: LinkTable,
    xattrs: XattrStore,
    handles: HashMap<u64, VarPath>,
    next_handle: u64,
    root_mode: u32,
    mounted_at: SystemTime,
}

impl Default for FilesystemAdapter {
    fn default() -> Self {
        FilesystemAdapter::new(VariableRegistry::default(), AdapterOptions::default())
    }
}

impl FilesystemAdapter {
    pub fn new(registry: VariableRegistry, options: AdapterOptions) -> Self {
        FilesystemAdapter {
            registry,
            options,
            links: LinkTable::default(),
            xattrs: XattrStore::default(),
            handles: HashMap::new(),
            next_handle: 1,
            root_mode: ROOT_MODE,
            mounted_at: SystemTime::now(),
        }
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VariableRegistry {
        &mut self.registry
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Probe every table and drop the dead ones along with their links,
    /// attributes and handles.
    pub fn clear_defunct(&mut self) -> DefunctReport {
        let report = self.registry.clear_defunct();
        self.forget_pids(&report.removed);
        report
    }

    /// Apply verdicts probed outside the adapter.
    pub fn apply_verdicts(&mut self, verdicts: Vec<(u32, Liveness)>) -> DefunctReport {
        let report = self.registry.apply_verdicts(verdicts);
        self.forget_pids(&report.removed);
        report
    }

    /// Save every table to `<dir>/<pid>.vars`. Returns the number of
    /// tables written.
    pub fn save_all(&self, dir: &Path, codec: &LineCodec) -> Result<usize> {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut saved = 0;
        for pid in self.registry.pids() {
            if let Some(table) = self.registry.get(pid) {
                table.save(&dir.join(format!("{}.{}", pid, SAVE_EXTENSION)), codec)?;
                saved += 1;
            }
        }
        tracing::info!(dir = %dir.display(), saved, "saved process tables");
        Ok(saved)
    }

    /// Drop all state. The adapter stays usable and empty.
    pub fn shutdown(&mut self) {
        tracing::info!(
            processes = self.registry.len(),
            handles = self.handles.len(),
            "shutting down variable store"
        );
        self.registry.clear();
        self.links.clear();
        self.xattrs.clear();
        self.handles.clear();
    }

    /// Apply one `setattr` as a unit. The node must exist and the resize,
    /// the only step that can still be refused, runs before any metadata
    /// changes.
    pub fn set_attributes(&mut self, path: &str, change: &AttrChange) -> Result<()> {
        self.kind_of(&parse(path)?)?;
        if let Some(size) = change.size {
            self.truncate(path, size)?;
        }
        if let Some(mode) = change.mode {
            self.chmod(path, mode)?;
        }
        if change.uid.is_some() || change.gid.is_some() {
            self.chown(path, change.uid, change.gid)?;
        }
        if change.atime.is_some() || change.mtime.is_some() {
            self.utimens(path, change.atime, change.mtime)?;
        }
        Ok(())
    }

    fn forget_pids(&mut self, pids: &[u32]) {
        for &pid in pids {
            self.links.forget_pid(pid);
            self.xattrs.forget_pid(pid);
            self.handles.retain(|_, p| p.pid() != Some(pid));
        }
    }

    fn resolve(&self, path: &VarPath) -> Result<Node<'_>> {
        match path {
            VarPath::Root => Ok(Node::Root),
            VarPath::Process(pid) => self
                .registry
                .get(*pid)
                .map(Node::Table)
                .ok_or_else(|| VarsError::NotFound(path.to_string())),
            VarPath::Variable { .. } => {
                let (pid, name) = path.as_variable()?;
                if let Some(link) = self.links.get(pid, name) {
                    return Ok(Node::Link(link));
                }
                self.registry
                    .get(pid)
                    .and_then(|t| t.get(name))
                    .map(Node::Record)
                    .ok_or_else(|| VarsError::NotFound(path.to_string()))
            }
        }
    }

    fn kind_of(&self, path: &VarPath) -> Result<NodeKind> {
        Ok(match self.resolve(path)? {
            Node::Root | Node::Table(_) => NodeKind::Directory,
            Node::Record(_) => NodeKind::File,
            Node::Link(_) => NodeKind::Symlink,
        })
    }

    fn record_mut(&mut self, path: &VarPath) -> Result<&mut VariableRecord> {
        let (pid, name) = path.as_variable()?;
        self.registry
            .get_mut(pid)
            .and_then(|t| t.get_mut(name))
            .ok_or_else(|| VarsError::NotFound(path.to_string()))
    }

    /// Table of `pid`, registering it when policy allows.
    fn table_for_write(&mut self, pid: u32) -> Result<&mut ProcessVariableTable> {
        if !self.registry.contains(pid) {
            if !self.options.auto_create_process_table {
                return Err(VarsError::NoSuchProcess(pid));
            }
            self.registry.register(pid)?;
        }
        self.registry.get_mut(pid).ok_or(VarsError::NoSuchProcess(pid))
    }

    /// The record at `path`, created empty if the name is free.
    fn record_for_write(&mut self, path: &VarPath, mode: u32) -> Result<&mut VariableRecord> {
        let (pid, name) = path.as_variable()?;
        if self.links.contains(pid, name) {
            return Err(VarsError::AlreadyExists(path.to_string()));
        }
        let perm = match mode & 0o7777 {
            0 => self.options.default_file_mode,
            bits => bits,
        };
        let (uid, gid) = (self.options.uid, self.options.gid);
        let table = self.table_for_write(pid)?;
        if !table.has(name) {
            let mut rec = VariableRecord::new(name, pid, TypeSpec::default());
            rec.permissions = perm;
            rec.uid = uid;
            rec.gid = gid;
            table.insert(rec)?;
            tracing::debug!(pid, name, "created variable");
        }
        table
            .get_mut(name)
            .ok_or_else(|| VarsError::NotFound(path.to_string()))
    }

    fn check_size(&self, path: &VarPath, size: u64) -> Result<()> {
        let limit = self.options.max_variable_size;
        if size > limit {
            return Err(VarsError::TooLarge {
                name: path.to_string(),
                size,
                limit,
            });
        }
        Ok(())
    }

    fn open_handle(&mut self, path: VarPath) -> u64 {
        let fh = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(fh, path);
        fh
    }

    fn dir_attr(&self, perm: u32, nlink: u32, size: u64, time: SystemTime) -> VarAttr {
        VarAttr {
            kind: NodeKind::Directory,
            perm,
            size,
            nlink,
            uid: self.options.uid,
            gid: self.options.gid,
            atime: time,
            mtime: time,
            ctime: time,
        }
    }
}

fn parse(path: &str) -> Result<VarPath> {
    path.parse()
}

fn to_index(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| VarsError::Unsupported(format!("offset {} out of range", n)))
}

impl VarFilesystem for FilesystemAdapter {
    fn create(&mut self, path: &str, mode: u32) -> Result<u64> {
        let path = parse(path)?;
        tracing::debug!(%path, mode = format_args!("{:o}", mode), "create");
        self.record_for_write(&path, mode)?;
        Ok(self.open_handle(path))
    }

    fn open(&mut self, path: &str) -> Result<u64> {
        let path = parse(path)?;
        self.resolve(&path)?;
        Ok(self.open_handle(path))
    }

    fn release(&mut self, fh: u64) -> Result<()> {
        self.handles.remove(&fh);
        Ok(())
    }

    fn read(&mut self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>> {
        let path = parse(path)?;
        let rec = self.record_mut(&path)?;
        rec.touch();
        let content = rec.content();
        let start = to_index(offset)?.min(content.len());
        let end = start.saturating_add(size).min(content.len());
        Ok(content[start..end].to_vec())
    }

    fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let path = parse(path)?;
        tracing::debug!(%path, len = data.len(), offset, "write");
        self.check_size(&path, offset.saturating_add(data.len() as u64))?;
        let offset = to_index(offset)?;
        self.record_for_write(&path, 0)?.splice(offset, data)?;
        Ok(data.len())
    }

    fn truncate(&mut self, path: &str, length: u64) -> Result<()> {
        let path = parse(path)?;
        tracing::debug!(%path, length, "truncate");
        self.check_size(&path, length)?;
        let length = to_index(length)?;
        self.record_mut(&path)?.resize(length)?;
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let path = parse(path)?;
        tracing::debug!(%path, "unlink");
        let (pid, name) = path.as_variable()?;
        if self.links.remove(pid, name).is_none() {
            let table = self
                .registry
                .get_mut(pid)
                .ok_or_else(|| VarsError::NotFound(path.to_string()))?;
            let read_only = table
                .get(name)
                .map(|rec| rec.read_only)
                .ok_or_else(|| VarsError::NotFound(path.to_string()))?;
            if read_only {
                return Err(VarsError::ReadOnlyViolation(name.to_string()));
            }
            table.remove(name);
        }
        self.xattrs.forget(&path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let src = parse(from)?;
        let dst = parse(to)?;
        tracing::debug!(%src, %dst, "rename");
        if matches!(src, VarPath::Root | VarPath::Process(_)) {
            return Err(VarsError::Unsupported(format!("cannot rename directory `{}`", src)));
        }
        let (spid, sname) = src.as_variable()?;
        let (dpid, dname) = dst.as_variable()?;

        let is_link = match self.resolve(&src)? {
            Node::Link(_) => true,
            Node::Record(rec) if rec.read_only => return Err(VarsError::ReadOnlyViolation(rec.name.clone())),
            _ => false,
        };
        if src == dst {
            return Ok(());
        }
        if !self.registry.contains(dpid) {
            return Err(VarsError::NoSuchProcess(dpid));
        }
        if let Ok(Node::Record(target)) = self.resolve(&dst) {
            if target.read_only {
                return Err(VarsError::ReadOnlyViolation(target.name.clone()));
            }
        }

        self.links.remove(dpid, dname);
        if let Some(table) = self.registry.get_mut(dpid) {
            table.remove(dname);
        }
        if is_link {
            if let Some(link) = self.links.remove(spid, sname) {
                self.links.insert(dpid, dname, link);
            }
        } else {
            let moved = self.registry.get_mut(spid).and_then(|t| t.remove(sname));
            if let (Some(mut rec), Some(table)) = (moved, self.registry.get_mut(dpid)) {
                rec.name = dname.to_string();
                table.insert(rec)?;
            }
        }
        self.xattrs.rename(&src, &dst);
        for open in self.handles.values_mut().filter(|p| **p == src) {
            *open = dst.clone();
        }
        Ok(())
    }

    fn getattr(&self, path: &str) -> Result<VarAttr> {
        let path = parse(path)?;
        let attr = match self.resolve(&path)? {
            Node::Root => {
                let nlink = 2 + u32::try_from(self.registry.len()).unwrap_or(u32::MAX - 2);
                self.dir_attr(self.root_mode, nlink, 0, self.mounted_at)
            }
            Node::Table(table) => {
                let entries = table.len() + self.links.count(table.pid());
                self.dir_attr(table.mode, 2, entries as u64, table.created)
            }
            Node::Record(rec) => VarAttr {
                kind: NodeKind::File,
                perm: rec.permissions,
                size: rec.content().len() as u64,
                nlink: 1,
                uid: rec.uid,
                gid: rec.gid,
                atime: rec.accessed,
                mtime: rec.modified,
                ctime: rec.modified,
            },
            Node::Link(link) => VarAttr {
                kind: NodeKind::Symlink,
                perm: LINK_MODE,
                size: link.target.len() as u64,
                nlink: 1,
                uid: link.uid,
                gid: link.gid,
                atime: link.created,
                mtime: link.created,
                ctime: link.created,
            },
        };
        Ok(attr)
    }

    fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let path = parse(path)?;
        let perm = mode & 0o7777;
        match &path {
            VarPath::Root => self.root_mode = perm,
            VarPath::Process(pid) => {
                self.registry
                    .get_mut(*pid)
                    .ok_or_else(|| VarsError::NotFound(path.to_string()))?
                    .mode = perm
            }
            VarPath::Variable { .. } => {
                if self.kind_of(&path)? == NodeKind::File {
                    self.record_mut(&path)?.permissions = perm;
                }
            }
        }
        Ok(())
    }

    fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let path = parse(path)?;
        let (owner, group) = match self.kind_of(&path)? {
            NodeKind::Directory => return Ok(()),
            NodeKind::Symlink => {
                let (pid, name) = path.as_variable()?;
                let link = self
                    .links
                    .get_mut(pid, name)
                    .ok_or_else(|| VarsError::NotFound(path.to_string()))?;
                (&mut link.uid, &mut link.gid)
            }
            NodeKind::File => {
                let rec = self.record_mut(&path)?;
                (&mut rec.uid, &mut rec.gid)
            }
        };
        if let Some(uid) = uid {
            *owner = uid;
        }
        if let Some(gid) = gid {
            *group = gid;
        }
        Ok(())
    }

    fn utimens(&mut self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()> {
        let path = parse(path)?;
        // Directory and link times are derived.
        if self.kind_of(&path)? != NodeKind::File {
            return Ok(());
        }
        let rec = self.record_mut(&path)?;
        if let Some(t) = atime {
            rec.accessed = t;
        }
        if let Some(t) = mtime {
            rec.modified = t;
        }
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = parse(path)?;
        match self.resolve(&path)? {
            Node::Root => Ok(self
                .registry
                .pids()
                .into_iter()
                .map(|pid| DirEntry::new(pid.to_string(), NodeKind::Directory))
                .collect()),
            Node::Table(table) => {
                let mut entries: Vec<DirEntry> = table
                    .names()
                    .map(|n| DirEntry::new(n, NodeKind::File))
                    .chain(self.links.of(table.pid()).map(|(n, _)| DirEntry::new(n, NodeKind::Symlink)))
                    .collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            }
            Node::Record(_) | Node::Link(_) => Err(VarsError::NotADirectory(path.to_string())),
        }
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        let path = parse(path)?;
        tracing::debug!(%path, "mkdir");
        match path {
            VarPath::Root => Err(VarsError::InvalidPath(path.to_string())),
            VarPath::Process(pid) => {
                let table = self.registry.register(pid)?;
                if mode & 0o7777 != 0 {
                    table.mode = mode & 0o7777;
                }
                Ok(())
            }
            VarPath::Variable { .. } => Err(VarsError::Unsupported(format!(
                "`{}`: only process directories can be created",
                path
            ))),
        }
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let path = parse(path)?;
        tracing::debug!(%path, "rmdir");
        match path {
            VarPath::Root => Err(VarsError::InvalidPath(path.to_string())),
            VarPath::Process(pid) => {
                let table = self.registry.get(pid).ok_or(VarsError::NoSuchProcess(pid))?;
                if !table.is_empty() || self.links.count(pid) > 0 {
                    return Err(VarsError::NotEmpty(path.to_string()));
                }
                self.registry.delete(pid)?;
                self.forget_pids(&[pid]);
                Ok(())
            }
            VarPath::Variable { .. } => Err(VarsError::NotADirectory(path.to_string())),
        }
    }

    fn symlink(&mut self, path: &str, target: &str) -> Result<()> {
        let path = parse(path)?;
        tracing::debug!(%path, target, "symlink");
        let (pid, name) = path.as_variable()?;
        let (uid, gid) = (self.options.uid, self.options.gid);
        let taken = self.table_for_write(pid)?.has(name);
        if taken || self.links.contains(pid, name) {
            return Err(VarsError::AlreadyExists(path.to_string()));
        }
        self.links.insert(pid, name, Symlink::new(target, uid, gid));
        Ok(())
    }

    fn readlink(&self, path: &str) -> Result<String> {
        let path = parse(path)?;
        match self.resolve(&path)? {
            Node::Link(link) => Ok(link.target.clone()),
            _ => Err(VarsError::InvalidPath(format!("`{}` is not a symlink", path))),
        }
    }

    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        let path = parse(path)?;
        let node = self.resolve(&path)?;
        if let Some(control) = Control::lookup(name)? {
            return match node {
                Node::Record(rec) => Ok(control.get(rec)),
                _ => Ok(Vec::new()),
            };
        }
        Ok(self.xattrs.get(&path, name).map(<[u8]>::to_vec).unwrap_or_default())
    }

    fn setxattr(&mut self, path: &str, name: &str, value: &[u8]) -> Result<()> {
        let path = parse(path)?;
        let is_record = self.kind_of(&path)? == NodeKind::File;
        match Control::lookup(name)? {
            Some(control) if is_record => control.set(self.record_mut(&path)?, value),
            Some(_) => Err(VarsError::Unsupported(format!(
                "`{}` only applies to variables",
                control::PREFIX
            ))),
            None => {
                self.xattrs.set(&path, name, value);
                Ok(())
            }
        }
    }

    fn listxattr(&self, path: &str) -> Result<Vec<String>> {
        let path = parse(path)?;
        let mut names: Vec<String> = match self.kind_of(&path)? {
            NodeKind::File => control::ALL.iter().map(|c| c.name()).collect(),
            _ => Vec::new(),
        };
        names.extend(self.xattrs.list(&path));
        Ok(names)
    }

    fn removexattr(&mut self, path: &str, name: &str) -> Result<()> {
        let path = parse(path)?;
        let is_record = self.kind_of(&path)? == NodeKind::File;
        match Control::lookup(name)? {
            Some(control) if is_record => control.remove(self.record_mut(&path)?),
            Some(_) => Ok(()),
            None => {
                self.xattrs.remove(&path, name);
                Ok(())
            }
        }
    }

    fn statfs(&self, _path: &str) -> Result<StatFs> {
        let records: usize = self
            .registry
            .pids()
            .into_iter()
            .filter_map(|pid| self.registry.get(pid))
            .map(ProcessVariableTable::len)
            .sum();
        Ok(StatFs::with_files((records + self.links.total()) as u64))
    }
}
