// SPDX-License-Identifier: GPL-2.0

//! Virtual file system (§4.7): a driver registry, a mount tree, path
//! resolution and open-file descriptors. The reference design keeps a
//! single global open-file table; here each `Process` owns its own (see
//! `process::Process::open_files`), which is the realistic per-process
//! fd-table shape and does not change any of the resolution or mount
//! semantics below.

pub mod fat12;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::{FD_DEBUG, FD_STDERR, FD_STDIN, FD_STDOUT, FIRST_DYNAMIC_FD, VFS_MAX_FS};
use crate::console;
use crate::error::{Error, Result};

/// Identifies a vnode within whichever filesystem driver owns it; opaque to
/// the VFS layer, meaningful only to that driver's own vnode cache.
pub type VnodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
	Reg,
	Dir,
}

/// Per-descriptor open mode (redesigned from the reference's bitmask: §9
/// decision #4). `read`/`write` check compatibility against this instead of
/// a `!= O_RDONLY` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
	Rd,
	Wr,
	RdWr,
}

impl OpenMode {
	fn readable(self) -> bool {
		matches!(self, OpenMode::Rd | OpenMode::RdWr)
	}

	fn writable(self) -> bool {
		matches!(self, OpenMode::Wr | OpenMode::RdWr)
	}
}

/// One vnode, fully qualified by the mount that owns it. `Copy` so it lives
/// directly inside `OpenFile` without an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVnode {
	pub mount: usize,
	pub vnode: VnodeId,
}

/// A process's open-file table entry (§4.1 glossary). A descriptor is free
/// iff its slot is `None`.
#[derive(Clone, Copy)]
pub struct OpenFile {
	pub node: ResolvedVnode,
	pub mode: OpenMode,
	pub position: usize,
}

/// The operations a filesystem driver exposes to the VFS layer. Every
/// method addresses vnodes by the driver's own `VnodeId`, never a Rust
/// reference, so the VFS layer can hold driver instances behind `dyn` and
/// `OpenFile` can stay `Copy`.
pub trait FsDriver {
	fn name(&self) -> &'static str;
	fn mount(&mut self) -> Result<()>;
	fn unmount(&mut self) -> Result<()>;
	fn root(&self) -> VnodeId;
	fn kind(&self, node: VnodeId) -> VnodeKind;
	fn lookup(&mut self, dir: VnodeId, name: &str) -> Result<VnodeId>;
	fn read(&mut self, node: VnodeId, buf: &mut [u8], offset: usize) -> Result<usize>;
	fn write(&mut self, node: VnodeId, buf: &[u8], offset: usize) -> Result<usize>;
	fn inc_ref(&mut self, node: VnodeId);
	fn dec_ref(&mut self, node: VnodeId);
}

struct RegisteredFs {
	name: &'static str,
	driver: Box<dyn FsDriver>,
}

struct Mount {
	driver_index: usize,
	root: VnodeId,
	/// The vnode this mount is stacked on top of, and which mount owns it;
	/// `None` for the root mount.
	covered: Option<ResolvedVnode>,
}

pub struct Vfs {
	registered: [Option<RegisteredFs>; VFS_MAX_FS],
	mounts: Vec<Mount>,
	root_mount: Option<usize>,
}

impl Vfs {
	pub fn new() -> Self {
		const NONE_FS: Option<RegisteredFs> = None;
		Self {
			registered: [NONE_FS; VFS_MAX_FS],
			mounts: Vec::new(),
			root_mount: None,
		}
	}

	/// Registers a filesystem driver by name so `mount` can find it later.
	pub fn register(&mut self, name: &'static str, driver: Box<dyn FsDriver>) -> Result<()> {
		let slot = self.registered.iter().position(|r| r.is_none()).ok_or(Error::NoFreeMount)?;
		self.registered[slot] = Some(RegisteredFs { name, driver });
		Ok(())
	}

	fn driver_index_by_name(&self, name: &str) -> Option<usize> {
		self.registered.iter().position(|r| matches!(r, Some(r) if r.name == name))
	}

	/// Mounts the registered driver named `fs_name` at `mountpoint_path`.
	/// The first call (with no root mount yet) ignores `mountpoint_path` and
	/// becomes the root; every later call resolves the mountpoint and
	/// requires it to be an unmounted directory.
	pub fn mount(&mut self, fs_name: &str, mountpoint_path: &str) -> Result<()> {
		let driver_index = self.driver_index_by_name(fs_name).ok_or(Error::NotFound)?;

		let covered = if self.root_mount.is_none() {
			None
		} else {
			let node = self.resolve(mountpoint_path)?;
			if self.is_mount_root(node) {
				return Err(Error::EEXIST);
			}
			if self.kind_of(node)? != VnodeKind::Dir {
				return Err(Error::ENOTDIR);
			}
			Some(node)
		};

		if let Some(node) = covered {
			self.driver_mut(node.mount)?.inc_ref(node.vnode);
		}

		let mount_result = self.registered[driver_index].as_mut().unwrap().driver.mount();
		if let Err(e) = mount_result {
			if let Some(node) = covered {
				self.driver_mut(node.mount)?.dec_ref(node.vnode);
			}
			return Err(e);
		}
		let root = self.registered[driver_index].as_ref().unwrap().driver.root();

		let mount_index = self.mounts.len();
		self.mounts.push(Mount {
			driver_index,
			root,
			covered,
		});
		if self.root_mount.is_none() {
			self.root_mount = Some(mount_index);
		}
		Ok(())
	}

	/// Unmounts the filesystem rooted at `path`. Refuses to unmount the
	/// global root mount.
	pub fn unmount(&mut self, path: &str) -> Result<()> {
		let node = self.resolve(path)?;
		if !self.is_mount_root(node) {
			return Err(Error::Error);
		}
		if self.root_mount == Some(node.mount) {
			return Err(Error::EACCESS);
		}
		let covered = self.mounts[node.mount].covered;
		self.driver_mut(node.mount)?.unmount()?;
		if let Some(covered) = covered {
			self.driver_mut(covered.mount)?.dec_ref(covered.vnode);
		}
		self.mounts[node.mount].covered = None;
		Ok(())
	}

	/// Opens `path` for `mode` in the current process's file table, per
	/// §4.7's `open`. Returns the new descriptor index.
	pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<usize> {
		let node = self.resolve(path)?;
		if self.kind_of(node)? == VnodeKind::Dir {
			return Err(Error::EISDIR);
		}

		let fd = crate::scheduler::with_current_process(|process| {
			process.open_files[FIRST_DYNAMIC_FD..]
				.iter()
				.position(|slot| slot.is_none())
				.map(|i| i + FIRST_DYNAMIC_FD)
		})
		.flatten()
		.ok_or(Error::ENFILE)?;

		self.driver_mut(node.mount)?.inc_ref(node.vnode);
		crate::scheduler::with_current_process(|process| {
			process.open_files[fd] = Some(OpenFile { node, mode, position: 0 });
		});
		Ok(fd)
	}

	/// Closes `fd` in the current process's file table.
	pub fn close(&mut self, fd: usize) -> Result<()> {
		let node = crate::scheduler::with_current_process(|process| {
			process.open_files.get(fd).copied().flatten().map(|f| {
				process.open_files[fd] = None;
				f.node
			})
		})
		.flatten()
		.ok_or(Error::EBADF)?;
		self.driver_mut(node.mount)?.dec_ref(node.vnode);
		Ok(())
	}

	/// Reads up to `buf.len()` bytes from `fd`, advancing its position by
	/// the amount actually read. Reserved descriptors bypass the vnode
	/// layer entirely: stdin reads from the keyboard queue.
	pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
		if fd == FD_STDIN {
			if let Some(first) = buf.first_mut() {
				*first = console::getchar();
				return Ok(1);
			}
			return Ok(0);
		}
		if fd == FD_STDOUT || fd == FD_STDERR || fd == FD_DEBUG {
			return Err(Error::EACCESS);
		}

		let open = crate::scheduler::with_current_process(|process| process.open_files.get(fd).copied().flatten())
			.flatten()
			.ok_or(Error::EBADF)?;
		if !open.mode.readable() {
			return Err(Error::EACCESS);
		}

		let driver = self.driver_mut(open.node.mount)?;
		let n = driver.read(open.node.vnode, buf, open.position)?;
		crate::scheduler::with_current_process(|process| {
			if let Some(slot) = process.open_files[fd].as_mut() {
				slot.position += n;
			}
		});
		Ok(n)
	}

	/// Writes up to `buf.len()` bytes to `fd`, advancing its position by the
	/// amount actually written. Reserved descriptors write straight through
	/// the console/debug sink.
	pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
		if fd == FD_STDOUT || fd == FD_STDERR {
			console::write_str(core::str::from_utf8(buf).unwrap_or(""));
			return Ok(buf.len());
		}
		if fd == FD_DEBUG {
			return Ok(console::debug_write(buf));
		}
		if fd == FD_STDIN {
			return Err(Error::EACCESS);
		}

		let open = crate::scheduler::with_current_process(|process| process.open_files.get(fd).copied().flatten())
			.flatten()
			.ok_or(Error::EBADF)?;
		if !open.mode.writable() {
			return Err(Error::EACCESS);
		}

		let driver = self.driver_mut(open.node.mount)?;
		let n = driver.write(open.node.vnode, buf, open.position)?;
		crate::scheduler::with_current_process(|process| {
			if let Some(slot) = process.open_files[fd].as_mut() {
				slot.position += n;
			}
		});
		Ok(n)
	}

	fn resolve(&mut self, path: &str) -> Result<ResolvedVnode> {
		if !path.starts_with('/') {
			return Err(Error::ENOENT);
		}
		let root_mount = self.root_mount.ok_or(Error::ENOENT)?;
		let mut current = ResolvedVnode {
			mount: root_mount,
			vnode: self.mounts[root_mount].root,
		};
		current = self.follow_mount(current);

		for segment in path.split('/').filter(|s| !s.is_empty()) {
			let next = self.driver_mut(current.mount)?.lookup(current.vnode, segment).map_err(|_| Error::ENOENT)?;
			current = self.follow_mount(ResolvedVnode {
				mount: current.mount,
				vnode: next,
			});
		}
		Ok(current)
	}

	fn follow_mount(&self, node: ResolvedVnode) -> ResolvedVnode {
		for (i, mount) in self.mounts.iter().enumerate() {
			if mount.covered == Some(node) {
				return ResolvedVnode { mount: i, vnode: mount.root };
			}
		}
		node
	}

	fn is_mount_root(&self, node: ResolvedVnode) -> bool {
		self.mounts.get(node.mount).map(|m| m.root == node.vnode).unwrap_or(false)
	}

	fn kind_of(&mut self, node: ResolvedVnode) -> Result<VnodeKind> {
		Ok(self.driver_mut(node.mount)?.kind(node.vnode))
	}

	fn driver_mut(&mut self, mount_index: usize) -> Result<&mut dyn FsDriver> {
		let mount = self.mounts.get(mount_index).ok_or(Error::NotFound)?;
		let driver_index = mount.driver_index;
		self.registered
			.get_mut(driver_index)
			.and_then(|r| r.as_mut())
			.map(|r| r.driver.as_mut())
			.ok_or(Error::NotFound)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// A single-directory in-memory filesystem: vnode 0 is the root
	/// directory, vnode 1 is one regular file named "thing" inside it.
	struct MemFs {
		mounted: bool,
	}

	impl FsDriver for MemFs {
		fn name(&self) -> &'static str {
			"memfs"
		}
		fn mount(&mut self) -> Result<()> {
			self.mounted = true;
			Ok(())
		}
		fn unmount(&mut self) -> Result<()> {
			self.mounted = false;
			Ok(())
		}
		fn root(&self) -> VnodeId {
			0
		}
		fn kind(&self, node: VnodeId) -> VnodeKind {
			if node == 0 { VnodeKind::Dir } else { VnodeKind::Reg }
		}
		fn lookup(&mut self, dir: VnodeId, name: &str) -> Result<VnodeId> {
			if dir == 0 && name == "thing" {
				Ok(1)
			} else {
				Err(Error::ENOENT)
			}
		}
		fn read(&mut self, _node: VnodeId, _buf: &mut [u8], _offset: usize) -> Result<usize> {
			Ok(0)
		}
		fn write(&mut self, _node: VnodeId, _buf: &[u8], _offset: usize) -> Result<usize> {
			Ok(0)
		}
		fn inc_ref(&mut self, _node: VnodeId) {}
		fn dec_ref(&mut self, _node: VnodeId) {}
	}

	fn mounted_vfs() -> Vfs {
		let mut vfs = Vfs::new();
		vfs.register("memfs", alloc::boxed::Box::new(MemFs { mounted: false })).unwrap();
		vfs.mount("memfs", "/").unwrap();
		vfs
	}

	#[test]
	fn register_fails_once_the_table_is_full() {
		let mut vfs = Vfs::new();
		for _ in 0..crate::config::VFS_MAX_FS {
			vfs.register("memfs", alloc::boxed::Box::new(MemFs { mounted: false })).unwrap();
		}
		assert!(matches!(
			vfs.register("memfs", alloc::boxed::Box::new(MemFs { mounted: false })),
			Err(Error::NoFreeMount)
		));
	}

	#[test]
	fn first_mount_becomes_root() {
		let vfs = mounted_vfs();
		assert_eq!(vfs.root_mount, Some(0));
	}

	#[test]
	fn resolve_walks_path_segments_through_lookup() {
		let mut vfs = mounted_vfs();
		let node = vfs.resolve("/thing").unwrap();
		assert_eq!(node.vnode, 1);
	}

	#[test]
	fn resolve_rejects_relative_paths() {
		let mut vfs = mounted_vfs();
		assert!(matches!(vfs.resolve("thing"), Err(Error::ENOENT)));
	}

	#[test]
	fn resolve_reports_missing_entries() {
		let mut vfs = mounted_vfs();
		assert!(matches!(vfs.resolve("/nope"), Err(Error::ENOENT)));
	}

	#[test]
	fn unmount_refuses_the_global_root() {
		let mut vfs = mounted_vfs();
		assert!(matches!(vfs.unmount("/"), Err(Error::EACCESS)));
	}

	#[test]
	fn mount_unknown_driver_name_is_not_found() {
		let mut vfs = Vfs::new();
		assert!(matches!(vfs.mount("nope", "/"), Err(Error::NotFound)));
	}
}

