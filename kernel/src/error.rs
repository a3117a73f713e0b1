// SPDX-License-Identifier: GPL-2.0

//! Error handling types and utilities

use core::fmt;

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// Initialization of a subsystem failed; carries a short static reason.
	InitFailed(&'static str),
	/// PhysFrames has no free frame (or no run of N free frames) left.
	OutOfFrames,
	/// Heap could not satisfy an allocation (break would cross HEAP_END).
	OutOfHeap,
	/// sbrk delta would move the break below its start.
	OutOfRange,
	/// No free slot in a filesystem's bounded vnode cache.
	NoFreeVnodeSlot,
	/// No free slot in the mount table / registered_fs table.
	NoFreeMount,
	/// FDC command or IRQ wait exceeded its tick budget.
	FdcTimeout,
	/// DMA transfer would exceed the controller's 64 KiB page.
	DmaOverflow,
	/// FAT12 cluster-chain walk ran past a chain terminator unexpectedly.
	ChainTerminator,
	/// Generic failure with no more specific variant (VFS errno -1).
	Error,
	/// No such file or directory.
	ENOENT,
	/// File already exists.
	EEXIST,
	/// Permission denied.
	EACCESS,
	/// Is a directory.
	EISDIR,
	/// Not a directory.
	ENOTDIR,
	/// Too many open files (file-table full).
	ENFILE,
	/// Bad file descriptor.
	EBADF,
	/// Filesystem driver name not registered.
	NotFound,
}

impl Error {
	/// Convert error to the VFS errno table in the external-interfaces section:
	/// 0=OK, -1=ERROR, -2=ENOENT, -3=EEXIST, -4=EACCESS, -9=EISDIR, -10=ENOTDIR,
	/// -11=ENFILE, -12=EBADF. Everything else collapses to -1 (generic failure),
	/// matching the reference's fallback for error kinds with no dedicated errno.
	pub fn to_errno(self) -> i32 {
		match self {
			Error::ENOENT => -2,
			Error::EEXIST => -3,
			Error::EACCESS => -4,
			Error::EISDIR => -9,
			Error::ENOTDIR => -10,
			Error::ENFILE => -11,
			Error::EBADF => -12,
			_ => -1,
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InitFailed(reason) => write!(f, "initialization failed: {}", reason),
			Error::OutOfFrames => write!(f, "out of physical frames"),
			Error::OutOfHeap => write!(f, "heap exhausted"),
			Error::OutOfRange => write!(f, "break moved out of range"),
			Error::NoFreeVnodeSlot => write!(f, "vnode cache full"),
			Error::NoFreeMount => write!(f, "mount table full"),
			Error::FdcTimeout => write!(f, "floppy controller timeout"),
			Error::DmaOverflow => write!(f, "DMA buffer overflow"),
			Error::ChainTerminator => write!(f, "FAT chain terminator reached"),
			Error::Error => write!(f, "error"),
			Error::ENOENT => write!(f, "no such file or directory"),
			Error::EEXIST => write!(f, "file exists"),
			Error::EACCESS => write!(f, "access denied"),
			Error::EISDIR => write!(f, "is a directory"),
			Error::ENOTDIR => write!(f, "not a directory"),
			Error::ENFILE => write!(f, "too many open files"),
			Error::EBADF => write!(f, "bad file descriptor"),
			Error::NotFound => write!(f, "driver not found"),
		}
	}
}

/// Kernel result type
pub type Result<T> = core::result::Result<T, Error>;

impl From<()> for Error {
	fn from(_: ()) -> Self {
		Error::Error
	}
}

impl From<core::alloc::AllocError> for Error {
	fn from(_: core::alloc::AllocError) -> Self {
		Error::OutOfHeap
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn errno_table_matches_external_interface() {
		assert_eq!(Error::Error.to_errno(), -1);
		assert_eq!(Error::ENOENT.to_errno(), -2);
		assert_eq!(Error::EEXIST.to_errno(), -3);
		assert_eq!(Error::EACCESS.to_errno(), -4);
		assert_eq!(Error::EISDIR.to_errno(), -9);
		assert_eq!(Error::ENOTDIR.to_errno(), -10);
		assert_eq!(Error::ENFILE.to_errno(), -11);
		assert_eq!(Error::EBADF.to_errno(), -12);
	}

	#[test]
	fn unmapped_kinds_fall_back_to_generic_error() {
		assert_eq!(Error::OutOfFrames.to_errno(), -1);
		assert_eq!(Error::FdcTimeout.to_errno(), -1);
	}
}
