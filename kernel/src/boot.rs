// SPDX-License-Identifier: GPL-2.0

//! `BootInfo`: the immutable snapshot the loader hands to `start`. Everything
//! in this file is a passive data carrier; no boot-stage code lives here —
//! the loader, A20/GDT bring-up and E820 probe are external collaborators.

use alloc::vec::Vec;

/// Type of a single memory-map entry, mirroring the BIOS E820 type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MemoryType {
	Available = 1,
	Reserved = 2,
	Acpi = 3,
	AcpiNvs = 4,
}

impl MemoryType {
	pub fn from_raw(raw: u16) -> Self {
		match raw {
			1 => MemoryType::Available,
			3 => MemoryType::Acpi,
			4 => MemoryType::AcpiNvs,
			_ => MemoryType::Reserved,
		}
	}
}

/// One memory-map entry as supplied by the loader's E820 probe.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBlock {
	pub base: u64,
	pub length: u64,
	pub kind: MemoryType,
}

impl MemoryBlock {
	pub const fn new(base: u64, length: u64, kind: MemoryType) -> Self {
		Self { base, length, kind }
	}
}

/// Raw, `#[repr(C)]` memory-map entry as the loader lays it out, per §6:
/// {base: 64, length: 64, type: 16, acpi: 16}.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMemoryBlock {
	pub base: u64,
	pub length: u64,
	pub kind: u16,
	pub acpi: u16,
}

/// Raw, `#[repr(C)]` BootInfo as the loader lays it out, per §6.
#[repr(C)]
pub struct RawBootInfo {
	pub boot_drive: u16,
	pub memory_size_kib: u32,
	pub memory_block_count: u32,
	pub memory_blocks: *const RawMemoryBlock,
}

/// Owned, safe `BootInfo` built from the loader's raw structure. Consumed
/// once by `PhysFrames::init`, which may append one RESERVED entry covering
/// the bitmap's own storage.
pub struct BootInfo {
	pub boot_drive: u16,
	pub memory_size_kib: u32,
	pub memory_blocks: Vec<MemoryBlock>,
}

impl BootInfo {
	/// Copies out of the raw loader structure. The `memory_blocks` pointer
	/// must reference `memory_block_count` valid entries; this is the one
	/// place in the kernel that trusts the loader's contract verbatim.
	///
	/// # Safety
	/// `raw` and the array it points into must be valid for the duration of
	/// this call.
	pub unsafe fn from_raw(raw: &RawBootInfo) -> Self {
		let mut memory_blocks = Vec::with_capacity(raw.memory_block_count as usize);
		for i in 0..raw.memory_block_count as usize {
			let entry = &*raw.memory_blocks.add(i);
			memory_blocks.push(MemoryBlock::new(
				entry.base,
				entry.length,
				MemoryType::from_raw(entry.kind),
			));
		}
		Self {
			boot_drive: raw.boot_drive,
			memory_size_kib: raw.memory_size_kib,
			memory_blocks,
		}
	}

	/// Appends a RESERVED entry; used by `PhysFrames::init` to record the
	/// bitmap's own backing storage in the map it was computed from.
	pub fn push_reserved(&mut self, base: u64, length: u64) {
		self.memory_blocks
			.push(MemoryBlock::new(base, length, MemoryType::Reserved));
	}

	#[cfg(test)]
	pub fn test_fixture(memory_size_kib: u32, blocks: &[MemoryBlock]) -> Self {
		Self {
			boot_drive: 0,
			memory_size_kib,
			memory_blocks: blocks.to_vec(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn memory_type_from_raw_maps_known_e820_codes() {
		assert_eq!(MemoryType::from_raw(1), MemoryType::Available);
		assert_eq!(MemoryType::from_raw(3), MemoryType::Acpi);
		assert_eq!(MemoryType::from_raw(4), MemoryType::AcpiNvs);
	}

	#[test]
	fn memory_type_from_raw_defaults_unknown_codes_to_reserved() {
		assert_eq!(MemoryType::from_raw(0), MemoryType::Reserved);
		assert_eq!(MemoryType::from_raw(99), MemoryType::Reserved);
	}

	#[test]
	fn push_reserved_appends_a_reserved_block() {
		let mut info = BootInfo::test_fixture(1024, &[]);
		info.push_reserved(0x1000, 0x2000);
		assert_eq!(info.memory_blocks.len(), 1);
		assert_eq!(info.memory_blocks[0].kind, MemoryType::Reserved);
		assert_eq!(info.memory_blocks[0].base, 0x1000);
	}
}
