// SPDX-License-Identifier: GPL-2.0

//! Two-level x86 paging (§4.2): one page directory of 1024 PDEs, each
//! pointing at a page table of 1024 PTEs, 4 KiB pages throughout. PDE[1023]
//! recursively maps the directory itself so its own tables are reachable
//! as ordinary virtual memory without a second mapping scheme.

use bitflags::bitflags;

use crate::config::{
	IDENTITY_MAP_END, KERNEL_PHYS_WINDOW_BASE, KERNEL_PHYS_WINDOW_END, RECURSIVE_DIR, RECURSIVE_PDE,
	RECURSIVE_TABLES_BASE, TEMP_PD_PDE, TEMP_PD_WINDOW,
};
use crate::error::Result;
use crate::memory::phys::PhysFrames;
use crate::types::{PAGE_SIZE, PhysAddr, VirtAddr};

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct PageFlags: u32 {
		const PRESENT  = 1 << 0;
		const WRITABLE = 1 << 1;
		const USER     = 1 << 2;
	}
}

const ENTRIES_PER_TABLE: usize = 1024;

pub struct VirtMemory {
	directory_phys: PhysAddr,
}

impl VirtMemory {
	/// Builds the kernel's own page directory: identity maps the low 4 MiB
	/// (`IDENTITY_MAP_END`), maps the kernel physical window, installs the
	/// recursive self-map at `RECURSIVE_PDE`, then loads `cr3` and sets
	/// `cr0.PG`. Only ever called once, during early boot.
	///
	/// # Safety
	/// Must run before any code assumes paging is active, and `frames`
	/// must not yet have handed out the frames this consumes.
	pub unsafe fn init(frames: &mut PhysFrames) -> Result<Self> {
		let dir_pfn = frames.alloc()?;
		let dir_phys = PhysFrames::frame_to_addr(dir_pfn);
		zero_frame(dir_phys);

		let dir = dir_phys.as_usize() as *mut u32;
		*dir.add(RECURSIVE_PDE) = (dir_phys.as_usize() as u32) | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();

		let mut vm = VirtMemory { directory_phys: dir_phys };

		// Identity map, so code executing right after `cr3`/`cr0.PG` is
		// loaded still finds itself at the same address.
		let mut addr = 0usize;
		while addr < IDENTITY_MAP_END.as_usize() {
			vm.map_raw(dir_phys, VirtAddr::new(addr), PhysAddr::new(addr), PageFlags::PRESENT | PageFlags::WRITABLE, frames)?;
			addr += PAGE_SIZE;
		}

		// Kernel physical window: same physical range the identity map
		// already covers, mirrored at its high half.
		let mut offset = 0usize;
		while KERNEL_PHYS_WINDOW_BASE.as_usize() + offset < KERNEL_PHYS_WINDOW_END.as_usize() {
			vm.map_raw(
				dir_phys,
				KERNEL_PHYS_WINDOW_BASE + offset,
				PhysAddr::new(offset),
				PageFlags::PRESENT | PageFlags::WRITABLE,
				frames,
			)?;
			offset += PAGE_SIZE;
		}

		load_cr3(dir_phys);
		enable_paging();

		Ok(vm)
	}

	/// Maps one page in the currently active address space. Allocates a
	/// new page table frame from `frames` on demand when the covering PDE
	/// is not yet present.
	pub fn map(&mut self, virt: VirtAddr, phys: PhysAddr, flags: PageFlags, frames: &mut PhysFrames) -> Result<()> {
		let pd = recursive_directory();
		let pd_index = virt.pd_index();
		if pd[pd_index] & PageFlags::PRESENT.bits() == 0 {
			let table_pfn = frames.alloc()?;
			let table_phys = PhysFrames::frame_to_addr(table_pfn);
			pd[pd_index] = pte_value(table_phys, flags);
			invlpg(recursive_table_addr(pd_index));
			let table = recursive_table(pd_index);
			table.fill(0);
		}
		let table = recursive_table(pd_index);
		table[virt.pt_index()] = pte_value(phys, flags);
		invlpg(virt);
		Ok(())
	}

	/// Removes the mapping for `virt`, if any. Does not free the
	/// underlying page table even if it becomes empty; page tables are
	/// reclaimed only when their whole address-space range is torn down.
	pub fn unmap(&mut self, virt: VirtAddr) {
		let pd = recursive_directory();
		let pd_index = virt.pd_index();
		if pd[pd_index] & PageFlags::PRESENT.bits() == 0 {
			return;
		}
		let table = recursive_table(pd_index);
		table[virt.pt_index()] = 0;
		invlpg(virt);
	}

	pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
		let pd = recursive_directory();
		let pd_index = virt.pd_index();
		if pd[pd_index] & PageFlags::PRESENT.bits() == 0 {
			return None;
		}
		let table = recursive_table(pd_index);
		let (phys, _flags) = decode_pte(table[virt.pt_index()])?;
		Some(PhysAddr::new(phys.as_usize() | virt.page_offset()))
	}

	pub fn directory_phys(&self) -> PhysAddr {
		self.directory_phys
	}

	/// Builds a fresh page directory sharing the kernel's high-half
	/// mappings (PDE[768..1023], the kernel window and recursive slot) and
	/// leaving the user range (PDE[1..768]) empty, per §4.2's
	/// per-process address space model. The new directory is not loaded;
	/// callers switch to it through the scheduler at dispatch time.
	pub fn new_address_space(frames: &mut PhysFrames) -> Result<PhysAddr> {
		let new_pfn = frames.alloc()?;
		let new_phys = PhysFrames::frame_to_addr(new_pfn);

		map_temp(new_phys);
		let temp = temp_directory();
		temp.fill(0);

		let current = recursive_directory();
		for i in crate::config::KERNEL_WINDOW_PDE..TEMP_PD_PDE {
			temp[i] = current[i];
		}
		temp[RECURSIVE_PDE] = (new_phys.as_usize() as u32) | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();

		unmap_temp();
		Ok(new_phys)
	}

	/// Frees every user-range (PDE[1..768]) page table frame and the
	/// directory frame itself. Called once a process's last reference is
	/// dropped.
	pub fn destroy_address_space(directory: PhysAddr, frames: &mut PhysFrames) {
		map_temp(directory);
		{
			let temp = temp_directory();
			for i in crate::config::USER_PDE_RANGE {
				if temp[i] & PageFlags::PRESENT.bits() != 0 {
					let table_phys = PhysAddr::new((temp[i] as usize) & !0xFFF);
					frames.free(crate::types::Pfn(table_phys.as_usize() >> crate::types::PAGE_SHIFT));
				}
			}
		}
		unmap_temp();
		frames.free(crate::types::Pfn(directory.as_usize() >> crate::types::PAGE_SHIFT));
	}

	/// Used only by `init` before paging is enabled, when `virt == phys`
	/// still holds for every mapping it installs.
	unsafe fn map_raw(
		&mut self,
		dir_phys: PhysAddr,
		virt: VirtAddr,
		phys: PhysAddr,
		flags: PageFlags,
		frames: &mut PhysFrames,
	) -> Result<()> {
		let dir = dir_phys.as_usize() as *mut u32;
		let pd_index = virt.pd_index();
		let entry = *dir.add(pd_index);
		let table_phys = if entry & PageFlags::PRESENT.bits() == 0 {
			let table_pfn = frames.alloc()?;
			let table_phys = PhysFrames::frame_to_addr(table_pfn);
			zero_frame(table_phys);
			*dir.add(pd_index) = (table_phys.as_usize() as u32) | (flags | PageFlags::PRESENT).bits();
			table_phys
		} else {
			PhysAddr::new((entry as usize) & !0xFFF)
		};
		let table = table_phys.as_usize() as *mut u32;
		*table.add(virt.pt_index()) = pte_value(phys, flags);
		Ok(())
	}
}

/// Encodes a page table entry for `phys`/`flags`, always setting `PRESENT`.
/// Pure function of its inputs, so mapping the same `(phys, flags)` pair
/// into the same slot twice is idempotent: the second write produces the
/// identical bit pattern the first one did.
fn pte_value(phys: PhysAddr, flags: PageFlags) -> u32 {
	(phys.as_usize() as u32) | (flags | PageFlags::PRESENT).bits()
}

fn decode_pte(entry: u32) -> Option<(PhysAddr, PageFlags)> {
	if entry & PageFlags::PRESENT.bits() == 0 {
		return None;
	}
	Some((PhysAddr::new((entry as usize) & !0xFFF), PageFlags::from_bits_truncate(entry)))
}

unsafe fn zero_frame(phys: PhysAddr) {
	core::ptr::write_bytes(phys.as_usize() as *mut u8, 0, PAGE_SIZE);
}

fn recursive_directory() -> &'static mut [u32; ENTRIES_PER_TABLE] {
	unsafe { &mut *(RECURSIVE_DIR.as_mut_ptr::<[u32; ENTRIES_PER_TABLE]>()) }
}

fn recursive_table(pd_index: usize) -> &'static mut [u32; ENTRIES_PER_TABLE] {
	unsafe { &mut *(recursive_table_addr(pd_index).as_mut_ptr::<[u32; ENTRIES_PER_TABLE]>()) }
}

fn recursive_table_addr(pd_index: usize) -> VirtAddr {
	RECURSIVE_TABLES_BASE + pd_index * PAGE_SIZE
}

fn temp_directory() -> &'static mut [u32; ENTRIES_PER_TABLE] {
	unsafe { &mut *(TEMP_PD_WINDOW.as_mut_ptr::<[u32; ENTRIES_PER_TABLE]>()) }
}

fn map_temp(phys: PhysAddr) {
	let pd = recursive_directory();
	pd[TEMP_PD_PDE] = (phys.as_usize() as u32) | (PageFlags::PRESENT | PageFlags::WRITABLE).bits();
	invlpg(TEMP_PD_WINDOW);
}

fn unmap_temp() {
	let pd = recursive_directory();
	pd[TEMP_PD_PDE] = 0;
	invlpg(TEMP_PD_WINDOW);
}

fn invlpg(addr: VirtAddr) {
	unsafe {
		core::arch::asm!("invlpg [{0}]", in(reg) addr.as_usize(), options(nostack, preserves_flags));
	}
}

unsafe fn load_cr3(dir_phys: PhysAddr) {
	core::arch::asm!("mov cr3, {0:e}", in(reg) dir_phys.as_usize() as u32, options(nostack, preserves_flags));
}

unsafe fn enable_paging() {
	core::arch::asm!(
		"mov {tmp:e}, cr0",
		"or {tmp:e}, 0x80000000",
		"mov cr0, {tmp:e}",
		tmp = out(reg) _,
		options(nostack, preserves_flags),
	);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pte_value_round_trips_through_decode_pte() {
		let phys = PhysAddr::new(0x0040_3000);
		let flags = PageFlags::WRITABLE;
		let entry = pte_value(phys, flags);
		let (decoded_phys, decoded_flags) = decode_pte(entry).unwrap();
		assert_eq!(decoded_phys, phys);
		assert!(decoded_flags.contains(PageFlags::PRESENT));
		assert!(decoded_flags.contains(PageFlags::WRITABLE));
	}

	#[test]
	fn decode_pte_reports_absent_for_a_zero_entry() {
		assert!(decode_pte(0).is_none());
	}

	/// `map_page` idempotence law: writing the same `(phys, flags)` pair
	/// into an already-mapped slot is a no-op against the slot's contents -
	/// this is the bit-encoding half of `map`'s idempotence; the page-table
	/// walk and TLB invalidation around it need a live MMU and can't run on
	/// a host test process.
	#[test]
	fn mapping_the_same_page_twice_leaves_the_table_slot_unchanged() {
		let mut table = [0u32; ENTRIES_PER_TABLE];
		let phys = PhysAddr::new(0x0010_0000);
		let flags = PageFlags::PRESENT | PageFlags::WRITABLE;

		table[5] = pte_value(phys, flags);
		let after_first = table[5];
		table[5] = pte_value(phys, flags);
		assert_eq!(table[5], after_first);
	}
}
