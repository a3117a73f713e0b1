// SPDX-License-Identifier: GPL-2.0

//! A freestanding 32-bit x86 kernel: physical/virtual memory, a
//! preemptive scheduler, a DMA-driven floppy controller and a FAT12-backed
//! VFS (§1). Everything the loader and the CPU's segmentation/interrupt
//! machinery are expected to supply lives behind the `arch` and `boot`
//! modules; this crate starts from a `BootInfo` and a working IDT.

#![no_std]
#![feature(alloc_error_handler)]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod config;
pub mod console;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod init;
pub mod interrupt;
pub mod memory;
pub mod panic;
pub mod prelude;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscalls;
pub mod types;

use once_cell::sync::OnceCell;

/// The single process-wide owner of subsystem state that the global
/// allocator and the reaper need to reach from anywhere (§3.1, §9's
/// `KernelContext` redesign note). The scheduler, VFS mount table and
/// process arena keep their own top-level statics instead of living here:
/// each has reentrancy needs (running with interrupts disabled, or being
/// reached from inside a syscall handler) that don't fit one shared lock
/// order with the memory subsystem. `KernelContext` covers exactly the
/// state the redesign note calls out as otherwise-scattered global
/// mutable state with no such constraint: the frame/page/heap/vmalloc
/// allocators.
pub struct KernelContext {
	memory: memory::Memory,
	vfs: sync::Spinlock<fs::Vfs>,
}

impl KernelContext {
	pub fn memory(&self) -> &memory::Memory {
		&self.memory
	}

	pub fn vfs(&self) -> &sync::Spinlock<fs::Vfs> {
		&self.vfs
	}
}

static KERNEL: OnceCell<KernelContext> = OnceCell::new();

/// Returns the global kernel context. Panics if called before `init::boot`
/// has installed it, which should be impossible outside of a bug in boot
/// ordering itself.
pub fn kernel() -> &'static KernelContext {
	KERNEL.get().expect("kernel() called before KernelContext was installed")
}

/// Installs the global kernel context. Must be called exactly once, from
/// `init::boot`.
pub(crate) fn install_kernel(memory: memory::Memory) {
	KERNEL
		.set(KernelContext {
			memory,
			vfs: sync::Spinlock::new(fs::Vfs::new()),
		})
		.unwrap_or_else(|_| panic!("KernelContext installed twice"));
}

/// Entry point called by the architecture-specific loader glue with a
/// pointer to the raw `BootInfo` structure (§6). Never returns.
///
/// # Safety
/// `raw` must point at a valid `RawBootInfo` whose `memory_blocks` array is
/// valid for `memory_block_count` entries, and this must be called exactly
/// once, before interrupts are enabled.
#[no_mangle]
pub unsafe extern "C" fn kernel_main(raw: *const boot::RawBootInfo) -> ! {
	init::boot(raw)
}
