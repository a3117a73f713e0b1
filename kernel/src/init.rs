// SPDX-License-Identifier: GPL-2.0

//! Boot sequence orchestration (§2's data flow): architecture bring-up,
//! memory subsystem, scheduler, floppy DMA, VFS, FAT12 mount, then
//! multitasking. Runs once, on the boot stack, before any process exists.

use alloc::boxed::Box;
use alloc::vec;

use crate::boot::{BootInfo, RawBootInfo};
use crate::config::KERNEL_STACK_SIZE;
use crate::console;
use crate::drivers::Fdc;
use crate::fs::fat12::Fat12;

/// Brings the kernel up in the order §2 requires and falls into the idle
/// loop, from which point all further work happens inside scheduled
/// processes. Never returns.
///
/// # Safety
/// See `kernel_main`; this is only ever called from there.
pub unsafe fn boot(raw: *const RawBootInfo) -> ! {
	if console::init().is_err() {
		// No sink to report through; spin rather than silently hang in a
		// tight loop that at least halts instead of burning cycles.
		loop {
			core::arch::asm!("hlt");
		}
	}
	crate::kprintln!("booting");

	crate::arch::x86::init();
	crate::kprintln!("GDT/IDT/PIC ready");

	let mut boot_info = BootInfo::from_raw(&*raw);

	let memory = match crate::memory::Memory::init(&mut boot_info) {
		Ok(memory) => memory,
		Err(e) => panic!("memory subsystem init failed: {}", e),
	};
	crate::kprintln!("memory subsystem ready");

	let fdc = {
		let mut virt = memory.virt.lock();
		let mut frames = memory.frames.lock();
		Fdc::init(&mut virt, &mut frames)
	};
	let fdc = match fdc {
		Ok(fdc) => Some(fdc),
		Err(e) => {
			crate::error!("floppy controller init failed: {}", e);
			None
		}
	};

	crate::install_kernel(memory);

	crate::scheduler::init();
	crate::syscalls::init();
	crate::kprintln!("scheduler and syscall gate ready");

	if let Some(fdc) = fdc {
		mount_root(fdc);
	} else {
		crate::error!("no root filesystem mounted; floppy unavailable");
	}

	let reaper_stack = vec![0u8; KERNEL_STACK_SIZE];
	let directory = crate::kernel().memory().virt.lock().directory_phys();
	match crate::scheduler::spawn(crate::scheduler::reaper_task, directory, reaper_stack) {
		Ok(pid) => crate::scheduler::set_reaper(pid),
		Err(e) => crate::error!("failed to spawn reaper: {}", e),
	}

	crate::kprintln!("enabling multitasking");
	crate::arch::x86::enable_interrupts();
	crate::scheduler::idle_loop()
}

/// Registers and mounts the FAT12 driver over the just-initialized floppy
/// controller. A failure here is logged and leaves the kernel without a
/// root filesystem, per §7's "downstream inits skipped" policy.
fn mount_root(fdc: Fdc) {
	let driver: Box<dyn crate::fs::FsDriver> = Box::new(Fat12::new(fdc));
	let mut vfs = crate::kernel().vfs().lock();
	if let Err(e) = vfs.register("fat12", driver) {
		crate::error!("failed to register fat12 driver: {}", e);
		return;
	}
	if let Err(e) = vfs.mount("fat12", "/") {
		crate::error!("failed to mount root filesystem: {}", e);
		return;
	}
	crate::kprintln!("root filesystem mounted");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn boot_info_from_raw_is_unused_marker() {
		// `boot::BootInfo::test_fixture` is the path exercised by every
		// other subsystem's own tests; this module has no standalone unit
		// to test beyond the orchestration covered by those.
		let info = BootInfo::test_fixture(0, &[]);
		assert_eq!(info.memory_size_kib, 0);
	}
}
