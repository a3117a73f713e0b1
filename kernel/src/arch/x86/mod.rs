// SPDX-License-Identifier: GPL-2.0

//! 32-bit x86 architecture support: GDT/TSS, IDT and its vector dispatch
//! table, the 8259 PIC, the 8253 PIT and the kernel-thread context switch.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod port;

pub use idt::{disable, enable, register_handler, register_irq, Handler, Registers};

/// Brings up segmentation and interrupt handling in the order the CPU
/// requires: GDT before IDT (gates reference the kernel code selector),
/// PIC remap before IDT load (so IRQ0-15 land on vectors 32-47 and not the
/// CPU exception range they occupy unremapped).
///
/// # Safety
/// Must run exactly once, early in boot, before interrupts are enabled.
pub unsafe fn init() {
	gdt::init();
	pic::init();
	idt::init();
}

#[inline(always)]
pub fn disable_interrupts() {
	idt::disable();
}

#[inline(always)]
pub fn enable_interrupts() {
	idt::enable();
}

pub fn halt_forever() -> ! {
	idt::disable();
	loop {
		unsafe {
			core::arch::asm!("hlt", options(nomem, nostack));
		}
	}
}

/// Halts until the next interrupt, used by the scheduler's idle thread.
pub fn halt_once() {
	unsafe {
		core::arch::asm!("sti", "hlt", options(nomem, nostack));
	}
}
