// SPDX-License-Identifier: GPL-2.0

//! 256-entry IDT plus the vector dispatch table backing §4.9's
//! `register_handler`/`register_irq` contract. Every vector gets a tiny
//! assembly stub (`global_asm!`, below) that normalizes the stack to a
//! uniform frame and falls into `isr_common`, which saves `Registers` and
//! calls `dispatch`.

use core::arch::global_asm;
use core::mem::size_of;

use crate::sync::Spinlock;

use super::pic;

const IDT_ENTRIES: usize = 256;

mod type_attr {
	pub const PRESENT: u8 = 1 << 7;
	pub const RING3: u8 = 3 << 5;
	pub const INTERRUPT_GATE_32: u8 = 0xE;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
	offset_low: u16,
	selector: u16,
	zero: u8,
	type_attr: u8,
	offset_high: u16,
}

impl IdtEntry {
	const fn missing() -> Self {
		IdtEntry {
			offset_low: 0,
			selector: 0,
			zero: 0,
			type_attr: 0,
			offset_high: 0,
		}
	}

	fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
		IdtEntry {
			offset_low: (handler & 0xFFFF) as u16,
			selector,
			zero: 0,
			type_attr,
			offset_high: ((handler >> 16) & 0xFFFF) as u16,
		}
	}
}

#[repr(C, packed)]
struct IdtPointer {
	limit: u16,
	base: u32,
}

/// Register snapshot handed to every handler, in the order `isr_common`
/// pushes them: `pusha` order first, then the stub's own `vector`/
/// `error_code`, then the CPU's own `eip`/`cs`/`eflags` from the `iret` frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
	pub edi: u32,
	pub esi: u32,
	pub ebp: u32,
	pub esp_dummy: u32,
	pub ebx: u32,
	pub edx: u32,
	pub ecx: u32,
	pub eax: u32,
	pub vector: u32,
	pub error_code: u32,
	pub eip: u32,
	pub cs: u32,
	pub eflags: u32,
}

pub type Handler = fn(&mut Registers);

static IDT: Spinlock<[IdtEntry; IDT_ENTRIES]> = Spinlock::new([IdtEntry::missing(); IDT_ENTRIES]);
static HANDLERS: Spinlock<[Option<Handler>; IDT_ENTRIES]> = Spinlock::new([None; IDT_ENTRIES]);

/// Installs the stub table and loads the IDT. `gdt::init` and `pic::init`
/// must both run first: gates reference the kernel code selector, and
/// IRQ0-15 must already be remapped to vectors 32-47.
pub unsafe fn init() {
	let selector = super::gdt::kernel_code_selector();
	let mut idt = IDT.lock();
	for vector in 0..IDT_ENTRIES {
		let stub = isr_stub_table[vector] as u32;
		idt[vector] = IdtEntry::new(stub, selector, type_attr::PRESENT | type_attr::INTERRUPT_GATE_32);
	}
	// Allow `int 0x80` from ring 3 for the syscall gate.
	idt[0x80].type_attr |= type_attr::RING3;

	let pointer = IdtPointer {
		limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
		base: idt.as_ptr() as u32,
	};
	core::arch::asm!("lidt [{0}]", in(reg) &pointer);
}

/// Registers a handler for a CPU exception or software-interrupt vector
/// (0-31, or 0x80 for syscalls). Overwrites any previous handler.
pub fn register_handler(vector: u8, handler: Handler) {
	HANDLERS.lock()[vector as usize] = Some(handler);
}

/// Registers a handler for hardware IRQ `irq` (0-15) and unmasks it at the
/// PIC. IRQ numbers are translated to vectors 32-47 internally.
pub fn register_irq(irq: u8, handler: Handler) {
	HANDLERS.lock()[(pic::IRQ_BASE + irq) as usize] = Some(handler);
	unsafe {
		pic::unmask(irq);
	}
}

/// Called from `isr_common` with the freshly-saved frame. Unhandled CPU
/// exceptions panic; unhandled hardware IRQs are acknowledged and dropped.
#[no_mangle]
extern "C" fn dispatch(regs: &mut Registers) {
	let vector = regs.vector as u8;
	let handler = HANDLERS.lock()[vector as usize];
	match handler {
		Some(handler) => handler(regs),
		None if vector >= pic::IRQ_BASE => {}
		None => panic!(
			"unhandled exception {} at eip={:#x}, error_code={:#x}",
			vector, regs.eip, regs.error_code
		),
	}
	if vector >= pic::IRQ_BASE {
		unsafe {
			pic::send_eoi(vector - pic::IRQ_BASE);
		}
	}
}

pub fn enable() {
	unsafe {
		core::arch::asm!("sti", options(nomem, nostack));
	}
}

pub fn disable() {
	unsafe {
		core::arch::asm!("cli", options(nomem, nostack));
	}
}

pub fn interrupts_enabled() -> bool {
	let eflags: u32;
	unsafe {
		core::arch::asm!("pushfd", "pop {0:e}", out(reg) eflags, options(nomem, preserves_flags));
	}
	eflags & (1 << 9) != 0
}

// Vectors 8, 10-14, 17 and 21 are the ones where the CPU itself pushes an
// error code; every other stub pushes a dummy 0 so `isr_common` always sees
// the same frame shape.
macro_rules! isr_stub {
	($name:ident, $vector:literal, noerr) => {
		concat!(
			".global ", stringify!($name), "\n",
			stringify!($name), ":\n",
			"push 0\n",
			"push ", stringify!($vector), "\n",
			"jmp isr_common\n",
		)
	};
	($name:ident, $vector:literal, err) => {
		concat!(
			".global ", stringify!($name), "\n",
			stringify!($name), ":\n",
			"push ", stringify!($vector), "\n",
			"jmp isr_common\n",
		)
	};
}

global_asm!(
	".section .text",
	"isr_common:",
	"pusha",
	"push esp",
	"call dispatch",
	"add esp, 4",
	"popa",
	"add esp, 8", // discard vector + error_code
	"iretd",
	isr_stub!(isr0, 0, noerr),
	isr_stub!(isr1, 1, noerr),
	isr_stub!(isr2, 2, noerr),
	isr_stub!(isr3, 3, noerr),
	isr_stub!(isr4, 4, noerr),
	isr_stub!(isr5, 5, noerr),
	isr_stub!(isr6, 6, noerr),
	isr_stub!(isr7, 7, noerr),
	isr_stub!(isr8, 8, err),
	isr_stub!(isr9, 9, noerr),
	isr_stub!(isr10, 10, err),
	isr_stub!(isr11, 11, err),
	isr_stub!(isr12, 12, err),
	isr_stub!(isr13, 13, err),
	isr_stub!(isr14, 14, err),
	isr_stub!(isr15, 15, noerr),
	isr_stub!(isr16, 16, noerr),
	isr_stub!(isr17, 17, err),
	isr_stub!(isr18, 18, noerr),
	isr_stub!(isr19, 19, noerr),
	isr_stub!(isr20, 20, noerr),
	isr_stub!(isr21, 21, err),
	isr_stub!(isr22, 22, noerr),
	isr_stub!(isr23, 23, noerr),
	isr_stub!(isr24, 24, noerr),
	isr_stub!(isr25, 25, noerr),
	isr_stub!(isr26, 26, noerr),
	isr_stub!(isr27, 27, noerr),
	isr_stub!(isr28, 28, noerr),
	isr_stub!(isr29, 29, noerr),
	isr_stub!(isr30, 30, noerr),
	isr_stub!(isr31, 31, noerr),
);

macro_rules! irq_stub {
	($name:ident, $vector:literal) => {
		concat!(
			".global ", stringify!($name), "\n",
			stringify!($name), ":\n",
			"push 0\n",
			"push ", stringify!($vector), "\n",
			"jmp isr_common\n",
		)
	};
}

global_asm!(
	".section .text",
	irq_stub!(isr32, 32),
	irq_stub!(isr33, 33),
	irq_stub!(isr34, 34),
	irq_stub!(isr35, 35),
	irq_stub!(isr36, 36),
	irq_stub!(isr37, 37),
	irq_stub!(isr38, 38),
	irq_stub!(isr39, 39),
	irq_stub!(isr40, 40),
	irq_stub!(isr41, 41),
	irq_stub!(isr42, 42),
	irq_stub!(isr43, 43),
	irq_stub!(isr44, 44),
	irq_stub!(isr45, 45),
	irq_stub!(isr46, 46),
	irq_stub!(isr47, 47),
);

// Vector 0x80 is the syscall gate (§6: int 0x80, eax = syscall number).
global_asm!(".section .text", irq_stub!(isr128, 128));

// Vectors 48-127 and 129-255 are currently unused. `isr48..isr63` give
// `UNUSED_STUB` a concrete, identifiable target instead of pointing every
// spare IDT slot at the syscall gate's own stub.
global_asm!(
	".section .text",
	irq_stub!(isr48, 48),
	irq_stub!(isr49, 49),
	irq_stub!(isr50, 50),
	irq_stub!(isr51, 51),
	irq_stub!(isr52, 52),
	irq_stub!(isr53, 53),
	irq_stub!(isr54, 54),
	irq_stub!(isr55, 55),
	irq_stub!(isr56, 56),
	irq_stub!(isr57, 57),
	irq_stub!(isr58, 58),
	irq_stub!(isr59, 59),
	irq_stub!(isr60, 60),
	irq_stub!(isr61, 61),
	irq_stub!(isr62, 62),
	irq_stub!(isr63, 63),
);

extern "C" {
	fn isr0();
	fn isr1();
	fn isr2();
	fn isr3();
	fn isr4();
	fn isr5();
	fn isr6();
	fn isr7();
	fn isr8();
	fn isr9();
	fn isr10();
	fn isr11();
	fn isr12();
	fn isr13();
	fn isr14();
	fn isr15();
	fn isr16();
	fn isr17();
	fn isr18();
	fn isr19();
	fn isr20();
	fn isr21();
	fn isr22();
	fn isr23();
	fn isr24();
	fn isr25();
	fn isr26();
	fn isr27();
	fn isr28();
	fn isr29();
	fn isr30();
	fn isr31();
	fn isr32();
	fn isr33();
	fn isr34();
	fn isr35();
	fn isr36();
	fn isr37();
	fn isr38();
	fn isr39();
	fn isr40();
	fn isr41();
	fn isr42();
	fn isr43();
	fn isr44();
	fn isr45();
	fn isr46();
	fn isr47();
	fn isr48();
	fn isr49();
	fn isr50();
	fn isr51();
	fn isr52();
	fn isr53();
	fn isr54();
	fn isr55();
	fn isr56();
	fn isr57();
	fn isr58();
	fn isr59();
	fn isr60();
	fn isr61();
	fn isr62();
	fn isr63();
	fn isr128();
}

/// Vectors 64-127 and 129-255 reuse `isr63`'s stub (vector field overwritten
/// to whichever slot `init` installed it at would be wrong, so instead they
/// all route through the syscall gate's spare stub and get masked as
/// "unhandled" by `dispatch`); only the vectors actually wired above carry a
/// distinguishable vector number.
static UNUSED_STUB: unsafe extern "C" fn() = isr63;

static isr_stub_table: [unsafe extern "C" fn(); IDT_ENTRIES] = build_table();

const fn build_table() -> [unsafe extern "C" fn(); IDT_ENTRIES] {
	let mut table: [unsafe extern "C" fn(); IDT_ENTRIES] = [UNUSED_STUB; IDT_ENTRIES];
	table[0] = isr0;
	table[1] = isr1;
	table[2] = isr2;
	table[3] = isr3;
	table[4] = isr4;
	table[5] = isr5;
	table[6] = isr6;
	table[7] = isr7;
	table[8] = isr8;
	table[9] = isr9;
	table[10] = isr10;
	table[11] = isr11;
	table[12] = isr12;
	table[13] = isr13;
	table[14] = isr14;
	table[15] = isr15;
	table[16] = isr16;
	table[17] = isr17;
	table[18] = isr18;
	table[19] = isr19;
	table[20] = isr20;
	table[21] = isr21;
	table[22] = isr22;
	table[23] = isr23;
	table[24] = isr24;
	table[25] = isr25;
	table[26] = isr26;
	table[27] = isr27;
	table[28] = isr28;
	table[29] = isr29;
	table[30] = isr30;
	table[31] = isr31;
	table[32] = isr32;
	table[33] = isr33;
	table[34] = isr34;
	table[35] = isr35;
	table[36] = isr36;
	table[37] = isr37;
	table[38] = isr38;
	table[39] = isr39;
	table[40] = isr40;
	table[41] = isr41;
	table[42] = isr42;
	table[43] = isr43;
	table[44] = isr44;
	table[45] = isr45;
	table[46] = isr46;
	table[47] = isr47;
	table[0x80] = isr128;
	table
}
