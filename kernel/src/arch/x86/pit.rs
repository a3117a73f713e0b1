// SPDX-License-Identifier: GPL-2.0

//! Programmable Interval Timer, channel 0, wired to IRQ0. Drives the
//! scheduler's preemption tick (§5) and the coarse `sleep_ms` the FDC driver
//! uses for motor spin-up (§4.6).

use core::sync::atomic::{AtomicU64, Ordering};

use super::idt;
use super::port::outb;
use crate::sync::Spinlock;

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Ticks per second the timer is programmed for; §5 scheduler quantum and
/// `sleep_ms` are both expressed in these ticks.
pub const TICK_HZ: u32 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

type TickCallback = fn();
static ON_TICK: Spinlock<Option<TickCallback>> = Spinlock::new(None);

/// Programs channel 0 for `TICK_HZ` square-wave output and registers the
/// IRQ0 handler. `callback` is invoked on every tick with interrupts
/// disabled, after the tick counter is incremented; the scheduler uses it
/// to drive preemption.
pub fn init(callback: TickCallback) {
	let divisor = PIT_FREQUENCY_HZ / TICK_HZ;
	unsafe {
		outb(COMMAND, 0x36); // channel 0, lobyte/hibyte, mode 3 (square wave)
		outb(CHANNEL0_DATA, (divisor & 0xFF) as u8);
		outb(CHANNEL0_DATA, ((divisor >> 8) & 0xFF) as u8);
	}
	*ON_TICK.lock() = Some(callback);
	idt::register_irq(0, handle_tick);
}

fn handle_tick(_regs: &mut idt::Registers) {
	TICKS.fetch_add(1, Ordering::Relaxed);
	if let Some(callback) = *ON_TICK.lock() {
		callback();
	}
}

/// Ticks elapsed since `init`; wraps at 2^64, which at 100 Hz is longer than
/// anyone will run this kernel.
pub fn ticks() -> u64 {
	TICKS.load(Ordering::Relaxed)
}

/// Busy-spins (interrupts enabled) until at least `ms` milliseconds have
/// elapsed. Used only during early FDC motor spin-up, before the scheduler
/// has a sleep list to block on.
pub fn busy_wait_ms(ms: u32) {
	let target = ticks() + (ms * TICK_HZ / 1000).max(1) as u64;
	while ticks() < target {
		core::hint::spin_loop();
	}
}

pub const fn ms_to_ticks(ms: u32) -> u64 {
	(ms as u64 * TICK_HZ as u64) / 1000
}

/// Advances the tick counter without touching the PIT hardware, for tests
/// that need `ticks()` to report a specific value (no IRQ ever fires in a
/// host test process).
#[cfg(test)]
pub fn advance_ticks_for_test(by: u64) {
	TICKS.fetch_add(by, Ordering::Relaxed);
}
