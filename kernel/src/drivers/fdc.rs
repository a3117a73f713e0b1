// SPDX-License-Identifier: GPL-2.0

//! Floppy disk controller driver (§4.6): command protocol, DMA-backed
//! sector reads, CHS geometry for a 1.44 MiB disk. Grounded in
//! `i686_fdc*` in the reference kernel's `drivers/fdc.c`.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::pit;
use crate::arch::x86::port::{inb, outb};
use crate::arch::x86::Registers;
use crate::config::{
	DMA_BUFFER_PAGES, DMA_BUFFER_VIRT, FDC_CCR, FDC_DOR, FDC_FIFO, FDC_MSR, FLOPPY_HEADS, FLOPPY_SECTORS_PER_TRACK, FLOPPY_TOTAL_SECTORS,
	ISA_DMA_LIMIT,
};
use crate::drivers::dma;
use crate::error::{Error, Result};
use crate::memory::phys::PhysFrames;
use crate::memory::virt::{PageFlags, VirtMemory};
use crate::types::PAGE_SIZE;

const DMA_CHANNEL: u8 = 2;
const IRQ_FLOPPY: u8 = 6;

/// Upper bound on sectors serviced by a single `read_sectors` call, derived
/// from the DMA controller's 64 KiB page-crossing limit (128 * 512 = 64 KiB).
const MAX_SECTORS_PER_REQUEST: u32 = 128;

mod cmd {
	pub const SPECIFY: u8 = 0x03;
	pub const SENSE_INTERRUPT: u8 = 0x08;
	pub const READ_SECT: u8 = 0x06;
	pub const CALIBRATE: u8 = 0x07;
	pub const SEEK: u8 = 0x0F;
}

mod cmd_ext {
	pub const MULTITRACK: u8 = 0x80;
	pub const SKIP: u8 = 0x20;
	pub const DENSITY: u8 = 0x40;
}

mod dor {
	pub const MOTOR_D0: u8 = 0x10;
	pub const RESET: u8 = 0x04;
	pub const DMA_IO: u8 = 0x08;
}

mod msr {
	pub const BUSY: u8 = 0x10;
	pub const DATAREG: u8 = 0x40;
}

static IRQ_FIRED: AtomicBool = AtomicBool::new(false);

fn irq_handler(_regs: &mut Registers) {
	IRQ_FIRED.store(true, Ordering::SeqCst);
}

fn wait_irq() -> Result<()> {
	// Tick-bounded instead of an unbounded spin: a wedged controller must
	// not hang the kernel forever.
	let deadline = pit::ticks() + pit::ms_to_ticks(2000);
	while !IRQ_FIRED.load(Ordering::SeqCst) {
		if pit::ticks() > deadline {
			return Err(Error::FdcTimeout);
		}
		core::hint::spin_loop();
	}
	IRQ_FIRED.store(false, Ordering::SeqCst);
	Ok(())
}

fn write_dor(value: u8) {
	unsafe { outb(FDC_DOR, value) }
}

fn read_msr() -> u8 {
	unsafe { inb(FDC_MSR) }
}

fn send_command(byte: u8) -> Result<()> {
	let deadline = pit::ticks() + pit::ms_to_ticks(200);
	loop {
		if read_msr() & msr::DATAREG != 0 {
			unsafe { outb(FDC_FIFO, byte) };
			return Ok(());
		}
		if pit::ticks() > deadline {
			return Err(Error::FdcTimeout);
		}
	}
}

fn read_data() -> Result<u8> {
	let deadline = pit::ticks() + pit::ms_to_ticks(200);
	loop {
		let status = read_msr();
		if status & (msr::BUSY | msr::DATAREG) == (msr::BUSY | msr::DATAREG) {
			return Ok(unsafe { inb(FDC_FIFO) });
		}
		if pit::ticks() > deadline {
			return Err(Error::FdcTimeout);
		}
	}
}

fn sense_interrupt() -> Result<(u8, u8)> {
	send_command(cmd::SENSE_INTERRUPT)?;
	let st0 = read_data()?;
	let cyl = read_data()?;
	Ok((st0, cyl))
}

fn control_motor(on: bool) {
	let value = if on { dor::RESET | dor::DMA_IO | dor::MOTOR_D0 } else { dor::RESET | dor::DMA_IO };
	write_dor(value);
	if on {
		pit::busy_wait_ms(300);
	}
}

fn configure_drive() -> Result<()> {
	send_command(cmd::SPECIFY)?;
	send_command(0xDF)?; // step rate 3ms, head unload 240ms
	send_command(0x02) // head load 16ms, no DMA-disable bit
}

fn select_data_rate() {
	unsafe { outb(FDC_CCR, 0x00) }; // 500 Kbps, the only rate a 1.44 MiB drive uses
}

fn calibrate() -> Result<()> {
	control_motor(true);
	for _ in 0..10 {
		send_command(cmd::CALIBRATE)?;
		send_command(0)?; // drive 0
		wait_irq()?;
		let (_st0, cyl) = sense_interrupt()?;
		if cyl == 0 {
			return Ok(());
		}
	}
	Err(Error::FdcTimeout)
}

fn seek(cylinder: u8, head: u8) -> Result<()> {
	send_command(cmd::SEEK)?;
	send_command(head << 2)?;
	send_command(cylinder)?;
	wait_irq()?;
	sense_interrupt().map(|_| ())
}

/// LBA -> CHS for a standard 18 sectors/track, 2-head, 80-cylinder 1.44 MiB
/// floppy. Sector numbers are 1-based.
fn lba_to_chs(lba: u32) -> (u8, u8, u8) {
	let spt = FLOPPY_SECTORS_PER_TRACK;
	let sector = (lba % spt) + 1;
	let head = (lba / spt) % FLOPPY_HEADS;
	let cylinder = (lba / spt) / FLOPPY_HEADS;
	(cylinder as u8, head as u8, sector as u8)
}

pub struct Fdc {
	dma_phys_base: crate::types::PhysAddr,
}

impl Fdc {
	/// Resets the controller, allocates and maps the DMA-visible sector
	/// buffer, calibrates drive 0 and registers the IRQ6 handler. The DMA
	/// buffer's physical base is checked against the ISA 16 MiB line; a
	/// larger-than-expected boot image that cannot satisfy this is a hard
	/// init failure rather than a silent fallback to PIO, which this
	/// controller protocol does not implement.
	pub fn init(virt: &mut VirtMemory, frames: &mut PhysFrames) -> Result<Self> {
		let dma_pfn = frames.alloc_contiguous(DMA_BUFFER_PAGES)?;
		let dma_phys = PhysFrames::frame_to_addr(dma_pfn);
		if dma_phys.as_usize() + DMA_BUFFER_PAGES * PAGE_SIZE > ISA_DMA_LIMIT {
			frames.free_contiguous(dma_pfn, DMA_BUFFER_PAGES);
			return Err(Error::InitFailed("DMA buffer frame is above the 16 MiB ISA DMA line"));
		}

		for i in 0..DMA_BUFFER_PAGES {
			virt.map(
				DMA_BUFFER_VIRT + i * PAGE_SIZE,
				dma_phys + i * PAGE_SIZE,
				PageFlags::PRESENT | PageFlags::WRITABLE,
				frames,
			)?;
		}

		crate::interrupt::register_irq(IRQ_FLOPPY, irq_handler);

		write_dor(0); // disable controller
		pit::busy_wait_ms(10);
		write_dor(dor::RESET | dor::DMA_IO); // enable controller, leave motors off
		wait_irq()?;
		for _ in 0..4 {
			sense_interrupt()?;
		}
		select_data_rate();
		configure_drive()?;
		calibrate()?;

		Ok(Self { dma_phys_base: dma_phys })
	}

	/// Reads one 512-byte sector at `lba` into `buf`. `buf` must be at least
	/// 512 bytes; extra bytes are left untouched.
	pub fn read_sector(&self, lba: u32, buf: &mut [u8]) -> Result<()> {
		if buf.len() < 512 {
			return Err(Error::Error);
		}
		let (cylinder, head, sector) = lba_to_chs(lba);

		control_motor(true);
		seek(cylinder, head)?;

		dma::set_transfer(DMA_CHANNEL, self.dma_phys_base.as_usize(), 512)?;
		dma::set_mode(DMA_CHANNEL, dma::mode::READ_TRANSFER | dma::mode::TRANSFER_SINGLE);

		send_command(cmd::READ_SECT | cmd_ext::MULTITRACK | cmd_ext::SKIP | cmd_ext::DENSITY)?;
		send_command(head << 2)?;
		send_command(cylinder)?;
		send_command(head)?;
		send_command(sector)?;
		send_command(2)?; // 512 bytes/sector
		send_command(FLOPPY_SECTORS_PER_TRACK as u8)?;
		send_command(0x1B)?; // gap length
		send_command(0xFF)?; // data length (unused at 512 bytes/sector)

		wait_irq()?;
		for _ in 0..7 {
			read_data()?;
		}
		control_motor(false);

		let src = unsafe { core::slice::from_raw_parts(DMA_BUFFER_VIRT.as_ptr::<u8>(), 512) };
		buf[..512].copy_from_slice(src);
		Ok(())
	}

	/// Reads `count` consecutive 512-byte sectors starting at `lba` into
	/// `buf` (must hold at least `count * 512` bytes). Rejects a request
	/// that runs past the end of a 1.44 MiB disk or past the per-request
	/// cap without touching `buf`, rather than trusting the caller (e.g.
	/// `Fat12`) to never ask for an out-of-range span.
	pub fn read_sectors(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<()> {
		let end = match lba.checked_add(count) {
			Some(end) => end,
			None => return Err(Error::Error),
		};
		if count > MAX_SECTORS_PER_REQUEST || end > FLOPPY_TOTAL_SECTORS {
			return Err(Error::Error);
		}
		if buf.len() < count as usize * 512 {
			return Err(Error::Error);
		}
		for i in 0..count {
			self.read_sector(lba + i, &mut buf[i as usize * 512..(i as usize + 1) * 512])?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lba_to_chs_matches_standard_floppy_geometry() {
		assert_eq!(lba_to_chs(0), (0, 0, 1));
		assert_eq!(lba_to_chs(17), (0, 0, 18));
		assert_eq!(lba_to_chs(18), (0, 1, 1));
		assert_eq!(lba_to_chs(35), (0, 1, 18));
		assert_eq!(lba_to_chs(36), (1, 0, 1));
	}

	fn fixture() -> Fdc {
		Fdc { dma_phys_base: crate::types::PhysAddr::new(0) }
	}

	#[test]
	fn read_sectors_rejects_a_span_that_runs_past_the_disk_without_touching_the_buffer() {
		let fdc = fixture();
		let mut buf = [0xAAu8; 512];
		let err = fdc.read_sectors(FLOPPY_TOTAL_SECTORS - 1, 2, &mut buf);
		assert!(err.is_err());
		assert!(buf.iter().all(|&b| b == 0xAA));
	}

	#[test]
	fn read_sectors_rejects_a_count_above_the_per_request_cap() {
		let fdc = fixture();
		let mut buf = [0u8; 512 * MAX_SECTORS_PER_REQUEST as usize + 512];
		let err = fdc.read_sectors(0, MAX_SECTORS_PER_REQUEST + 1, &mut buf);
		assert!(err.is_err());
	}

	#[test]
	fn read_sectors_rejects_an_lba_plus_count_overflow() {
		let fdc = fixture();
		let mut buf = [0u8; 512];
		let err = fdc.read_sectors(u32::MAX, 2, &mut buf);
		assert!(err.is_err());
	}
}
