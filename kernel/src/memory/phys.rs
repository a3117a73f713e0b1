// SPDX-License-Identifier: GPL-2.0

//! Physical frame bitmap allocator (§4.1). One bit per 4 KiB frame, built
//! from the boot loader's memory map: available ranges are cleared first,
//! then every other range (reserved/ACPI/the bitmap's own storage) is set,
//! so overlapping entries always resolve in favor of "reserved".

use alloc::vec;
use alloc::vec::Vec;

use crate::boot::{BootInfo, MemoryType};
use crate::error::{Error, Result};
use crate::types::{PAGE_SHIFT, PAGE_SIZE, Pfn, PhysAddr};

pub struct PhysFrames {
	bitmap: Vec<u8>,
	total_frames: usize,
	free_frames: usize,
}

impl PhysFrames {
	/// Builds the bitmap from `info`'s memory map, placing the bitmap's own
	/// storage in the first available range large enough to hold it and
	/// recording that range as RESERVED so it is never handed back out.
	pub fn init(info: &mut BootInfo) -> Result<Self> {
		let total_frames = ((info.memory_size_kib as usize) * 1024) >> PAGE_SHIFT;
		let bitmap_bytes = (total_frames + 7) / 8;

		let bitmap_base = info
			.memory_blocks
			.iter()
			.find(|b| b.kind == MemoryType::Available && b.length as usize >= bitmap_bytes)
			.map(|b| b.base)
			.ok_or(Error::InitFailed("no memory region large enough for frame bitmap"))?;

		info.push_reserved(bitmap_base, bitmap_bytes as u64);

		let mut bitmap = vec![0xFFu8; bitmap_bytes];
		for block in &info.memory_blocks {
			if block.kind != MemoryType::Available {
				continue;
			}
			let start = (block.base as usize) >> PAGE_SHIFT;
			let count = (block.length as usize) >> PAGE_SHIFT;
			for frame in start..start + count {
				clear_bit(&mut bitmap, frame);
			}
		}
		for block in &info.memory_blocks {
			if block.kind == MemoryType::Available {
				continue;
			}
			let start = ((block.base as usize) + PAGE_SIZE - 1) >> PAGE_SHIFT;
			let end = ((block.base as usize + block.length as usize) + PAGE_SIZE - 1) >> PAGE_SHIFT;
			for frame in start..end.max(start) {
				if frame < total_frames {
					set_bit(&mut bitmap, frame);
				}
			}
		}

		let free_frames = (0..total_frames).filter(|&f| !test_bit(&bitmap, f)).count();

		Ok(Self {
			bitmap,
			total_frames,
			free_frames,
		})
	}

	/// Allocates the first free frame, marking it used.
	pub fn alloc(&mut self) -> Result<Pfn> {
		let frame = self.first_free(0).ok_or(Error::OutOfFrames)?;
		set_bit(&mut self.bitmap, frame);
		self.free_frames -= 1;
		Ok(Pfn(frame))
	}

	/// Allocates `count` contiguous frames. `count == 0` returns a valid
	/// address without marking anything used or touching `free_frames`.
	pub fn alloc_contiguous(&mut self, count: usize) -> Result<Pfn> {
		if count == 0 {
			return Ok(Pfn(self.first_free(0).unwrap_or(0)));
		}
		if count > self.free_frames {
			return Err(Error::OutOfFrames);
		}
		let mut start = self.first_free(0).ok_or(Error::OutOfFrames)?;
		let mut run = 1usize;
		let mut cursor = start;
		while run < count {
			cursor += 1;
			if cursor >= self.total_frames {
				return Err(Error::OutOfFrames);
			}
			if test_bit(&self.bitmap, cursor) {
				run = 1;
				start = match self.first_free(cursor + 1) {
					Some(f) => f,
					None => return Err(Error::OutOfFrames),
				};
				cursor = start;
			} else {
				run += 1;
			}
		}
		for frame in start..start + count {
			set_bit(&mut self.bitmap, frame);
		}
		self.free_frames -= count;
		Ok(Pfn(start))
	}

	/// Frees a previously allocated frame. Uses XOR to clear the bit, as
	/// the bitmap's free/used invariant guarantees the bit is currently
	/// set; the count is only adjusted when the bit actually flips, so a
	/// double free toggles the bit back to "used" instead of silently
	/// inflating `free_frames`.
	pub fn free(&mut self, pfn: Pfn) {
		let frame = pfn.0;
		if frame >= self.total_frames {
			return;
		}
		let was_used = test_bit(&self.bitmap, frame);
		self.bitmap[frame / 8] ^= 1 << (frame % 8);
		if was_used {
			self.free_frames += 1;
		} else {
			self.free_frames -= 1;
		}
	}

	pub fn free_contiguous(&mut self, pfn: Pfn, count: usize) {
		for i in 0..count {
			self.free(Pfn(pfn.0 + i));
		}
	}

	pub fn total_frames(&self) -> usize {
		self.total_frames
	}

	pub fn free_frames(&self) -> usize {
		self.free_frames
	}

	pub fn frame_to_addr(pfn: Pfn) -> PhysAddr {
		PhysAddr::new(pfn.0 << PAGE_SHIFT)
	}

	fn first_free(&self, from: usize) -> Option<usize> {
		(from..self.total_frames).find(|&f| !test_bit(&self.bitmap, f))
	}
}

fn test_bit(bitmap: &[u8], bit: usize) -> bool {
	bitmap[bit / 8] & (1 << (bit % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], bit: usize) {
	bitmap[bit / 8] |= 1 << (bit % 8);
}

fn clear_bit(bitmap: &mut [u8], bit: usize) {
	bitmap[bit / 8] &= !(1 << (bit % 8));
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::boot::MemoryBlock;

	fn fixture() -> PhysFrames {
		let mut info = BootInfo::test_fixture(8192, &[MemoryBlock::new(0, 8192 * 1024, MemoryType::Available)]);
		PhysFrames::init(&mut info).unwrap()
	}

	#[test]
	fn alloc_marks_frame_used_and_free_reverses_it() {
		let mut frames = fixture();
		let before = frames.free_frames();
		let pfn = frames.alloc().unwrap();
		assert_eq!(frames.free_frames(), before - 1);
		frames.free(pfn);
		assert_eq!(frames.free_frames(), before);
	}

	#[test]
	fn double_free_toggles_back_to_used_instead_of_inflating_count() {
		let mut frames = fixture();
		let pfn = frames.alloc().unwrap();
		let after_alloc = frames.free_frames();
		frames.free(pfn);
		frames.free(pfn); // double free: XOR flips the bit back to "used"
		assert_eq!(frames.free_frames(), after_alloc);
	}

	#[test]
	fn alloc_contiguous_returns_adjacent_frames() {
		let mut frames = fixture();
		let before = frames.free_frames();
		let pfn = frames.alloc_contiguous(4).unwrap();
		assert_eq!(frames.free_frames(), before - 4);
		frames.free_contiguous(pfn, 4);
		assert_eq!(frames.free_frames(), before);
	}

	#[test]
	fn alloc_contiguous_zero_returns_address_without_side_effects() {
		let mut frames = fixture();
		let before_free = frames.free_frames();
		let before_first = frames.first_free(0);
		let pfn = frames.alloc_contiguous(0).unwrap();
		assert_eq!(Some(pfn.0), before_first);
		assert_eq!(frames.free_frames(), before_free);
	}

	#[test]
	fn exhaustion_reports_out_of_frames() {
		let mut info = BootInfo::test_fixture(8, &[MemoryBlock::new(0, 8 * 1024, MemoryType::Available)]);
		let mut frames = PhysFrames::init(&mut info).unwrap();
		let total = frames.free_frames();
		for _ in 0..total {
			frames.alloc().unwrap();
		}
		assert!(matches!(frames.alloc(), Err(Error::OutOfFrames)));
	}
}
