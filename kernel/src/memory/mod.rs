// SPDX-License-Identifier: GPL-2.0

//! Memory management: frame allocator, paging, kernel heap and the
//! virtual-page allocator (§4.1-§4.4), plus the `#[global_allocator]`
//! that routes `alloc`'s `Box`/`Vec`/etc onto `Heap`.

pub mod heap;
pub mod phys;
pub mod valloc;
pub mod virt;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

pub use heap::Heap;
pub use phys::PhysFrames;
pub use valloc::VAlloc;
pub use virt::{PageFlags, VirtMemory};

use crate::boot::BootInfo;
use crate::error::Result;
use crate::sync::Spinlock;

/// Everything below `init` owns, behind one lock each so the pieces can be
/// taken and released independently (the heap's own `alloc`/`free` need
/// `PhysFrames`+`VirtMemory` to grow, so a single combined lock would
/// deadlock on reentry).
pub struct Memory {
	pub frames: Spinlock<PhysFrames>,
	pub virt: Spinlock<VirtMemory>,
	pub heap: Spinlock<Heap>,
	pub valloc: Spinlock<VAlloc>,
}

impl Memory {
	/// Brings up the memory subsystem in the order §2's data flow
	/// requires: frame bitmap, then paging (which consumes frames to build
	/// its own tables and enables the MMU), then the heap and vmalloc
	/// windows (which consume both).
	///
	/// # Safety
	/// Must run exactly once, before any code allocates from the heap.
	pub unsafe fn init(boot_info: &mut BootInfo) -> Result<Self> {
		let mut frames = PhysFrames::init(boot_info)?;
		let mut virt = VirtMemory::init(&mut frames)?;
		let mut heap = Heap::new();
		heap.init(&mut virt, &mut frames)?;
		let valloc = VAlloc::new();

		Ok(Self {
			frames: Spinlock::new(frames),
			virt: Spinlock::new(virt),
			heap: Spinlock::new(heap),
			valloc: Spinlock::new(valloc),
		})
	}
}

struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let memory = crate::kernel().memory();
		let mut heap = memory.heap.lock();
		let mut virt = memory.virt.lock();
		let mut frames = memory.frames.lock();
		match heap.alloc(layout.size(), &mut virt, &mut frames) {
			Ok(ptr) => ptr.as_ptr(),
			Err(_) => core::ptr::null_mut(),
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
		if let Some(ptr) = NonNull::new(ptr) {
			let memory = crate::kernel().memory();
			memory.heap.lock().free(ptr);
		}
	}
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
	panic!("heap allocation failed: {} bytes, align {}", layout.size(), layout.align());
}
