// SPDX-License-Identifier: GPL-2.0

//! Kernel-virtual memory map and the handful of table-size constants used
//! across the memory and VFS layers, collected in one place instead of
//! scattered as magic numbers at each call site.

use crate::types::VirtAddr;

/// Identity-mapped low 4 MiB: 0x00000000-0x003FFFFF.
pub const IDENTITY_MAP_END: VirtAddr = VirtAddr::new(0x0040_0000);

/// Reserved scratch window for transient user-binary staging (§4.5 spawn
/// trampoline reads a user entry here before dropping to ring 3).
pub const USER_SCRATCH_BASE: VirtAddr = VirtAddr::new(0x0040_0000);
pub const USER_SCRATCH_END: VirtAddr = VirtAddr::new(0x0080_0000);

/// Kernel physical window: 0xC0000000-0xC03FFFFF maps phys 0x100000-0x500000.
pub const KERNEL_PHYS_WINDOW_BASE: VirtAddr = VirtAddr::new(0xC000_0000);
pub const KERNEL_PHYS_WINDOW_END: VirtAddr = VirtAddr::new(0xC040_0000);

/// Kernel heap window: 0xD0000000-0xD7FFFFFF.
pub const HEAP_START: VirtAddr = VirtAddr::new(0xD000_0000);
pub const HEAP_END: VirtAddr = VirtAddr::new(0xD800_0000);

/// vmalloc window: 0xD8000000-0xDFFFFFFF.
pub const VALLOC_START: VirtAddr = VirtAddr::new(0xD800_0000);
pub const VALLOC_END: VirtAddr = VirtAddr::new(0xE000_0000);

/// Page-table recursive window: 0xFFC00000-0xFFFFEFFF.
pub const RECURSIVE_TABLES_BASE: VirtAddr = VirtAddr::new(0xFFC0_0000);
/// Page-directory self-view: 0xFFFFF000-0xFFFFFFFF.
pub const RECURSIVE_DIR: VirtAddr = VirtAddr::new(0xFFFF_F000);

/// Index of the recursive self-map PDE (PDE[1023]).
pub const RECURSIVE_PDE: usize = 1023;
/// Scratch PDE used to map a not-yet-active page directory into the
/// current address space while `VirtMemory::new_address_space` populates
/// its shared kernel entries.
pub const TEMP_PD_PDE: usize = 1022;
pub const TEMP_PD_WINDOW: VirtAddr = VirtAddr::new(TEMP_PD_PDE << 22);
/// Index of the first PDE of the shared kernel-physical window (PDE[768]).
pub const KERNEL_WINDOW_PDE: usize = 768;
/// First PDE index that is user-private in every address space (PDE[1..767]).
pub const USER_PDE_RANGE: core::ops::Range<usize> = 1..768;

/// Maximum number of filesystem drivers `Vfs::register` will hold.
pub const VFS_MAX_FS: usize = 4;
/// Per-filesystem bounded vnode cache size (FAT12 §4.8).
pub const VFS_MAX_PER_VFS: usize = 128;
/// Per-process open-file table size, including the four reserved slots.
pub const MAX_OPEN_FILES: usize = 32;

/// Reserved file descriptors (§6).
pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;
pub const FD_STDERR: usize = 2;
pub const FD_DEBUG: usize = 3;
pub const FIRST_DYNAMIC_FD: usize = 4;

/// VGA text frame buffer physical base.
pub const VGA_BUFFER_PHYS: usize = 0xB8000;

/// FDC I/O ports.
pub const FDC_DOR: u16 = 0x3F2;
pub const FDC_MSR: u16 = 0x3F4;
pub const FDC_FIFO: u16 = 0x3F5;
pub const FDC_CCR: u16 = 0x3F7;

/// ISA DMA channel 2 register bases.
pub const DMA_MASTER_BASE: u16 = 0xC0;
pub const DMA_SLAVE_BASE: u16 = 0x00;
pub const DMA_PAGE_BASE: u16 = 0x81;

/// Debug character sink (Bochs/QEMU "port E9 hack").
pub const DEBUG_PORT: u16 = 0xE9;

/// 1.44 MiB floppy geometry.
pub const FLOPPY_SECTORS_PER_TRACK: u32 = 18;
pub const FLOPPY_HEADS: u32 = 2;
pub const FLOPPY_TOTAL_SECTORS: u32 = 2880;

/// ISA DMA requires its buffer below the 16 MiB line.
pub const ISA_DMA_LIMIT: usize = 0x0100_0000;

/// Fixed kernel-virtual alias for the floppy DMA buffer, mapped onto
/// whatever <16 MiB physical frames `Fdc::init` allocates. Sits just below
/// the heap window so it never collides with a heap break growing upward.
pub const DMA_BUFFER_VIRT: VirtAddr = VirtAddr::new(0xCFFF_C000);
/// One track (18 sectors * 512 bytes = 9216 bytes) rounded up to whole pages.
pub const DMA_BUFFER_PAGES: usize = 4;

/// Kernel-mode task stack size (§4.5 `create`: "allocate a one-page stack";
/// widened here since the floppy/VFS call chain nests deeper than a single
/// page comfortably allows).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
