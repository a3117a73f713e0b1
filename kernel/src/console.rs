// SPDX-License-Identifier: GPL-2.0

//! Console and kernel output: VGA text buffer, COM1 serial mirror, the
//! Bochs/QEMU debug port (0xE9, reserved fd 3), and a blocking keyboard
//! `getchar` fed by the keyboard IRQ handler.

use core::fmt::{self, Write};

use crate::error::Result;
use crate::sync::Spinlock;

/// Console writer
static CONSOLE: Spinlock<Console> = Spinlock::new(Console::new());

/// One-byte mailbox fed by the keyboard IRQ handler; `getchar` spins on it.
static KEY_QUEUE: Spinlock<KeyQueue> = Spinlock::new(KeyQueue::new());

/// VGA text mode colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
	Black = 0,
	Blue = 1,
	Green = 2,
	Cyan = 3,
	Red = 4,
	Magenta = 5,
	Brown = 6,
	LightGray = 7,
	DarkGray = 8,
	LightBlue = 9,
	LightGreen = 10,
	LightCyan = 11,
	LightRed = 12,
	Pink = 13,
	Yellow = 14,
	White = 15,
}

/// VGA text mode color code combining foreground and background colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
	const fn new(foreground: Color, background: Color) -> ColorCode {
		ColorCode((background as u8) << 4 | (foreground as u8))
	}
}

/// VGA text mode screen character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
	ascii_character: u8,
	color_code: ColorCode,
}

/// VGA text mode buffer dimensions
const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

/// VGA text mode buffer structure
#[repr(transparent)]
struct Buffer {
	chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

struct Console {
	initialized: bool,
	vga_buffer: Option<&'static mut Buffer>,
	column_position: usize,
	color_code: ColorCode,
}

impl Console {
	const fn new() -> Self {
		Self {
			initialized: false,
			vga_buffer: None,
			column_position: 0,
			color_code: ColorCode::new(Color::LightGray, Color::Black),
		}
	}

	fn init(&mut self) -> Result<()> {
		self.vga_buffer = Some(unsafe { &mut *(crate::config::VGA_BUFFER_PHYS as *mut Buffer) });
		self.init_serial();
		self.clear_screen();
		self.initialized = true;
		Ok(())
	}

	fn init_serial(&self) {
		unsafe {
			core::arch::asm!("out dx, al", in("dx") 0x3F9u16, in("al") 0x00u8);
			core::arch::asm!("out dx, al", in("dx") 0x3FBu16, in("al") 0x80u8);
			core::arch::asm!("out dx, al", in("dx") 0x3F8u16, in("al") 0x03u8);
			core::arch::asm!("out dx, al", in("dx") 0x3F9u16, in("al") 0x00u8);
			core::arch::asm!("out dx, al", in("dx") 0x3FBu16, in("al") 0x03u8);
			core::arch::asm!("out dx, al", in("dx") 0x3FCu16, in("al") 0xC7u8);
			core::arch::asm!("out dx, al", in("dx") 0x3FEu16, in("al") 0x0Bu8);
		}
	}

	fn clear_screen(&mut self) {
		if let Some(ref mut buffer) = self.vga_buffer {
			let blank = ScreenChar {
				ascii_character: b' ',
				color_code: self.color_code,
			};
			for row in 0..BUFFER_HEIGHT {
				for col in 0..BUFFER_WIDTH {
					unsafe {
						core::ptr::write_volatile(&mut buffer.chars[row][col] as *mut ScreenChar, blank);
					}
				}
			}
		}
		self.column_position = 0;
	}

	pub fn write_str(&mut self, s: &str) {
		if !self.initialized {
			return;
		}
		for byte in s.bytes() {
			self.write_byte(byte);
		}
	}

	fn write_byte(&mut self, byte: u8) {
		self.write_serial(byte);

		match byte {
			b'\n' => self.new_line(),
			byte => {
				if self.column_position >= BUFFER_WIDTH {
					self.new_line();
				}
				if let Some(ref mut buffer) = self.vga_buffer {
					let row = BUFFER_HEIGHT - 1;
					let col = self.column_position;
					let color_code = self.color_code;
					unsafe {
						core::ptr::write_volatile(
							&mut buffer.chars[row][col] as *mut ScreenChar,
							ScreenChar {
								ascii_character: byte,
								color_code,
							},
						);
					}
				}
				self.column_position += 1;
			}
		}
	}

	fn write_serial(&self, byte: u8) {
		unsafe {
			loop {
				let mut status: u8;
				core::arch::asm!("in al, dx", out("al") status, in("dx") 0x3FDu16);
				if (status & 0x20) != 0 {
					break;
				}
			}
			core::arch::asm!("out dx, al", in("dx") 0x3F8u16, in("al") byte);
		}
	}

	fn new_line(&mut self) {
		if let Some(ref mut buffer) = self.vga_buffer {
			for row in 1..BUFFER_HEIGHT {
				for col in 0..BUFFER_WIDTH {
					unsafe {
						let character = core::ptr::read_volatile(&buffer.chars[row][col] as *const ScreenChar);
						core::ptr::write_volatile(&mut buffer.chars[row - 1][col] as *mut ScreenChar, character);
					}
				}
			}
			let blank = ScreenChar {
				ascii_character: b' ',
				color_code: self.color_code,
			};
			for col in 0..BUFFER_WIDTH {
				unsafe {
					core::ptr::write_volatile(&mut buffer.chars[BUFFER_HEIGHT - 1][col] as *mut ScreenChar, blank);
				}
			}
		}
		self.column_position = 0;
	}
}

/// Initialize console
pub fn init() -> Result<()> {
	let mut console = CONSOLE.lock();
	console.init()
}

/// Print function for kernel output
pub fn _print(args: fmt::Arguments) {
	let mut console = CONSOLE.lock();
	let mut writer = ConsoleWriter(&mut console);
	writer.write_fmt(args).ok();
}

/// Print function for kernel messages with prefix
pub fn _kprint(args: fmt::Arguments) {
	let mut console = CONSOLE.lock();
	let mut writer = ConsoleWriter(&mut console);
	writer.write_fmt(args).ok();
}

/// Write string to console
pub fn write_str(s: &str) {
	let mut console = CONSOLE.lock();
	console.write_str(s);
}

/// Clear the console screen
pub fn clear() {
	let mut console = CONSOLE.lock();
	console.clear_screen();
}

struct ConsoleWriter<'a>(&'a mut Console);

impl Write for ConsoleWriter<'_> {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.0.write_str(s);
		Ok(())
	}
}

/// Writes a single byte to the Bochs/QEMU debug port (0xE9). Reserved fd 3
/// bypasses the vnode layer and writes through this sink, per §4.7.
pub fn debug_write(bytes: &[u8]) -> usize {
	unsafe {
		for &b in bytes {
			core::arch::asm!("out dx, al", in("dx") crate::config::DEBUG_PORT, in("al") b);
		}
	}
	bytes.len()
}

struct KeyQueue {
	byte: Option<u8>,
}

impl KeyQueue {
	const fn new() -> Self {
		Self { byte: None }
	}
}

/// Called by the keyboard IRQ handler (IRQ1) once scancode translation has
/// produced a printable byte.
pub fn push_key(byte: u8) {
	KEY_QUEUE.lock().byte = Some(byte);
}

/// Blocking read of one character from the keyboard. Spins until the IRQ
/// handler deposits a byte; callers running under the scheduler should favor
/// yielding rather than busy-waiting once multitasking is enabled, but the
/// raw primitive here makes no such assumption — it is the architecture
/// collaborator's character-input sink referenced in §1.
pub fn getchar() -> u8 {
	loop {
		if let Some(byte) = KEY_QUEUE.lock().byte.take() {
			return byte;
		}
		core::hint::spin_loop();
	}
}
