// SPDX-License-Identifier: GPL-2.0

//! Process control blocks and the arena that owns them (§4.5, §9). The
//! arena replaces the historical C implementation's `next`-pointer linked
//! list: slots are indexed by `Pid`, a freed slot's index is recycled by
//! the next `create`, and the scheduler's ready/sleep/dead queues hold
//! `Pid`s rather than raw pointers into the arena.

use alloc::vec::Vec;

use crate::arch::x86::context::Context;
use crate::config::MAX_OPEN_FILES;
use crate::error::{Error, Result};
use crate::fs::OpenFile;
use crate::types::{PhysAddr, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Ready,
	Running,
	Blocked,
	Sleeping,
	Dead,
}

pub struct Process {
	pub pid: Pid,
	pub parent: Option<Pid>,
	pub state: ProcessState,
	pub context: Context,
	pub address_space: PhysAddr,
	pub kernel_stack: Vec<u8>,
	pub wake_at_tick: u64,
	pub exit_code: i32,
	pub open_files: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl Process {
	fn new(pid: Pid, address_space: PhysAddr, kernel_stack: Vec<u8>, context: Context) -> Self {
		const NONE_FILE: Option<OpenFile> = None;
		Self {
			pid,
			parent: None,
			state: ProcessState::Ready,
			context,
			address_space,
			kernel_stack,
			wake_at_tick: 0,
			exit_code: 0,
			open_files: [NONE_FILE; MAX_OPEN_FILES],
		}
	}
}

/// Owns every live `Process` by slot. Slot index equals `pid.0 as usize`;
/// a `Dead` process's slot is reclaimed by the next `create` once the
/// scheduler has reaped it, so pids are not unique for the lifetime of the
/// kernel, only for as long as the process they name is alive.
pub struct ProcessArena {
	slots: Vec<Option<Process>>,
	free_slots: Vec<usize>,
}

impl ProcessArena {
	pub fn new() -> Self {
		Self {
			slots: Vec::new(),
			free_slots: Vec::new(),
		}
	}

	/// Slot index and pid are always the same number (`pid.0 - 1`), so a
	/// reused slot is handed back out under the pid that used to own it
	/// rather than a freshly minted one; §9 accepts pid reuse once a
	/// process has been fully reaped.
	pub fn create(&mut self, address_space: PhysAddr, kernel_stack: Vec<u8>, context: Context) -> Pid {
		let slot = if let Some(slot) = self.free_slots.pop() {
			slot
		} else {
			let slot = self.slots.len();
			self.slots.push(None);
			slot
		};
		let pid = Pid((slot + 1) as u32);
		self.slots[slot] = Some(Process::new(pid, address_space, kernel_stack, context));
		pid
	}

	pub fn get(&self, pid: Pid) -> Option<&Process> {
		self.slots.get(self.slot_of(pid)).and_then(|s| s.as_ref())
	}

	pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
		let slot = self.slot_of(pid);
		self.slots.get_mut(slot).and_then(|s| s.as_mut())
	}

	/// Removes a `Dead` process from the arena, freeing its slot for
	/// reuse. Returns an error if the pid is unknown or the process has
	/// not yet reached `Dead`, so callers can't reap a process still on
	/// the ready or sleep queues.
	pub fn reap(&mut self, pid: Pid) -> Result<Process> {
		let slot = self.slot_of(pid);
		match self.slots.get_mut(slot) {
			Some(entry) if matches!(entry.as_ref().map(|p| p.state), Some(ProcessState::Dead)) => {
				let process = entry.take().unwrap();
				self.free_slots.push(slot);
				Ok(process)
			}
			_ => Err(Error::NotFound),
		}
	}

	fn slot_of(&self, pid: Pid) -> usize {
		(pid.0 - 1) as usize
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ctx() -> Context {
		unsafe { core::mem::zeroed() }
	}

	#[test]
	fn create_assigns_slot_plus_one_as_pid() {
		let mut arena = ProcessArena::new();
		let a = arena.create(PhysAddr::new(0x1000), Vec::new(), ctx());
		let b = arena.create(PhysAddr::new(0x2000), Vec::new(), ctx());
		assert_eq!(a, Pid(1));
		assert_eq!(b, Pid(2));
	}

	#[test]
	fn new_process_starts_ready_with_no_open_files() {
		let mut arena = ProcessArena::new();
		let pid = arena.create(PhysAddr::new(0x1000), Vec::new(), ctx());
		let process = arena.get(pid).unwrap();
		assert_eq!(process.state, ProcessState::Ready);
		assert!(process.open_files.iter().all(Option::is_none));
	}

	#[test]
	fn reap_refuses_a_process_that_is_not_dead() {
		let mut arena = ProcessArena::new();
		let pid = arena.create(PhysAddr::new(0x1000), Vec::new(), ctx());
		assert!(matches!(arena.reap(pid), Err(Error::NotFound)));
	}

	#[test]
	fn reap_frees_the_slot_for_the_next_create() {
		let mut arena = ProcessArena::new();
		let pid = arena.create(PhysAddr::new(0x1000), Vec::new(), ctx());
		arena.get_mut(pid).unwrap().state = ProcessState::Dead;
		arena.reap(pid).unwrap();
		assert!(arena.get(pid).is_none());

		let reused = arena.create(PhysAddr::new(0x3000), Vec::new(), ctx());
		assert_eq!(reused, pid);
	}

	#[test]
	fn reap_on_unknown_pid_is_not_found() {
		let mut arena = ProcessArena::new();
		assert!(matches!(arena.reap(Pid(1)), Err(Error::NotFound)));
	}
}
