// SPDX-License-Identifier: GPL-2.0

//! Preemptive round-robin scheduler (§4.5, §9): a ready FIFO, a dead FIFO
//! awaiting reaping, and a sleep list ordered by wake tick. Both
//! preemption (a process using up its quantum) and unblocking (a process
//! whose wait condition is satisfied) tail-append to the ready queue, so
//! neither path can starve the other - this is a deliberate departure from
//! the historical C scheduler, which inserted unblocked processes at the
//! front.

use alloc::collections::VecDeque;

use crate::arch::x86::context::{self, Context};
use crate::arch::x86::{gdt, pit};
use crate::error::{Error, Result};
use crate::process::{ProcessArena, ProcessState};
use crate::sync::Spinlock;
use crate::types::{PhysAddr, Pid};

/// Time slice, in PIT ticks, before a running process is preempted.
const QUANTUM_TICKS: u32 = 5;

pub struct Scheduler {
	arena: ProcessArena,
	ready: VecDeque<Pid>,
	dead: VecDeque<Pid>,
	sleeping: VecDeque<(Pid, u64)>,
	current: Option<Pid>,
	ticks_left: u32,
	idle_context: Context,
	reaper: Option<Pid>,
}

static SCHEDULER: Spinlock<Option<Scheduler>> = Spinlock::new(None);

/// Nestable interrupt-disable counter backing `lock`/`unlock`. Only the
/// outermost `lock` call actually executes `cli`, and only the outermost
/// matching `unlock` executes `sti`, so nested critical sections compose
/// without re-enabling interrupts prematurely.
static LOCK_DEPTH: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Disables interrupts and increments the nesting counter. Pairs with
/// `unlock`; every `lock` must have a matching `unlock`.
pub fn lock() {
	crate::arch::x86::disable_interrupts();
	LOCK_DEPTH.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
}

/// Decrements the nesting counter and re-enables interrupts only once it
/// reaches zero.
pub fn unlock() {
	if LOCK_DEPTH.fetch_sub(1, core::sync::atomic::Ordering::SeqCst) == 1 {
		crate::arch::x86::enable_interrupts();
	}
}

/// Initializes the scheduler with a single idle process represented by
/// `idle_context` (its stack is the boot stack; it never appears in any
/// queue) and wires the PIT tick callback to `on_tick`.
pub fn init() {
	*SCHEDULER.lock() = Some(Scheduler {
		arena: ProcessArena::new(),
		ready: VecDeque::new(),
		dead: VecDeque::new(),
		sleeping: VecDeque::new(),
		current: None,
		ticks_left: QUANTUM_TICKS,
		idle_context: Context::zero(),
		reaper: None,
	});
	pit::init(on_tick);
}

/// Records `pid` as the reaper process so `exit` can wake it. Called once,
/// right after spawning the reaper task during boot.
pub fn set_reaper(pid: Pid) {
	if let Some(scheduler) = SCHEDULER.lock().as_mut() {
		scheduler.reaper = Some(pid);
	}
}

/// Creates a new process in the `Ready` state and appends it to the ready
/// queue. `entry` runs on `kernel_stack` the first time the scheduler
/// switches into it.
pub fn spawn(entry: extern "C" fn() -> !, address_space: PhysAddr, mut kernel_stack: alloc::vec::Vec<u8>) -> Result<Pid> {
	let stack_top = unsafe { kernel_stack.as_mut_ptr().add(kernel_stack.len()) };
	let context = unsafe { context::spawn(entry, stack_top) };

	let mut guard = SCHEDULER.lock();
	let scheduler = guard.as_mut().ok_or(Error::InitFailed("scheduler not initialized"))?;
	let pid = scheduler.arena.create(address_space, kernel_stack, context);
	scheduler.ready.push_back(pid);
	Ok(pid)
}

pub fn current_pid() -> Option<Pid> {
	SCHEDULER.lock().as_ref().and_then(|s| s.current)
}

/// Runs `f` against the current process's control block, e.g. to reach its
/// per-process open-file table from the VFS layer. Returns `None` when
/// called with no process scheduled (early boot, before the first `spawn`).
pub fn with_current_process<R>(f: impl FnOnce(&mut crate::process::Process) -> R) -> Option<R> {
	let mut guard = SCHEDULER.lock();
	let scheduler = guard.as_mut()?;
	let pid = scheduler.current?;
	let process = scheduler.arena.get_mut(pid)?;
	Some(f(process))
}

/// Voluntarily gives up the remainder of the current quantum. Tail-appends
/// the caller to the ready queue exactly like preemption does, so a
/// process that yields repeatedly is no better or worse off than one that
/// runs to the end of its slice.
pub fn yield_now() {
	lock();
	reschedule(true);
	unlock();
}

/// Marks the current process `Blocked` and switches away from it without
/// re-appending it to the ready queue; some other path (`unblock`) must
/// move it back to `Ready` or it sleeps forever.
pub fn block_current() {
	lock();
	if let Some(pid) = current_pid() {
		if let Some(scheduler) = SCHEDULER.lock().as_mut() {
			if let Some(process) = scheduler.arena.get_mut(pid) {
				process.state = ProcessState::Blocked;
			}
		}
	}
	reschedule(false);
	unlock();
}

/// Moves `pid` from `Blocked`/`Sleeping` to `Ready` and tail-appends it to
/// the ready queue. Per §9's resolved ordering question, this uses the
/// same tail-append as preemption: a process unblocked just before its
/// waker's quantum expires does not jump ahead of processes that have
/// been ready longer.
pub fn unblock(pid: Pid) {
	let mut guard = SCHEDULER.lock();
	if let Some(scheduler) = guard.as_mut() {
		if let Some(process) = scheduler.arena.get_mut(pid) {
			if process.state == ProcessState::Blocked || process.state == ProcessState::Sleeping {
				process.state = ProcessState::Ready;
				scheduler.ready.push_back(pid);
			}
		}
	}
}

/// Puts the current process to sleep until `pit::ticks() >= wake_at`.
pub fn sleep_until(wake_at: u64) {
	lock();
	if let Some(pid) = current_pid() {
		if let Some(scheduler) = SCHEDULER.lock().as_mut() {
			if let Some(process) = scheduler.arena.get_mut(pid) {
				process.state = ProcessState::Sleeping;
				process.wake_at_tick = wake_at;
			}
			scheduler.sleeping.push_back((pid, wake_at));
		}
	}
	reschedule(false);
	unlock();
}

/// Marks the current process `Dead` with `code`, moves it to the dead
/// queue for the reaper, and never returns.
pub fn exit(code: i32) -> ! {
	lock();
	let reaper = if let Some(pid) = current_pid() {
		let mut guard = SCHEDULER.lock();
		let scheduler = guard.as_mut();
		let reaper = scheduler.as_ref().and_then(|s| s.reaper);
		if let Some(scheduler) = scheduler {
			if let Some(process) = scheduler.arena.get_mut(pid) {
				process.state = ProcessState::Dead;
				process.exit_code = code;
			}
			scheduler.dead.push_back(pid);
		}
		reaper
	} else {
		None
	};
	if let Some(reaper) = reaper {
		unblock(reaper);
	}
	reschedule(false);
	unreachable!("exited process resumed")
}

/// Reaps one dead process, if any, returning its pid and exit code, and
/// frees its address space via the memory subsystem. The kernel stack is
/// freed by `Process`'s own `Vec<u8>` drop once the returned value goes
/// out of scope.
pub fn reap_one() -> Option<(Pid, i32)> {
	let pid = SCHEDULER.lock().as_mut()?.dead.pop_front()?;
	let process = SCHEDULER.lock().as_mut()?.arena.reap(pid).ok()?;
	let exit_code = process.exit_code;

	let memory = crate::kernel().memory();
	let mut frames = memory.frames.lock();
	crate::memory::VirtMemory::destroy_address_space(process.address_space, &mut frames);

	Some((pid, exit_code))
}

fn on_tick() {
	let now = pit::ticks();
	let mut woken = alloc::vec::Vec::new();
	if let Some(scheduler) = SCHEDULER.lock().as_mut() {
		let mut remaining = VecDeque::new();
		while let Some((pid, wake_at)) = scheduler.sleeping.pop_front() {
			if wake_at <= now {
				woken.push((pid, wake_at));
			} else {
				remaining.push_back((pid, wake_at));
			}
		}
		scheduler.sleeping = remaining;
	}
	// Unblock in wake-tick order, not arrival order: a tick that finds
	// several sleepers already due (e.g. after the kernel was stopped for
	// a while) must wake the earliest-due one first.
	woken.sort_by_key(|&(_, wake_at)| wake_at);
	for (pid, _) in woken {
		unblock(pid);
	}

	let expired = match SCHEDULER.lock().as_mut() {
		Some(scheduler) if scheduler.current.is_some() => {
			scheduler.ticks_left = scheduler.ticks_left.saturating_sub(1);
			scheduler.ticks_left == 0
		}
		_ => false,
	};
	if expired {
		reschedule(true);
	}
}

/// Picks the next ready process and switches to it. `requeue_current`
/// controls whether the outgoing process (if still `Running`) goes back
/// on the ready queue: preemption and `yield_now` requeue it, while
/// blocking, sleeping and exiting do not, since those paths already moved
/// it to a different queue.
fn reschedule(requeue_current: bool) {
	let (old_context, new_context): (*mut Context, *const Context) = {
		let mut guard = SCHEDULER.lock();
		let scheduler = match guard.as_mut() {
			Some(s) => s,
			None => return,
		};

		let next_pid = scheduler.ready.pop_front();
		let old_pid = scheduler.current;

		if requeue_current {
			if let Some(pid) = old_pid {
				if let Some(process) = scheduler.arena.get_mut(pid) {
					if process.state == ProcessState::Running {
						process.state = ProcessState::Ready;
					}
				}
				scheduler.ready.push_back(pid);
			}
		}

		let old_ctx_ptr: *mut Context = match old_pid.and_then(|pid| scheduler.arena.get_mut(pid)) {
			Some(process) => &mut process.context as *mut Context,
			None => &mut scheduler.idle_context as *mut Context,
		};

		let new_ctx_ptr: *const Context = match next_pid.and_then(|pid| scheduler.arena.get_mut(pid)) {
			Some(process) => {
				process.state = ProcessState::Running;
				let stack_top = unsafe { process.kernel_stack.as_mut_ptr().add(process.kernel_stack.len()) };
				unsafe {
					gdt::set_kernel_stack(stack_top as u32);
				}
				&process.context as *const Context
			}
			None => &scheduler.idle_context as *const Context,
		};

		scheduler.current = next_pid;
		scheduler.ticks_left = QUANTUM_TICKS;

		(old_ctx_ptr, new_ctx_ptr)
	};

	if !core::ptr::eq(old_context as *const Context, new_context) {
		unsafe {
			context::switch_context(old_context, new_context);
		}
	}
}

/// Runs on the idle context when no process is ready: halts until the
/// next interrupt instead of spinning.
pub fn idle_loop() -> ! {
	loop {
		crate::arch::x86::halt_once();
		reschedule(false);
	}
}

/// The reaper: a kernel process that drains the dead queue, freeing each
/// process's address space, then blocks until `unblock`d by the next
/// `exit`. Spawned once during init; never appears in `dead`.
pub extern "C" fn reaper_task() -> ! {
	loop {
		while reap_one().is_some() {}
		block_current();
	}
}

/// Blocking mutex for use by processes, as distinct from `sync::Spinlock`
/// which busy-waits and is meant for short, interrupt-unsafe critical
/// sections. Ownership is recursive (the owner may re-acquire without
/// deadlocking itself) and release hands the mutex directly to the
/// longest-waiting blocked process rather than waking every waiter to
/// race for it.
pub struct KMutex {
	state: Spinlock<KMutexState>,
}

struct KMutexState {
	owner: Option<Pid>,
	depth: u32,
	waiters: VecDeque<Pid>,
}

/// What a `lock()` attempt should do next, decided by `try_acquire` against
/// the mutex's state alone (no scheduler or hardware access) so the FIFO
/// handoff logic can be exercised directly in tests.
#[derive(Debug, PartialEq, Eq)]
enum LockStep {
	Acquired,
	MustBlock,
}

/// Pure decision for one iteration of `KMutex::lock`'s loop. `woken_via_handoff`
/// must be `true` only once this caller has itself taken the `MustBlock` path
/// and been resumed - that is what distinguishes a process that just received
/// ownership via `release`'s FIFO transfer (owner already set, depth untouched)
/// from a genuine re-entrant call by an owner that never blocked.
fn try_acquire(state: &mut KMutexState, pid: Option<Pid>, woken_via_handoff: bool) -> LockStep {
	match state.owner {
		Some(owner) if Some(owner) == pid => {
			if !woken_via_handoff {
				state.depth += 1;
			}
			LockStep::Acquired
		}
		None => {
			state.owner = pid;
			state.depth = 0;
			LockStep::Acquired
		}
		Some(_) => {
			if let Some(pid) = pid {
				state.waiters.push_back(pid);
			}
			LockStep::MustBlock
		}
	}
}

/// What `unlock()` should do once it holds the state lock: either the caller
/// keeps ownership (recursive release), or ownership is handed to the named
/// waiter (who must be woken), or the mutex goes idle.
#[derive(Debug, PartialEq, Eq)]
enum ReleaseStep {
	StillOwned,
	HandedTo(Pid),
	WentIdle,
}

/// Pure decision for `KMutex::unlock`, given the caller already owns the
/// mutex. Hands off to the longest-waiting process (FIFO) rather than
/// waking every waiter to race for it.
fn release(state: &mut KMutexState) -> ReleaseStep {
	if state.depth > 0 {
		state.depth -= 1;
		return ReleaseStep::StillOwned;
	}
	match state.waiters.pop_front() {
		Some(next_owner) => {
			state.owner = Some(next_owner);
			ReleaseStep::HandedTo(next_owner)
		}
		None => {
			state.owner = None;
			ReleaseStep::WentIdle
		}
	}
}

impl KMutex {
	pub const fn new() -> Self {
		Self {
			state: Spinlock::new(KMutexState {
				owner: None,
				depth: 0,
				waiters: VecDeque::new(),
			}),
		}
	}

	/// Acquires the mutex, blocking the calling process if another process
	/// already holds it. A process already holding the mutex may call this
	/// again and must call `unlock` the same number of times.
	pub fn lock(&self) {
		let pid = current_pid();
		let mut woken_via_handoff = false;
		loop {
			let mut state = self.state.lock();
			match try_acquire(&mut state, pid, woken_via_handoff) {
				LockStep::Acquired => return,
				LockStep::MustBlock => {
					drop(state);
					block_current();
					// Woken either because `unlock` handed us ownership, or
					// spuriously; loop re-evaluates either way.
					woken_via_handoff = true;
				}
			}
		}
	}

	/// Releases the mutex. If the caller had recursively acquired it, this
	/// only decrements the recursion depth. The final release hands
	/// ownership straight to the next FIFO waiter, if any, and wakes it;
	/// with no waiters, the mutex goes idle.
	///
	/// Logs and does nothing if called by a process that is not the
	/// current owner, mirroring the historical implementation's guard
	/// against misuse rather than panicking.
	pub fn unlock(&self) {
		let pid = current_pid();
		let mut state = self.state.lock();
		if state.owner != pid {
			crate::error!("process tried to release a mutex it does not own");
			return;
		}
		match release(&mut state) {
			ReleaseStep::StillOwned | ReleaseStep::WentIdle => {}
			ReleaseStep::HandedTo(next_owner) => {
				drop(state);
				unblock(next_owner);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn state() -> KMutexState {
		KMutexState {
			owner: None,
			depth: 0,
			waiters: VecDeque::new(),
		}
	}

	#[test]
	fn scenario_c_mutex_fifo_handoff_orders_waiters_by_arrival() {
		let (p0, p1, p2) = (Pid(0), Pid(1), Pid(2));
		let mut s = state();

		// P0 acquires uncontended.
		assert_eq!(try_acquire(&mut s, Some(p0), false), LockStep::Acquired);
		assert_eq!(s.owner, Some(p0));
		assert_eq!(s.depth, 0);

		// P1 and P2 arrive while P0 holds it and queue up in arrival order.
		assert_eq!(try_acquire(&mut s, Some(p1), false), LockStep::MustBlock);
		assert_eq!(try_acquire(&mut s, Some(p2), false), LockStep::MustBlock);
		assert_eq!(s.waiters.iter().copied().collect::<alloc::vec::Vec<_>>(), alloc::vec![p1, p2]);

		// P0 releases: ownership transfers straight to P1 (FIFO), depth is
		// untouched by the transfer itself.
		assert_eq!(release(&mut s), ReleaseStep::HandedTo(p1));
		assert_eq!(s.owner, Some(p1));
		assert_eq!(s.depth, 0);

		// P1 resumes inside its own `lock()` loop and re-evaluates with
		// `woken_via_handoff = true`: this must NOT be treated as a
		// recursive re-acquire, or its matching `unlock` would leave P2
		// waiting forever.
		assert_eq!(try_acquire(&mut s, Some(p1), true), LockStep::Acquired);
		assert_eq!(s.depth, 0);

		// P1 releases once: since depth is 0, this must hand off to P2, not
		// just decrement depth and return with P2 still queued.
		assert_eq!(release(&mut s), ReleaseStep::HandedTo(p2));
		assert_eq!(s.owner, Some(p2));
		assert!(s.waiters.is_empty());
	}

	#[test]
	fn recursive_reacquire_by_the_current_owner_increments_depth() {
		let p0 = Pid(0);
		let mut s = state();
		assert_eq!(try_acquire(&mut s, Some(p0), false), LockStep::Acquired);
		assert_eq!(try_acquire(&mut s, Some(p0), false), LockStep::Acquired);
		assert_eq!(s.depth, 1);
		assert_eq!(release(&mut s), ReleaseStep::StillOwned);
		assert_eq!(s.depth, 0);
		assert_eq!(release(&mut s), ReleaseStep::WentIdle);
		assert_eq!(s.owner, None);
	}

	#[test]
	fn scenario_d_sleep_list_wakes_in_wake_tick_order() {
		let mut scheduler = Scheduler {
			arena: ProcessArena::new(),
			ready: VecDeque::new(),
			dead: VecDeque::new(),
			sleeping: VecDeque::new(),
			current: None,
			ticks_left: QUANTUM_TICKS,
			idle_context: Context::zero(),
			reaper: None,
		};

		let p_late = scheduler.arena.create(PhysAddr::new(0), alloc::vec::Vec::new(), Context::zero());
		let p_early = scheduler.arena.create(PhysAddr::new(0), alloc::vec::Vec::new(), Context::zero());
		let p_mid = scheduler.arena.create(PhysAddr::new(0), alloc::vec::Vec::new(), Context::zero());
		for pid in [p_late, p_early, p_mid] {
			if let Some(process) = scheduler.arena.get_mut(pid) {
				process.state = ProcessState::Sleeping;
			}
		}
		// Pushed out of wake-tick order; on_tick must still wake them
		// earliest-wake-tick first once all three are due.
		scheduler.sleeping.push_back((p_late, 30));
		scheduler.sleeping.push_back((p_early, 10));
		scheduler.sleeping.push_back((p_mid, 20));

		*SCHEDULER.lock() = Some(scheduler);
		pit::advance_ticks_for_test(30);

		on_tick();

		let guard = SCHEDULER.lock();
		let scheduler = guard.as_ref().unwrap();
		assert!(scheduler.sleeping.is_empty());
		for pid in [p_late, p_early, p_mid] {
			assert_eq!(scheduler.arena.get(pid).unwrap().state, ProcessState::Ready);
		}
		let order: alloc::vec::Vec<Pid> = scheduler.ready.iter().copied().collect();
		assert_eq!(order, alloc::vec![p_early, p_mid, p_late]);
	}
}
