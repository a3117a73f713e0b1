// SPDX-License-Identifier: GPL-2.0

//! Architecture collaborator (§4.9): the only part of the kernel that
//! speaks directly to the CPU and the 8259/8253/GDT/IDT. Everything above
//! this module works in terms of `Registers`, `register_handler` and
//! `register_irq`.

pub mod x86;
