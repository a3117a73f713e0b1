// SPDX-License-Identifier: GPL-2.0

//! Interrupts collaborator (§4.9): the architecture-neutral face of the
//! arch layer's vector dispatch. Everything outside `arch::x86` reaches
//! interrupt registration through here rather than naming the arch module
//! directly.

pub use crate::arch::x86::{disable, enable, register_handler, register_irq, Handler, Registers};
