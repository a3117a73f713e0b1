// SPDX-License-Identifier: GPL-2.0

//! Device drivers (§4.6): ISA DMA channel programming and the floppy disk
//! controller that sits on top of it.

pub mod dma;
pub mod fdc;

pub use fdc::Fdc;
