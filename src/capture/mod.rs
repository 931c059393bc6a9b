// SPDX-License-Identifier: GPL-3.0-only

//! Background capture machinery
//!
//! - [`frame_loop`]: cooperative thread lifecycle shared by every loop
//! - [`pump`]: per-session frame pump publishing the latest frame

pub mod frame_loop;
pub mod pump;

pub use frame_loop::{LoopAction, LoopController, StopSignal};
pub use pump::{FramePump, FrameSlot, FrameSource};
