// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Byte-level terminal input handling for ikigai.
//!
//! No terminal library sits between stdin and the REPL: the raw byte stream is
//! decoded by a small state machine ([`parser::InputParser`]), and arrow-key
//! bursts synthesized by mouse wheels are disambiguated from real key presses
//! by a token bucket ([`scroll::ScrollAccumulator`]).

pub mod keymap;
pub mod parser;
pub mod scroll;

pub use keymap::{ShiftKeymap, UsShiftKeymap};
pub use parser::{InputAction, InputParser};
pub use scroll::{ScrollAccumulator, ScrollDecision};
