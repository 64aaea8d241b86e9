// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Byte-level terminal input state machine.
//!
//! Decodes the raw stdin byte stream into editing actions: UTF-8 reassembly,
//! CSI arrow/tilde sequences, CSI-u key reports, and mouse SGR scroll events.
//! The machine performs no I/O; each byte either produces an action, is
//! swallowed as part of an incomplete sequence, or resets the state with
//! `Unknown`.

use crate::keymap::{ShiftKeymap, UsShiftKeymap};

/// Escape-sequence buffer capacity.  Overflow resets to ground.
const ESC_BUF_CAP: usize = 32;

/// Alacritty reports bare modifier presses as CSI-u keycodes above this.
const MODIFIER_NOISE_KEYCODE: u32 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Char(char),
    /// Submit the current line.
    Newline,
    /// Modified Enter: insert a literal newline into the buffer.
    InsertNewline,
    Backspace,
    Tab,
    Escape,
    CtrlC,
    ArrowUp,
    ArrowDown,
    ArrowRight,
    ArrowLeft,
    Delete,
    PageUp,
    PageDown,
    ScrollUp,
    ScrollDown,
    /// Discarded or unrecognized input.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    /// Collecting UTF-8 continuation bytes.
    Utf8Tail,
    /// Saw ESC, waiting for the introducer byte.
    EscOpen,
    /// Accumulating a CSI sequence (buffer starts at the `[`).
    CsiAccum,
}

pub struct InputParser {
    state: State,
    esc_buf: [u8; ESC_BUF_CAP],
    esc_len: usize,
    utf8_buf: [u8; 4],
    utf8_len: usize,
    utf8_need: usize,
    keymap: Box<dyn ShiftKeymap + Send>,
}

impl Default for InputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InputParser {
    pub fn new() -> Self {
        Self::with_keymap(Box::new(UsShiftKeymap))
    }

    pub fn with_keymap(keymap: Box<dyn ShiftKeymap + Send>) -> Self {
        Self {
            state: State::Ground,
            esc_buf: [0; ESC_BUF_CAP],
            esc_len: 0,
            utf8_buf: [0; 4],
            utf8_len: 0,
            utf8_need: 0,
            keymap,
        }
    }

    /// Feed one byte; `None` means the byte was swallowed by an incomplete
    /// sequence and more input is needed.
    pub fn feed(&mut self, byte: u8) -> Option<InputAction> {
        match self.state {
            State::Ground => self.feed_ground(byte),
            State::Utf8Tail => self.feed_utf8(byte),
            State::EscOpen => self.feed_esc_open(byte),
            State::CsiAccum => self.feed_csi(byte),
        }
    }

    /// Feed a whole buffer, collecting every produced action.
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<InputAction> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    fn reset(&mut self) {
        self.state = State::Ground;
        self.esc_len = 0;
        self.utf8_len = 0;
        self.utf8_need = 0;
    }

    // ── Ground ────────────────────────────────────────────────────────────────

    fn feed_ground(&mut self, byte: u8) -> Option<InputAction> {
        match byte {
            0x1B => {
                self.state = State::EscOpen;
                None
            }
            b'\r' | b'\n' => Some(InputAction::Newline),
            0x7F => Some(InputAction::Backspace),
            0x03 => Some(InputAction::CtrlC),
            b'\t' => Some(InputAction::Tab),
            0x20..=0x7E => Some(InputAction::Char(byte as char)),
            0xC2..=0xDF => self.start_utf8(byte, 1),
            0xE0..=0xEF => self.start_utf8(byte, 2),
            0xF0..=0xF4 => self.start_utf8(byte, 3),
            _ => Some(InputAction::Unknown),
        }
    }

    fn start_utf8(&mut self, lead: u8, tail: usize) -> Option<InputAction> {
        self.utf8_buf[0] = lead;
        self.utf8_len = 1;
        self.utf8_need = tail;
        self.state = State::Utf8Tail;
        None
    }

    fn feed_utf8(&mut self, byte: u8) -> Option<InputAction> {
        if !(0x80..=0xBF).contains(&byte) {
            self.reset();
            return Some(InputAction::Unknown);
        }
        self.utf8_buf[self.utf8_len] = byte;
        self.utf8_len += 1;
        if self.utf8_len < self.utf8_need + 1 {
            return None;
        }
        let bytes = &self.utf8_buf[..self.utf8_len];
        let action = match std::str::from_utf8(bytes) {
            Ok(s) => s.chars().next().map(InputAction::Char).unwrap_or(InputAction::Unknown),
            Err(_) => InputAction::Unknown,
        };
        self.reset();
        Some(action)
    }

    // ── Escape ────────────────────────────────────────────────────────────────

    fn feed_esc_open(&mut self, byte: u8) -> Option<InputAction> {
        match byte {
            b'[' => {
                self.state = State::CsiAccum;
                self.esc_buf[0] = b'[';
                self.esc_len = 1;
                None
            }
            // Double ESC: the first one was a bare Escape press; stay armed
            // for a sequence after the second.
            0x1B => Some(InputAction::Escape),
            _ => {
                self.reset();
                Some(InputAction::Unknown)
            }
        }
    }

    fn feed_csi(&mut self, byte: u8) -> Option<InputAction> {
        if self.esc_len >= ESC_BUF_CAP - 1 {
            self.reset();
            return Some(InputAction::Unknown);
        }
        self.esc_buf[self.esc_len] = byte;
        self.esc_len += 1;

        if let Some(action) = self.match_arrow(byte) {
            self.reset();
            return Some(action);
        }
        if let Some(action) = self.match_mouse_sgr(byte) {
            self.reset();
            return Some(action);
        }
        if let Some(action) = self.match_tilde(byte) {
            self.reset();
            return Some(action);
        }
        if byte == b'u' {
            let action = self.parse_csi_u();
            self.reset();
            return Some(action);
        }
        if self.is_discardable_terminal(byte) {
            self.reset();
            return Some(InputAction::Unknown);
        }
        // ESC [ <letter> with a letter that is not an arrow: complete but
        // unrecognized.
        if self.esc_len == 2 && byte.is_ascii_uppercase() {
            self.reset();
            return Some(InputAction::Unknown);
        }
        None
    }

    /// ESC [ A/B/C/D
    fn match_arrow(&self, byte: u8) -> Option<InputAction> {
        if self.esc_len != 2 {
            return None;
        }
        match byte {
            b'A' => Some(InputAction::ArrowUp),
            b'B' => Some(InputAction::ArrowDown),
            b'C' => Some(InputAction::ArrowRight),
            b'D' => Some(InputAction::ArrowLeft),
            _ => None,
        }
    }

    /// ESC [ < button ; col ; row M/m — only wheel buttons matter.
    fn match_mouse_sgr(&self, byte: u8) -> Option<InputAction> {
        if self.esc_len < 2 || self.esc_buf[1] != b'<' {
            return None;
        }
        if byte != b'M' && byte != b'm' {
            return None;
        }
        let body = &self.esc_buf[2..self.esc_len - 1];
        let button_end = body.iter().position(|&b| b == b';')?;
        let button = std::str::from_utf8(&body[..button_end]).ok()?;
        match button {
            "64" => Some(InputAction::ScrollUp),
            "65" => Some(InputAction::ScrollDown),
            // Clicks, drags, releases: discard.
            _ => Some(InputAction::Unknown),
        }
    }

    /// ESC [ N ~ for Delete / PageUp / PageDown.
    fn match_tilde(&self, byte: u8) -> Option<InputAction> {
        if self.esc_len != 3 || byte != b'~' {
            return None;
        }
        match self.esc_buf[1] {
            b'3' => Some(InputAction::Delete),
            b'5' => Some(InputAction::PageUp),
            b'6' => Some(InputAction::PageDown),
            _ => None,
        }
    }

    /// ESC [ keycode ; modifiers u
    fn parse_csi_u(&mut self) -> InputAction {
        if self.esc_len < 3 {
            return InputAction::Unknown;
        }
        let body = &self.esc_buf[1..self.esc_len - 1];
        let mut keycode: u32 = 0;
        let mut modifiers: u32 = 1;
        let mut i = 0;
        while i < body.len() && body[i].is_ascii_digit() {
            keycode = keycode.wrapping_mul(10) + u32::from(body[i] - b'0');
            i += 1;
        }
        if i == 0 {
            return InputAction::Unknown;
        }
        if i < body.len() && body[i] == b';' {
            i += 1;
            modifiers = 0;
            while i < body.len() && body[i].is_ascii_digit() {
                modifiers = modifiers.wrapping_mul(10) + u32::from(body[i] - b'0');
                i += 1;
            }
        }

        // Bare modifier presses reported by some terminals.
        if keycode > MODIFIER_NOISE_KEYCODE {
            return InputAction::Unknown;
        }
        match (keycode, modifiers) {
            (13, 1) => InputAction::Newline,
            // Any modified Enter inserts a newline instead of submitting.
            (13, _) => InputAction::InsertNewline,
            (99, 5) => InputAction::CtrlC,
            (9, 1) => InputAction::Tab,
            (127, 1) => InputAction::Backspace,
            (27, 1) => InputAction::Escape,
            (32..=126, 1) => char_action(keycode),
            (32..=126, 2) => char_action(self.keymap.shifted(keycode)),
            (cp, 1) if cp > 126 && cp <= 0x10FFFF => char_action(cp),
            _ => InputAction::Unknown,
        }
    }

    /// SGR color runs (terminated by `m`) and ESC [ digit ~ keys we do not
    /// handle are swallowed whole.
    fn is_discardable_terminal(&self, byte: u8) -> bool {
        if byte == b'm' {
            return true;
        }
        self.esc_len == 3 && byte == b'~'
    }
}

fn char_action(codepoint: u32) -> InputAction {
    char::from_u32(codepoint).map(InputAction::Char).unwrap_or(InputAction::Unknown)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
