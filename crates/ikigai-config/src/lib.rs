// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration sources for ikigai: credential discovery and state paths.

pub mod credentials;
pub mod paths;

pub use credentials::{default_path as credentials_path, env_var_for, Credentials};
pub use paths::{libexec_dir, state_dir, AGENT_ID_ENV, STATE_DIR_ENV};
