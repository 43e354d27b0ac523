// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use deskfleet_context::ContextError;
use deskfleet_model::ModelError;
use deskfleet_sandbox::SandboxError;

/// The only error class that aborts a turn mid-flight. The work loop
/// catches it, logs it, and retries on the next tick -- no context
/// mutation beyond what was already committed before the failing call.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model provider failure: {0}")]
    Model(#[from] ModelError),
    #[error("context store failure: {0}")]
    Context(#[from] ContextError),
    #[error("sandbox file i/o failure: {0}")]
    Sandbox(#[from] SandboxError),
}

pub type Result<T> = std::result::Result<T, TurnError>;
