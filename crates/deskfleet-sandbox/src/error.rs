// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("building sandbox image: {0}")]
    Build(String),
    #[error("sandbox did not become ready within the polling window")]
    Readiness,
    #[error("running host command {cmd:?}: {source}")]
    Exec {
        cmd: Vec<String>,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SandboxError>;
