//! Compiler adapter.
//!
//! The bundler itself is a black box. [`CommandCompiler`] runs it as a child
//! process and reads the stats file it leaves behind:
//!
//! ```json
//! { "hash": "3f2a...", "chunks": [{ "id": "main", "changedModules": ["./src/title.js"] }] }
//! ```

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use hmr_protocol::{BuildHash, ChunkId, ModuleId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::BuildConfig;

/// Chunk touched by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub id: ChunkId,
    #[serde(default)]
    pub changed_modules: Vec<ModuleId>,
}

/// Outcome of one successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    pub hash: BuildHash,
    #[serde(default)]
    pub chunks: Vec<ChunkDescriptor>,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("No build command configured")]
    NotConfigured,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command exited with {status}")]
    Failed { status: String },

    #[error("Failed to read build stats {path}: {message}")]
    Stats { path: String, message: String },
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Run one build to completion.
    async fn compile(&self) -> Result<CompileResult, CompileError>;
}

/// Runs a build command and reads its stats file.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    stats_file: PathBuf,
}

impl CommandCompiler {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: PathBuf,
        stats_file: PathBuf,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir,
            stats_file,
        }
    }

    pub fn from_config(build: &BuildConfig) -> Result<Self, CompileError> {
        let (program, args) = build
            .command
            .split_first()
            .ok_or(CompileError::NotConfigured)?;
        Ok(Self::new(
            program.clone(),
            args.to_vec(),
            build.working_dir.clone(),
            build.stats_file.clone(),
        ))
    }

    async fn read_stats(&self) -> Result<CompileResult, CompileError> {
        let path = if self.stats_file.is_absolute() {
            self.stats_file.clone()
        } else {
            self.working_dir.join(&self.stats_file)
        };
        let stats_error = |message: String| CompileError::Stats {
            path: path.display().to_string(),
            message,
        };

        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| stats_error(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| stats_error(e.to_string()))
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&self) -> Result<CompileResult, CompileError> {
        debug!("Running {} {:?}", self.program, self.args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CompileError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            // The compiler reports its own errors; surface them once here.
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Build failed ({}):\n{}", output.status, stderr.trim_end());
            return Err(CompileError::Failed {
                status: output.status.to_string(),
            });
        }

        let result = self.read_stats().await?;
        info!(
            "Build {} finished ({} chunks changed)",
            result.hash,
            result.chunks.len()
        );
        Ok(result)
    }
}
