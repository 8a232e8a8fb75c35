#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-compiler** – Produce self-contained executables for validated tools.
//!
//! A validated tool source is wrapped with the stdin/stdout JSON harness,
//! written out as a minimal offline-buildable package, and compiled to a
//! native binary under a deadline. The binary lands under the compiled
//! directory named after the tool; the compiler's stderr is surfaced verbatim
//! on failure so the loop can report it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

use ouro_types::{Filesystem, GeneratedTool, MAX_TOOL_SOURCE_BYTES};

pub mod harness;

/// Compilation failure modes.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Generated source exceeds the configured cap.
    #[error("source too large: {size} > {cap} bytes")]
    SourceTooLarge {
        /// Observed source size.
        size: usize,
        /// Configured cap.
        cap: usize,
    },
    /// The toolchain rejected the package.
    #[error("compilation failed:\n{stderr}")]
    Toolchain {
        /// Compiler standard error, verbatim.
        stderr: String,
    },
    /// The compile subprocess overran its deadline.
    #[error("compilation timed out after {0:?}")]
    Timeout(Duration),
    /// Filesystem or process plumbing failed.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// A successfully compiled tool.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTool {
    /// Tool name.
    pub name: String,
    /// Where the executable was installed.
    pub binary_path: PathBuf,
    /// Content hash of the compiled source.
    pub source_hash: String,
}

/// Hex-encoded SHA-256 of a tool source; the tool's content address.
pub fn source_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compiler configuration.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Root for build work directories.
    pub tools_dir: PathBuf,
    /// Directory compiled binaries are installed into.
    pub compiled_dir: PathBuf,
    /// Cross-compile target OS.
    pub target_os: String,
    /// Cross-compile target architecture.
    pub target_arch: String,
    /// Deadline for one compile subprocess.
    pub compile_timeout: Duration,
    /// Cap on generated source size.
    pub max_source_bytes: usize,
}

impl CompilerConfig {
    /// Configuration targeting the host platform.
    pub fn for_host(tools_dir: PathBuf, compiled_dir: PathBuf) -> Self {
        Self {
            tools_dir,
            compiled_dir,
            target_os: std::env::consts::OS.to_string(),
            target_arch: std::env::consts::ARCH.to_string(),
            compile_timeout: Duration::from_secs(60),
            max_source_bytes: MAX_TOOL_SOURCE_BYTES,
        }
    }

    /// Target triple, when the configured target differs from the host.
    fn cross_triple(&self) -> Option<String> {
        if self.target_os == std::env::consts::OS && self.target_arch == std::env::consts::ARCH {
            return None;
        }
        Some(triple_for(&self.target_os, &self.target_arch))
    }
}

/// Map a (os, arch) pair onto a rustc target triple.
pub fn triple_for(os: &str, arch: &str) -> String {
    match os {
        "macos" => format!("{arch}-apple-darwin"),
        "windows" => format!("{arch}-pc-windows-gnu"),
        _ => format!("{arch}-unknown-linux-gnu"),
    }
}

/// Wraps tool source with the runtime harness and drives the toolchain.
pub struct ToolCompiler {
    config: CompilerConfig,
    fs: Arc<dyn Filesystem>,
}

impl ToolCompiler {
    /// Build a compiler over the injected filesystem.
    pub fn new(config: CompilerConfig, fs: Arc<dyn Filesystem>) -> Self {
        Self { config, fs }
    }

    /// Compile `tool` into an executable and install it.
    ///
    /// The work directory is fresh per invocation; on-disk artifacts are
    /// idempotent and named by tool, so a cancelled run leaves nothing that
    /// a later run will not overwrite.
    pub async fn compile(&self, tool: &GeneratedTool) -> Result<CompiledTool, CompileError> {
        if tool.source.len() > self.config.max_source_bytes {
            return Err(CompileError::SourceTooLarge {
                size: tool.source.len(),
                cap: self.config.max_source_bytes,
            });
        }

        let work_dir = self.config.tools_dir.join(".build").join(&tool.name);
        if self.fs.exists(&work_dir).await {
            self.fs.remove_dir(&work_dir).await?;
        }
        self.write_package(&work_dir, tool).await?;

        let binary = self.run_toolchain(&work_dir, &tool.name).await?;

        self.fs.ensure_dir(&self.config.compiled_dir).await?;
        let installed = self.config.compiled_dir.join(&tool.name);
        tokio::fs::copy(&binary, &installed)
            .await
            .map_err(|e| CompileError::Io(anyhow::anyhow!("installing binary: {e}")))?;
        make_executable(&installed).await?;

        info!(tool = %tool.name, path = %installed.display(), "compiled tool installed");
        Ok(CompiledTool {
            name: tool.name.clone(),
            binary_path: installed,
            source_hash: source_hash(&tool.source),
        })
    }

    async fn write_package(
        &self,
        work_dir: &Path,
        tool: &GeneratedTool,
    ) -> Result<(), CompileError> {
        let src = work_dir.join("src");
        self.fs.ensure_dir(&src).await?;
        self.fs
            .write_file(
                &work_dir.join("Cargo.toml"),
                harness::manifest(&tool.name).as_bytes(),
            )
            .await?;
        self.fs
            .write_file(
                &src.join("context.rs"),
                harness::context_module().as_bytes(),
            )
            .await?;
        self.fs
            .write_file(
                &src.join("main.rs"),
                harness::main_module(&tool.name).as_bytes(),
            )
            .await?;
        self.fs
            .write_file(&src.join("tool.rs"), tool.source.as_bytes())
            .await?;
        Ok(())
    }

    async fn run_toolchain(
        &self,
        work_dir: &Path,
        name: &str,
    ) -> Result<PathBuf, CompileError> {
        let mut cmd = Command::new("cargo");
        cmd.arg("build")
            .arg("--release")
            .arg("--offline")
            .current_dir(work_dir)
            .env("CARGO_NET_OFFLINE", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut release_dir = work_dir.join("target");
        if let Some(triple) = self.config.cross_triple() {
            debug!(%triple, "cross-compiling");
            cmd.arg("--target").arg(&triple);
            release_dir = release_dir.join(&triple);
        }
        release_dir = release_dir.join("release");

        let child = cmd
            .spawn()
            .map_err(|e| CompileError::Io(anyhow::anyhow!("spawning cargo: {e}")))?;
        let output = tokio::time::timeout(self.config.compile_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(tool = name, "compile timed out");
                CompileError::Timeout(self.config.compile_timeout)
            })?
            .map_err(|e| CompileError::Io(anyhow::anyhow!("waiting for cargo: {e}")))?;

        if !output.status.success() {
            return Err(CompileError::Toolchain {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(release_dir.join(name))
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), CompileError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o755);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|e| CompileError::Io(anyhow::anyhow!("chmod {path:?}: {e}")))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), CompileError> {
    Ok(())
}
