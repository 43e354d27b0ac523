// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::recipe::{recipe_hash, DOCKERFILE};

const DEFAULT_IMAGE: &str = "deskfleet_sandbox";
const EXPECTED_WIDTH: &str = "1280";
const READY_POLL_ATTEMPTS: u32 = 10;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Controls a single agent's docker container: a virtual framebuffer desktop
/// reachable over websocket-bridged VNC. Purely synchronous and blocking --
/// callers on an async runtime must dispatch through a blocking context
/// (`tokio::task::spawn_blocking`). `Clone` is cheap (a name, two paths, a
/// port, a bool) and lets callers move an owned copy into a blocking closure
/// without holding a borrow across the `.await`.
#[derive(Clone)]
pub struct Container {
    name: String,
    image: String,
    novnc_port: u16,
    data_root: PathBuf,
    workspace: PathBuf,
    running: bool,
}

impl Container {
    pub fn new(name: impl Into<String>, data_root: impl Into<PathBuf>, novnc_port: u16) -> Self {
        let name = name.into();
        let data_root = data_root.into();
        let workspace = data_root.join("workspace").join(&name);
        Self {
            name,
            image: DEFAULT_IMAGE.to_string(),
            novnc_port,
            data_root,
            workspace,
            running: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn novnc_port(&self) -> u16 {
        self.novnc_port
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn build_dir(&self) -> PathBuf {
        self.data_root.join("docker_build")
    }

    fn hash_path(&self) -> PathBuf {
        self.build_dir().join("hash")
    }

    /// Materialize the fixed recipe and invoke the host image builder.
    pub fn build(&self) -> Result<()> {
        let build_dir = self.build_dir();
        fs::create_dir_all(&build_dir).map_err(|source| SandboxError::Io {
            path: build_dir.clone(),
            source,
        })?;
        fs::write(build_dir.join("Dockerfile"), DOCKERFILE).map_err(|source| SandboxError::Io {
            path: build_dir.join("Dockerfile"),
            source,
        })?;

        info!(image = %self.image, "building sandbox image");
        let output = Command::new("docker")
            .args(["build", "-t", &self.image])
            .arg(&build_dir)
            .output()
            .map_err(|source| SandboxError::Exec {
                cmd: vec!["docker".into(), "build".into()],
                source,
            })?;
        if !output.status.success() {
            return Err(SandboxError::Build(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        fs::write(self.hash_path(), recipe_hash()).map_err(|source| SandboxError::Io {
            path: self.hash_path(),
            source,
        })?;
        Ok(())
    }

    /// True if the image tag is absent on the host, or the hash recorded at
    /// last build differs from the current in-binary recipe's hash.
    pub fn needs_rebuild(&self) -> bool {
        let image_present = run(&["docker", "images", "-q", &self.image])
            .map(|out| !stdout(&out).trim().is_empty())
            .unwrap_or(false);
        if !image_present {
            return true;
        }
        match fs::read_to_string(self.hash_path()) {
            Ok(stored) => stored.trim() != recipe_hash(),
            Err(_) => true,
        }
    }

    /// Ensure the image is current, start (or resume) the container, and
    /// poll until the desktop is ready to receive input.
    pub fn start(&mut self) -> Result<()> {
        if self.needs_rebuild() {
            let _ = run(&[
                "docker",
                "ps",
                "-a",
                "-q",
                "--filter",
                &format!("ancestor={}", self.image),
            ])
            .map(|out| {
                for id in stdout(&out).lines().map(str::trim).filter(|l| !l.is_empty()) {
                    let _ = run(&["docker", "rm", "-f", id]);
                }
            });
            self.build()?;
        }

        let exists = run(&["docker", "ps", "-a", "-q", "-f", &format!("name={}", self.name)])
            .map(|out| !stdout(&out).trim().is_empty())
            .unwrap_or(false);

        if exists {
            debug!(name = %self.name, "resuming existing container");
            run(&["docker", "start", &self.name])?;
        } else {
            debug!(name = %self.name, "creating new container");
            fs::create_dir_all(&self.workspace).map_err(|source| SandboxError::Io {
                path: self.workspace.clone(),
                source,
            })?;
            let port_mapping = format!("{}:6080", self.novnc_port);
            let mount = format!("{}:/home/agent", self.workspace.display());
            run(&[
                "docker", "run", "-d", "--name", &self.name, "-p", &port_mapping, "-v", &mount,
                &self.image,
            ])?;
        }

        self.wait_until_ready()?;
        self.running = true;
        Ok(())
    }

    fn wait_until_ready(&self) -> Result<()> {
        for _ in 0..READY_POLL_ATTEMPTS {
            let geometry_ok = self
                .exec("xdotool getdisplaygeometry")
                .contains(EXPECTED_WIDTH);
            let focus_ok = self
                .exec_status("xdotool search --name xterm windowfocus")
                .unwrap_or(false);
            if geometry_ok && focus_ok {
                return Ok(());
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
        Err(SandboxError::Readiness)
    }

    /// Best-effort stop; state is preserved on the host.
    pub fn stop(&mut self) -> Result<()> {
        let _ = run(&["docker", "stop", &self.name]);
        self.running = false;
        Ok(())
    }

    /// Stop and remove the container, its workspace, and its context dir.
    pub fn destroy(&mut self, context_dir: &Path) -> Result<()> {
        // throwaway container to clear root-owned workspace files left by
        // processes inside the sandbox before we try to delete them as our uid
        if self.workspace.is_dir() {
            let mount = format!("{}:/home/agent", self.workspace.display());
            let _ = run(&[
                "docker", "run", "--rm", "-v", &mount, &self.image, "rm", "-rf", "/home/agent",
            ]);
        }
        let _ = run(&["docker", "stop", &self.name]);
        let _ = run(&["docker", "rm", &self.name]);
        self.running = false;

        if self.workspace.is_dir() {
            let _ = fs::remove_dir_all(&self.workspace);
        }
        if context_dir.is_dir() {
            let _ = fs::remove_dir_all(context_dir);
        }
        Ok(())
    }

    /// Run a shell command inside the container. Never fails on nonzero
    /// exit -- the combined stdout+stderr is returned verbatim.
    pub fn exec(&self, cmd: &str) -> String {
        match run(&["docker", "exec", &self.name, "bash", "-c", cmd]) {
            Ok(out) => format!("{}{}", stdout(&out), stderr(&out)),
            Err(e) => format!("[sandbox exec error: {e}]"),
        }
    }

    fn exec_status(&self, cmd: &str) -> Result<bool> {
        run(&["docker", "exec", &self.name, "bash", "-c", cmd]).map(|out| out.status.success())
    }

    /// Write the framebuffer to `screenshots/screen.png` in the workspace
    /// and return its host-visible path.
    pub fn screenshot(&self) -> PathBuf {
        self.exec("mkdir -p /home/agent/screenshots");
        self.exec("scrot --overwrite /home/agent/screenshots/screen.png");
        self.workspace.join("screenshots").join("screen.png")
    }

    pub fn type_text(&self, text: &str) {
        let escaped = text.replace('\'', r"'\''");
        self.exec(&format!("xdotool type '{escaped}'"));
    }

    /// `combo` is passed through to `xdotool key` literally, e.g.
    /// `"Return"` or `"ctrl+shift+c"` -- joining modifier names is the
    /// caller's job.
    pub fn key(&self, combo: &str) {
        self.exec(&format!("xdotool key {combo}"));
    }

    pub fn click(&self, button: u8) {
        self.exec(&format!("xdotool click {button}"));
    }

    pub fn mousedown(&self, button: u8) {
        self.exec(&format!("xdotool mousedown {button}"));
    }

    pub fn mouseup(&self, button: u8) {
        self.exec(&format!("xdotool mouseup {button}"));
    }

    /// `dir` is `"up"` or `"down"` (xdotool click 4 = up, 5 = down).
    pub fn scroll(&self, dir: &str) {
        let button = if dir == "up" { 4 } else { 5 };
        self.exec(&format!("xdotool click {button}"));
    }

    pub fn move_to(&self, x: i32, y: i32) {
        self.exec(&format!("xdotool mousemove {x} {y}"));
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        fs::read_to_string(path).map_err(|source| SandboxError::Io {
            path: PathBuf::from(path),
            source,
        })
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let path_buf = PathBuf::from(path);
        if let Some(parent) = path_buf.parent() {
            fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path_buf, content).map_err(|source| SandboxError::Io {
            path: path_buf,
            source,
        })
    }
}

fn run(args: &[&str]) -> Result<Output> {
    Command::new(args[0]).args(&args[1..]).output().map_err(|source| SandboxError::Exec {
        cmd: args.iter().map(|s| s.to_string()).collect(),
        source,
    })
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}
