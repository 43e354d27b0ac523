// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The fixed container recipe every agent sandbox is built from: a virtual
//! framebuffer, keystroke/mouse synthesizer, screenshot tool, terminal
//! emulator, window manager, and a remote-framebuffer server bridged to a
//! websocket for browser-side monitoring.

use sha2::{Digest, Sha256};

pub const DOCKERFILE: &str = r#"
FROM ubuntu:22.04

ENV DEBIAN_FRONTEND=noninteractive

# xvfb: virtual framebuffer (fake display for headless GUI)
# xdotool: simulate keyboard/mouse
# scrot: screenshots (for model perception)
# xterm: terminal emulator, teed to term.log
# openbox: lightweight window manager
# x11vnc: remote-framebuffer server
# websockify + novnc: browser-based remote-framebuffer client
RUN apt-get update && apt-get install -y \
    xvfb \
    xdotool \
    scrot \
    xterm \
    openbox \
    x11vnc \
    novnc \
    websockify \
    firefox \
    && rm -rf /var/lib/apt/lists/*

# display :99 is inside the container only (isolated per container)
ENV DISPLAY=:99

# start xvfb + disable screensaver + vnc + websockify (6080->5900) + openbox
# + xterm with logging, keep alive
CMD Xvfb :99 -screen 0 1280x720x24 & \
    sleep 1 && xset s off -dpms & \
    x11vnc -display :99 -forever -nopw -listen 0.0.0.0 -rfbport 5900 & \
    websockify --web /usr/share/novnc 6080 localhost:5900 & \
    sleep 1 && openbox & \
    sleep 1 && xterm -l -lf /home/agent/term.log & \
    sleep infinity
"#;

/// SHA-256 hex digest of the recipe, used to detect drift between the
/// recipe baked into the binary and the hash recorded for the built image.
pub fn recipe_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOCKERFILE.as_bytes());
    hex::encode(hasher.finalize())
}
