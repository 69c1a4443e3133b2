//! Engine process spawning helpers.
//!
//! Every ffmpeg/ffprobe child is spawned through here so that stdio wiring,
//! kill-on-drop and the Windows console suppression flag stay consistent.

use std::process::Stdio;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Prepare a tokio process command for an engine invocation.
///
/// Stdin is closed, stdout and stderr are piped, and the child is killed if
/// its handle is dropped before it was reaped.
pub fn configure_tokio_command(cmd: &mut tokio::process::Command) {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}
