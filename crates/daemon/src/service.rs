//! Systemd service integration
//!
//! sd-notify messages for `Type=notify` units. Every function is a no-op
//! when the daemon is not started by systemd.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use tracing::debug;

fn notify(message: &str) -> Result<()> {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
        return Ok(());
    };

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send '{}' to systemd", message))?;
    debug!("Notified systemd: {}", message);
    Ok(())
}

/// Tell systemd that device monitoring is up
pub fn notify_ready() -> Result<()> {
    notify("READY=1")
}

/// Tell systemd that shutdown has begun
pub fn notify_stopping() -> Result<()> {
    notify("STOPPING=1")
}

/// Status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    notify(&format!("STATUS={}", status))
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_functions_without_socket() {
        // SAFETY: no other test in this crate touches NOTIFY_SOCKET
        unsafe {
            env::remove_var("NOTIFY_SOCKET");
        }

        assert!(!is_systemd());
        assert!(notify_ready().is_ok());
        assert!(notify_status("Tracking 0 device(s)").is_ok());
        assert!(notify_stopping().is_ok());
    }
}
