//! Best-effort privilege restriction.
//!
//! Neither process depends on the restriction taking effect; a platform
//! without support, or a kernel that refuses the call, only produces a
//! warning.

use tracing::{debug, warn};

/// How much a process gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxLevel {
    /// The coordinator: keeps filesystem access and may spawn subprocesses.
    Coordinator,
    /// The front: faces the network, needs nothing beyond its channel and
    /// listening socket.
    Front,
}

/// Applies the restriction for `level`.
///
/// Returns true if something was actually restricted.
pub fn restrict(level: SandboxLevel) -> bool {
    match level {
        // Spawned transcoders must still be able to run setuid helpers.
        SandboxLevel::Coordinator => {
            debug!(?level, "No restriction applied");
            false
        }
        SandboxLevel::Front => match no_new_privs() {
            Ok(()) => {
                debug!(?level, "Sandbox applied");
                true
            }
            Err(e) => {
                warn!(?level, error = %e, "Could not restrict privileges; continuing");
                false
            }
        },
    }
}

#[cfg(target_os = "linux")]
fn no_new_privs() -> std::io::Result<()> {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes plain integer arguments and touches
    // no memory owned by this process.
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn no_new_privs() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no privilege restriction on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_keeps_privileges() {
        assert!(!restrict(SandboxLevel::Coordinator));
    }
}
