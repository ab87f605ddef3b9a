//! Tiny process-liveness helper shared by PTY reattachment and session
//! recovery (`libc::kill(pid, 0)`, grounded on the heritage daemon's own
//! PID-liveness probe).

/// Returns whether a process with the given PID is still alive, using a
/// signal-0 probe (sends no signal, just checks deliverability).
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission
    // checking; pid is a plain integer, no memory is touched.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_current_process_is_alive() {
        let pid = std::process::id();
        assert!(is_process_alive(pid));
    }

    #[test]
    #[cfg(unix)]
    fn test_bogus_pid_is_not_alive() {
        // PID 1 is init/pid1 and (almost) always alive; instead use a
        // PID far beyond any plausible allocation.
        assert!(!is_process_alive(u32::MAX - 1));
    }
}
