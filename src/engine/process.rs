//! Narrow OS process-control capability used by the engine for graceful
//! interruption and pause/resume. Kept behind a trait so the inherently
//! OS-specific part never leaks into the orchestration logic.

use std::io;

pub trait ProcessController: Send + Sync {
    /// Ask the process to wind down (the Ctrl+C equivalent), letting the
    /// encoder flush a playable partial output.
    fn interrupt(&self, pid: u32) -> io::Result<()>;

    /// Stop execution of every thread of the process.
    fn suspend(&self, pid: u32) -> io::Result<()>;

    /// Continue a suspended process exactly where it left off.
    fn resume(&self, pid: u32) -> io::Result<()>;
}

/// Signal-based controller for unix targets; other platforms report the
/// capability as unsupported and callers fall back to a hard kill.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessController;

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
impl ProcessController for OsProcessController {
    fn interrupt(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, libc::SIGINT)
    }

    fn suspend(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, libc::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> io::Result<()> {
        send_signal(pid, libc::SIGCONT)
    }
}

#[cfg(not(unix))]
impl ProcessController for OsProcessController {
    fn interrupt(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process interrupt is not supported on this platform",
        ))
    }

    fn suspend(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process suspension is not supported on this platform",
        ))
    }

    fn resume(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process resumption is not supported on this platform",
        ))
    }
}
