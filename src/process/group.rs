//! Cross-platform process-group isolation (§4.5, §9 Design Notes: "a
//! two-method interface — `setup(Command)` and `kill(pid, signal)` — is all
//! the rest of the core needs to know about the host platform").
//!
//! The unix side is grounded in the `nix` crate's `signal`/`unistd` modules;
//! there is no process-group precedent in the teacher repo (it never shells
//! out to a child process), so this is authored fresh against the spec's
//! platform notes.

use std::io;

use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Graceful,
    Forceful,
}

/// Everything platform-specific about spawning and tearing down a child's
/// whole process tree, isolated behind this trait so the supervisor and
/// port manager stay platform-agnostic.
pub trait ProcessGroup: Send + Sync {
    /// Configures `command` so the eventual child starts its own process
    /// group (POSIX) or process-group-equivalent (Windows), isolating it
    /// from this process's own signal handling.
    fn setup(&self, command: &mut Command);

    /// Delivers `signal` to the whole group rooted at `pid`.
    fn kill_group(&self, pid: u32, signal: KillSignal) -> io::Result<()>;
}

/// Signals a single process (not its group) directly; used by the port
/// manager to reclaim a port from a specific remembered holder pid.
pub fn kill_pid(pid: u32, signal: KillSignal) -> io::Result<()> {
    imp::kill_pid(pid, signal)
}

pub use imp::PlatformProcessGroup;

pub fn platform() -> PlatformProcessGroup {
    PlatformProcessGroup::default()
}

#[cfg(unix)]
mod imp {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::{setsid, Pid};

    #[derive(Default)]
    pub struct PlatformProcessGroup;

    impl ProcessGroup for PlatformProcessGroup {
        fn setup(&self, command: &mut Command) {
            // Safety: `setsid` is async-signal-safe and runs in the forked
            // child before exec, per `Command::pre_exec`'s contract.
            unsafe {
                command.pre_exec(|| {
                    setsid().map_err(to_io_error)?;
                    Ok(())
                });
            }
        }

        fn kill_group(&self, pid: u32, signal: KillSignal) -> io::Result<()> {
            // `setsid` makes the child its own group leader, so its pgid
            // equals its pid; a negative pid targets the whole group.
            let pgid = Pid::from_raw(-(pid as i32));
            signal::kill(pgid, to_signal(signal)).map_err(nix_to_io)
        }
    }

    pub fn kill_pid(pid: u32, signal: KillSignal) -> io::Result<()> {
        signal::kill(Pid::from_raw(pid as i32), to_signal(signal)).map_err(nix_to_io)
    }

    fn to_signal(signal: KillSignal) -> Signal {
        match signal {
            KillSignal::Graceful => Signal::SIGTERM,
            KillSignal::Forceful => Signal::SIGKILL,
        }
    }

    fn nix_to_io(err: nix::Error) -> io::Error {
        io::Error::from_raw_os_error(err as i32)
    }

    fn to_io_error(err: nix::Error) -> io::Error {
        nix_to_io(err)
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::os::windows::process::CommandExt;

    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

    #[derive(Default)]
    pub struct PlatformProcessGroup;

    impl ProcessGroup for PlatformProcessGroup {
        fn setup(&self, command: &mut Command) {
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        fn kill_group(&self, pid: u32, signal: KillSignal) -> io::Result<()> {
            // Windows has no SIGKILL-equivalent short of TerminateProcess;
            // `/T` asks `taskkill` to walk the child tree for us.
            let _ = signal;
            taskkill(pid)
        }
    }

    pub fn kill_pid(pid: u32, signal: KillSignal) -> io::Result<()> {
        let _ = signal;
        taskkill(pid)
    }

    fn taskkill(pid: u32) -> io::Result<()> {
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status()
            .map(|_| ())
    }
}
