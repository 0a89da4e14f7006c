//! Process-group control and the supervisor that spawns, pumps and stops a
//! child (§4.5).

pub mod group;
pub mod supervisor;

pub use supervisor::{StopOutcome, Supervisor, SupervisedProcess};

/// Whether `pid` names a still-running process, checked cross-platform via
/// `sysinfo` rather than a unix-only `kill(pid, 0)` probe, since this is
/// shared by the registry's liveness sweep (§5) as well as the supervisor.
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let mut system = sysinfo::System::new();
    system.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
    );
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!pid_is_alive(0));
    }
}
