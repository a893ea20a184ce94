//! Spawning and terminating replica processes.
//!
//! Each replica runs in its own process group so that stopping it also takes
//! down anything it spawned (for example `go run` forking the compiled
//! binary, or a shell wrapper starting the real server).

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::Service;
use crate::constants;
use crate::error::{Error, Result};

/// What is needed to start one replica.
#[derive(Debug, Clone)]
pub struct ReplicaSpec<'a> {
    /// Replica name (`{service}-{n}`).
    pub name: String,
    /// Port handed to the replica in `PORT`.
    pub port: u16,
    /// Service the replica belongs to.
    pub service: &'a Service,
}

/// Build the command for a replica.
///
/// The child inherits the orchestrator's environment, then gets the service
/// `env` entries and finally `PORT`, so `PORT` always wins. Stdin is closed
/// and both output streams are piped for the log pumps.
pub fn build_command(spec: &ReplicaSpec<'_>) -> Command {
    let mut cmd = Command::new(&spec.service.path);

    cmd.args(&spec.service.args)
        .envs(&spec.service.env)
        .env(constants::PORT_ENV, spec.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    // New process group with the child as leader (pgid == pid).
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Spawn a replica process.
///
/// # Errors
///
/// Returns [`Error::SpawnFailed`] if the executable cannot be started.
pub fn spawn_replica(spec: &ReplicaSpec<'_>) -> Result<Child> {
    let child = build_command(spec)
        .spawn()
        .map_err(|e| Error::spawn_failed(&spec.name, e))?;

    tracing::debug!(
        replica = %spec.name,
        pid = ?child.id(),
        port = spec.port,
        path = %spec.service.path,
        "Spawned replica process"
    );

    Ok(child)
}

/// Outcome of a process group kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKill {
    /// The signal was delivered to the group.
    Killed,
    /// No such group: everything in it has already exited.
    AlreadyExited,
    /// Group kill failed or is not supported; kill the single process instead.
    Fallback,
}

/// Send `SIGKILL` to the process group led by `pid`.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> GroupKill {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return GroupKill::Fallback;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => GroupKill::Killed,
        Err(Errno::ESRCH) => GroupKill::AlreadyExited,
        Err(e) => {
            tracing::warn!(pid = pid, error = %e, "Process group kill failed, falling back to single process");
            GroupKill::Fallback
        },
    }
}

/// Process groups are a Unix concept; everything else kills the single process.
#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32) -> GroupKill {
    GroupKill::Fallback
}

/// Kill the replica's own process. Already-exited processes are not an error.
pub fn kill_single(child: &mut Child, replica: &str) {
    match child.start_kill() {
        Ok(()) => {},
        // Already reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {},
        Err(e) => {
            tracing::warn!(replica = %replica, error = %e, "Failed to kill replica process");
        },
    }
}

/// Kill a replica that has not been reaped yet: its whole process group,
/// then the process itself.
///
/// Only the owner of the [`Child`] calls this, before reaping it, so the
/// pid (and the group it leads) cannot have been reused.
pub fn terminate(child: &mut Child, replica: &str) -> GroupKill {
    let outcome = child
        .id()
        .map_or(GroupKill::AlreadyExited, kill_process_group);
    kill_single(child, replica);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn service(path: &str) -> Service {
        Service {
            name: "svc".to_string(),
            path: path.to_string(),
            args: vec!["-c".to_string(), "echo $PORT $GREETING".to_string()],
            start_port: 9000,
            end_port: 9010,
            replicas: 1,
            route_prefix: "/svc".to_string(),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_fails() {
        let svc = service("/definitely/not/a/binary");
        let spec = ReplicaSpec {
            name: "svc-1".to_string(),
            port: 9000,
            service: &svc,
        };
        let err = spawn_replica(&spec).unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { ref name, .. } if name == "svc-1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_passes_port_and_env() {
        let svc = service("/bin/sh");
        let spec = ReplicaSpec {
            name: "svc-1".to_string(),
            port: 9004,
            service: &svc,
        };
        let output = build_command(&spec).output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "9004 hi");
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_unknown_group_is_already_exited() {
        // pid_max on Linux is at most 2^22, so this group cannot exist.
        assert_eq!(kill_process_group(i32::MAX as u32), GroupKill::AlreadyExited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_process_group_terminates_leader() {
        let mut svc = service("/bin/sh");
        svc.args = vec!["-c".to_string(), "sleep 30".to_string()];
        let spec = ReplicaSpec {
            name: "svc-1".to_string(),
            port: 9000,
            service: &svc,
        };
        let mut child = spawn_replica(&spec).unwrap();
        let pid = child.id().unwrap();

        assert_eq!(kill_process_group(pid), GroupKill::Killed);
        let status = child.wait().await.unwrap();
        assert!(!status.success());

        // Reaped: killing again is harmless.
        kill_single(&mut child, "svc-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_reap_sends_nothing() {
        let mut svc = service("/bin/sh");
        svc.args = vec!["-c".to_string(), "exit 0".to_string()];
        let spec = ReplicaSpec {
            name: "svc-1".to_string(),
            port: 9000,
            service: &svc,
        };
        let mut child = spawn_replica(&spec).unwrap();
        child.wait().await.unwrap();

        // The handle no longer exposes a pid, so no group is signalled.
        assert_eq!(child.id(), None);
        assert_eq!(terminate(&mut child, "svc-1"), GroupKill::AlreadyExited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_group_before_reap() {
        let mut svc = service("/bin/sh");
        svc.args = vec!["-c".to_string(), "sleep 30 & wait".to_string()];
        let spec = ReplicaSpec {
            name: "svc-1".to_string(),
            port: 9000,
            service: &svc,
        };
        let mut child = spawn_replica(&spec).unwrap();

        assert_eq!(terminate(&mut child, "svc-1"), GroupKill::Killed);
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
