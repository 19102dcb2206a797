//! POSIX resource-limit sandbox.
//!
//! [`RlimitSandbox`] installs a `pre_exec` hook that runs in the forked
//! child before `exec`:
//!
//! 1. On Linux, `unshare` into fresh namespaces: a network namespace when
//!    networking is disabled, which leaves only an unconfigured loopback, and
//!    a PID namespace that holds the whole process tree
//! 2. With a PID namespace, fork the namespace's init and the artifact
//!    process below it. The spawned process and the init only relay the
//!    artifact's exit status; when the init exits the kernel kills whatever
//!    is left in the namespace, including processes that called `setsid`
//! 3. `setrlimit` for address space, CPU time, file size, process count,
//!    and core dumps (always zero)
//!
//! Namespace support is probed once at construction. When it is unavailable
//! the sandbox reports the control as unsupported, or refuses to prepare the
//! command if network isolation is configured as required.

use std::io;

use async_trait::async_trait;
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use tokio::process::Command;
use tracing::{debug, info, warn};

use coderun_common::{SandboxConfig, SandboxError};

use crate::ProcessSandbox;
use crate::policy::{Enforcement, EnforcementReport, ResourcePolicy};

/// Limits copied into the `pre_exec` closure.
///
/// Plain integers only, so applying them in the forked child never allocates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RlimitSet {
    address_space: Option<u64>,
    cpu_secs: Option<u64>,
    file_size: Option<u64>,
    processes: Option<u64>,
}

impl RlimitSet {
    fn from_policy(policy: &ResourcePolicy) -> Self {
        Self {
            address_space: policy.memory_limit_bytes,
            cpu_secs: policy.cpu_time_secs,
            file_size: policy.max_file_size_bytes,
            processes: policy.max_processes,
        }
    }

    /// Lower each requested limit to the hard limit the child will inherit.
    ///
    /// An unprivileged child cannot raise its hard limit, so a request above
    /// it would make `setrlimit` fail after fork.
    fn clamped<F>(self, current: F) -> Result<Self, SandboxError>
    where
        F: Fn(Resource) -> nix::Result<(u64, u64)>,
    {
        let clamp = |resource: Resource,
                     name: &str,
                     requested: Option<u64>|
         -> Result<Option<u64>, SandboxError> {
            let Some(requested) = requested else {
                return Ok(None);
            };
            let (_, hard) = current(resource).map_err(|e| SandboxError::LimitRejected {
                resource: name.to_string(),
                reason: format!("cannot read the current limit: {e}"),
            })?;
            if requested > hard {
                debug!(resource = name, requested, hard, "Clamping limit to the inherited hard limit");
            }
            Ok(Some(requested.min(hard)))
        };

        Ok(Self {
            address_space: clamp(Resource::RLIMIT_AS, "memory", self.address_space)?,
            cpu_secs: clamp(Resource::RLIMIT_CPU, "cpu_time", self.cpu_secs)?,
            file_size: clamp(Resource::RLIMIT_FSIZE, "file_size", self.file_size)?,
            processes: clamp(Resource::RLIMIT_NPROC, "processes", self.processes)?,
        })
    }

    fn apply(self) -> io::Result<()> {
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;

        if let Some(bytes) = self.address_space {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(secs) = self.cpu_secs {
            setrlimit(Resource::RLIMIT_CPU, secs, secs)?;
        }
        if let Some(bytes) = self.file_size {
            setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(count) = self.processes {
            setrlimit(Resource::RLIMIT_NPROC, count, count)?;
        }

        Ok(())
    }
}

/// Namespaces the child enters before `exec`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Namespaces {
    network: bool,
    pid: bool,
}

impl Namespaces {
    const NETWORK: Self = Self {
        network: true,
        pid: false,
    };
    const PID: Self = Self {
        network: false,
        pid: true,
    };

    fn any(self) -> bool {
        self.network || self.pid
    }
}

/// Whether this host supports a namespace kind.
#[derive(Debug, Clone)]
enum Support {
    Available,
    Unavailable(String),
}

impl Support {
    fn probe(namespaces: Namespaces, label: &str) -> Self {
        match probe_namespaces(namespaces) {
            Ok(()) => {
                info!(namespace = label, "Namespace isolation available");
                Self::Available
            }
            Err(reason) => {
                warn!(namespace = label, reason = %reason, "Namespace isolation unavailable");
                Self::Unavailable(reason)
            }
        }
    }

    fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Sandbox built on `setrlimit` and, on Linux, network and PID namespaces.
#[derive(Debug, Clone)]
pub struct RlimitSandbox {
    network: Support,
    process_tree: Support,
    require_network_isolation: bool,
}

impl RlimitSandbox {
    /// Create the sandbox, probing for namespace support.
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            network: Support::probe(Namespaces::NETWORK, "network"),
            process_tree: Support::probe(Namespaces::PID, "pid"),
            require_network_isolation: config.require_network_isolation,
        }
    }

    /// Returns `true` if network isolation can be applied on this host.
    pub fn network_isolation_available(&self) -> bool {
        self.network.is_available()
    }

    /// Returns `true` if descendants can be confined to a PID namespace.
    pub fn process_containment_available(&self) -> bool {
        self.process_tree.is_available()
    }
}

#[async_trait]
impl ProcessSandbox for RlimitSandbox {
    fn name(&self) -> &'static str {
        "rlimit"
    }

    async fn prepare(
        &self,
        command: &mut Command,
        policy: &ResourcePolicy,
    ) -> Result<EnforcementReport, SandboxError> {
        let limits = RlimitSet::from_policy(policy).clamped(getrlimit)?;

        let mut report = EnforcementReport::new(self.name());
        report.memory = Enforcement::applied_if(limits.address_space.is_some());
        report.cpu_time = Enforcement::applied_if(limits.cpu_secs.is_some());
        report.file_size = Enforcement::applied_if(limits.file_size.is_some());
        report.processes = Enforcement::applied_if(limits.processes.is_some());

        let isolate_network = if policy.network_enabled {
            false
        } else {
            match &self.network {
                Support::Available => {
                    report.network = Enforcement::Applied;
                    true
                }
                Support::Unavailable(reason) => {
                    if self.require_network_isolation {
                        return Err(SandboxError::IsolationFailed {
                            reason: format!("network isolation required but unavailable: {reason}"),
                        });
                    }
                    report.network = Enforcement::unsupported(reason.clone());
                    false
                }
            }
        };

        let contain = policy.contain_process_tree
            && match &self.process_tree {
                Support::Available => {
                    report.process_tree = Enforcement::Applied;
                    true
                }
                Support::Unavailable(reason) => {
                    report.process_tree = Enforcement::unsupported(reason.clone());
                    false
                }
            };

        let namespaces = Namespaces {
            network: isolate_network,
            pid: contain,
        };

        debug!(
            memory = ?limits.address_space,
            cpu_secs = ?limits.cpu_secs,
            isolate_network,
            contain,
            "Installing rlimit sandbox"
        );

        // SAFETY: the hook runs between fork and exec. It only issues
        // unshare/fork/waitpid/setrlimit syscalls on values copied in
        // beforehand and neither allocates nor takes locks.
        #[allow(unsafe_code)]
        unsafe {
            command.pre_exec(move || {
                isolate(namespaces)?;
                limits.apply()
            });
        }

        Ok(report)
    }
}

/// Enter `namespaces`. With a PID namespace this returns only in the
/// process that goes on to `exec`.
///
/// Tries plain namespaces first (needs `CAP_SYS_ADMIN`), then an
/// unprivileged user namespace wrapping them.
#[cfg(target_os = "linux")]
fn isolate(namespaces: Namespaces) -> io::Result<()> {
    use nix::sched::{CloneFlags, unshare};

    if !namespaces.any() {
        return Ok(());
    }

    let mut flags = CloneFlags::empty();
    if namespaces.network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if namespaces.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }

    if unshare(flags).is_err() {
        unshare(flags | CloneFlags::CLONE_NEWUSER)?;
    }

    if namespaces.pid {
        supervise_pid_namespace()?;
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn isolate(namespaces: Namespaces) -> io::Result<()> {
    if namespaces.any() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "namespaces require Linux",
        ));
    }
    Ok(())
}

/// Fork the namespace's init, then the process that will `exec`.
///
/// The init dies with the spawned process, and everything in the namespace
/// dies with the init.
#[cfg(target_os = "linux")]
fn supervise_pid_namespace() -> io::Result<()> {
    use nix::sys::prctl::set_pdeathsig;
    use nix::sys::signal::Signal;

    relay_through_child()?;
    set_pdeathsig(Signal::SIGKILL)?;
    relay_through_child()
}

/// Fork. The child returns; the parent waits for it and exits with its
/// status, `128 + signal` for a signal death.
#[cfg(target_os = "linux")]
fn relay_through_child() -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{SigHandler, Signal, signal};
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, fork};

    // SAFETY: the caller is the single-threaded child of a fork; both sides
    // make only async-signal-safe calls until `exec` or `_exit`.
    #[allow(unsafe_code)]
    let child = match unsafe { fork() }? {
        ForkResult::Child => return Ok(()),
        ForkResult::Parent { child } => child,
    };

    // SIGTERM is for the artifact; relays leave when it does.
    // SAFETY: SIG_IGN runs no handler code.
    #[allow(unsafe_code)]
    let _ = unsafe { signal(Signal::SIGTERM, SigHandler::SigIgn) };

    let code = loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => break code,
            Ok(WaitStatus::Signaled(_, sig, _)) => break 128 + sig as i32,
            Ok(_) | Err(Errno::EINTR) => {}
            Err(_) => break 1,
        }
    };

    // SAFETY: `_exit` skips atexit handlers and stdio buffers inherited
    // from the service.
    #[allow(unsafe_code)]
    unsafe {
        nix::libc::_exit(code);
    }
}

/// Spawn a trivial child inside `namespaces` and report whether it ran.
fn probe_namespaces(namespaces: Namespaces) -> Result<(), String> {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    let mut probe = std::process::Command::new("/bin/sh");
    probe
        .args(["-c", "exit 0"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: same constraints as the hook installed in `prepare`.
    #[allow(unsafe_code)]
    unsafe {
        probe.pre_exec(move || isolate(namespaces));
    }

    match probe.status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("probe exited with {status}")),
        Err(e) => Err(format!("probe failed: {e}")),
    }
}
