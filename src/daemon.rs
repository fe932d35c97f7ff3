// src/daemon.rs

//! Unix process plumbing: daemonization, the PID file, privilege dropping
//! and the reopenable log destination behind SIGUSR1.

use anyhow::{Result, anyhow};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;

/// The default PID file location: `${TMPDIR}/<program>-<user>.pid`.
pub fn default_pid_path(program: &str) -> PathBuf {
    let tmpdir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    let user = std::env::var("USER").unwrap_or_else(|_| fallback_user());
    Path::new(&tmpdir).join(format!("{program}-{user}.pid"))
}

#[cfg(unix)]
fn fallback_user() -> String {
    // SAFETY: getuid takes no arguments and cannot fail.
    unsafe { libc::getuid() }.to_string()
}

#[cfg(not(unix))]
fn fallback_user() -> String {
    "nobody".to_string()
}

/// Writes the PID file, refusing to start when it names a live process.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Ok(existing) = fs::read_to_string(path) {
        if let Ok(pid) = existing.trim().parse::<i32>()
            && pid > 0
            && process_alive(pid)
        {
            return Err(anyhow!(
                "PID file '{}' names live process {}; refusing to start",
                path.display(),
                pid
            ));
        }
        // A stale file from a dead process is overwritten.
    }
    let mut file = File::create(path)
        .map_err(|e| anyhow!("failed to create PID file '{}': {e}", path.display()))?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Removes the PID file at clean shutdown; a missing file is not an error.
pub fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission checks.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

/// Classic double-fork daemonization. Must run before the async runtime
/// starts; a forked Tokio runtime is undefined behavior in practice.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    // SAFETY: fork/setsid/chdir are async-signal-safe here because no
    // runtime threads exist yet.
    unsafe {
        match libc::fork() {
            -1 => return Err(anyhow!("first fork failed: {}", io::Error::last_os_error())),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::setsid() == -1 {
            return Err(anyhow!("setsid failed: {}", io::Error::last_os_error()));
        }
        match libc::fork() {
            -1 => return Err(anyhow!("second fork failed: {}", io::Error::last_os_error())),
            0 => {}
            _ => libc::_exit(0),
        }
        let _ = libc::chdir(c"/".as_ptr());

        // Detach stdio from the controlling terminal.
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, libc::STDIN_FILENO);
            libc::dup2(devnull, libc::STDOUT_FILENO);
            libc::dup2(devnull, libc::STDERR_FILENO);
            if devnull > libc::STDERR_FILENO {
                libc::close(devnull);
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    Err(anyhow!("daemonization is only supported on Unix"))
}

/// Drops to the named user and group. Called after the listener is bound;
/// the group must drop first while still privileged.
#[cfg(unix)]
pub fn drop_privileges(user: Option<&str>, group: Option<&str>) -> Result<()> {
    if let Some(group) = group {
        let cname = CString::new(group)?;
        // SAFETY: getgrnam returns a pointer into static libc storage.
        let entry = unsafe { libc::getgrnam(cname.as_ptr()) };
        if entry.is_null() {
            return Err(anyhow!("unknown group '{group}'"));
        }
        let gid = unsafe { (*entry).gr_gid };
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(anyhow!("setgid({gid}) failed: {}", io::Error::last_os_error()));
        }
        info!("Dropped group privileges to '{}' (gid {}).", group, gid);
    }
    if let Some(user) = user {
        let cname = CString::new(user)?;
        // SAFETY: getpwnam returns a pointer into static libc storage.
        let entry = unsafe { libc::getpwnam(cname.as_ptr()) };
        if entry.is_null() {
            return Err(anyhow!("unknown user '{user}'"));
        }
        let uid = unsafe { (*entry).pw_uid };
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(anyhow!("setuid({uid}) failed: {}", io::Error::last_os_error()));
        }
        info!("Dropped user privileges to '{}' (uid {}).", user, uid);
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn drop_privileges(_user: Option<&str>, _group: Option<&str>) -> Result<()> {
    Err(anyhow!("privilege dropping is only supported on Unix"))
}

struct LogInner {
    path: PathBuf,
    file: Mutex<File>,
}

/// A log destination whose file handle can be swapped at runtime, so
/// SIGUSR1 cooperates with external log rotation.
#[derive(Clone)]
pub struct ReopenableLog {
    inner: Arc<LogInner>,
}

impl ReopenableLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(LogInner {
                path: path.to_path_buf(),
                file: Mutex::new(file),
            }),
        })
    }

    /// Reopens the destination path and swaps it in.
    pub fn reopen(&self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        *self.inner.file.lock().expect("log mutex poisoned") = file;
        Ok(())
    }
}

/// Writes through the currently open handle.
pub struct LogWriter {
    inner: Arc<LogInner>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.file.lock().expect("log mutex poisoned").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.file.lock().expect("log mutex poisoned").flush()
    }
}

impl<'a> MakeWriter<'a> for ReopenableLog {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.inner.clone(),
        }
    }
}
