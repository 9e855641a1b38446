// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::cell::RefCell;
use std::ffi::CString;
use std::mem;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ipc::{Channel, Tag};
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::openpty;
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

const GRACEFUL_SHUTDOWN_POLL_TIME: Duration = Duration::from_millis(50);

///
/// A child process running under a pseudo-terminal owned by this process.
///
/// The child is forked with a socket-pair IPC channel that stays open until it execs. Its setup
/// sequence (new session, controlling terminal, stdio duplication, termios snapshot) completes
/// before it announces readiness with a Release message; it then parks until the parent sends
/// Release back, which closes the channel and execs the target. The window between the two
/// Release messages is when terminal attributes may be exchanged.
///
/// Exactly one waitpid is performed per spawned child: either when end-of-file is discovered on
/// the master, or during `close`.
///
pub struct PtyProcess {
    pid: Pid,
    master: Option<RawFd>,
    ipc: Option<Channel>,
    released: bool,
    error: Rc<RefCell<Option<String>>>,
    status: Option<i32>,
    graceful_shutdown_timeout: Duration,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("master", &self.master)
            .field("released", &self.released)
            .field("error", &self.error)
            .field("status", &self.status)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    ///
    /// Forks a child set up to exec the given argv under a fresh PTY, and waits for its
    /// readiness announcement. The returned process has not yet been released.
    ///
    pub fn spawn(argv: &[String]) -> Result<PtyProcess, String> {
        if argv.is_empty() {
            return Err("Cannot spawn an empty command line".to_owned());
        }
        let cargv: Vec<CString> = argv
            .iter()
            .map(|a| {
                CString::new(a.as_str())
                    .map_err(|_| format!("Argument contains a NUL byte: {a:?}"))
            })
            .collect::<Result<_, String>>()?;

        let pty = openpty(None, None).map_err(|e| format!("openpty failed: {e}"))?;
        set_nonblocking(pty.master)?;
        set_cloexec(pty.master)?;
        set_cloexec(pty.slave)?;
        let (parent_fd, child_fd) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| format!("Failed to create IPC socket pair: {e}"))?;

        match unsafe { unistd::fork() }.map_err(|e| format!("fork failed: {e}"))? {
            // Nothing in the child branch returns: either exec succeeds, or the error is
            // reported over IPC and the child exits.
            ForkResult::Child => child_main(pty.slave, pty.master, child_fd, parent_fd, &cargv),
            ForkResult::Parent { child } => {
                let _ = unistd::close(pty.slave);
                let _ = unistd::close(child_fd);

                let mut channel = Channel::from_raw_fd(parent_fd);
                let error = Rc::new(RefCell::new(None));
                let error2 = error.clone();
                channel.set_handler(
                    Tag::Error,
                    Box::new(move |_chan, payload| {
                        let msg = String::from_utf8_lossy(payload).into_owned();
                        warn!("child reported: {msg}");
                        *error2.borrow_mut() = Some(msg);
                        Ok(())
                    }),
                );
                // The child announces readiness once its terminal setup is complete. Waiting
                // here removes the race between our first write and its exec.
                if let Err(e) = channel.recv(Tag::Release) {
                    let _ = waitpid(child, None);
                    return Err(match error.borrow().as_ref() {
                        Some(msg) => format!("Child process failed to start: {msg}"),
                        None => e,
                    });
                }
                debug!("spawned {:?} as pid {child} on pty", argv[0]);

                Ok(PtyProcess {
                    pid: child,
                    master: Some(pty.master),
                    ipc: Some(channel),
                    released: false,
                    error,
                    status: None,
                    graceful_shutdown_timeout: Duration::from_secs(5),
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    ///
    /// Adjusts how long `close` waits between SIGINT and SIGKILL.
    ///
    pub fn set_graceful_shutdown_timeout(&mut self, timeout: Duration) {
        self.graceful_shutdown_timeout = timeout;
    }

    pub fn released(&self) -> bool {
        self.released
    }

    pub fn eof(&self) -> bool {
        self.master.is_none()
    }

    ///
    /// The child's failure report, if it sent one before exec.
    ///
    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    ///
    /// The reaped exit code, once the child has been waited for.
    ///
    pub fn exit_status(&self) -> Option<i32> {
        self.status
    }

    ///
    /// Permits the child to exec, and tears down the IPC channel. A failure the child manages
    /// to report while the channel drains surfaces here.
    ///
    pub fn release(&mut self) -> Result<(), String> {
        let Some(mut channel) = self.ipc.take() else {
            return Ok(());
        };
        self.released = true;
        channel.send(Tag::Release, b"")?;
        channel.close()?;
        if let Some(msg) = self.error.borrow().as_ref() {
            return Err(format!("Child process failed to start: {msg}"));
        }
        Ok(())
    }

    ///
    /// Fetches the child's current terminal attributes over IPC. Only usable before release.
    ///
    pub fn inquire_termios(&mut self) -> Result<libc::termios, String> {
        let channel = self.pre_release_channel("inquire terminal attributes")?;
        channel.send(Tag::TermiosInquiry, b"")?;
        let payload = channel.recv(Tag::TermiosSet)?;
        termios_from_bytes(&payload)
    }

    ///
    /// Applies terminal attributes in the child over IPC. Only usable before release.
    ///
    pub fn set_termios(&mut self, termios: &libc::termios) -> Result<(), String> {
        let channel = self.pre_release_channel("set terminal attributes")?;
        channel.send(Tag::TermiosSet, termios_bytes(termios))?;
        channel.recv(Tag::TermiosAck)?;
        Ok(())
    }

    fn pre_release_channel(&mut self, what: &str) -> Result<&mut Channel, String> {
        if self.released {
            return Err(format!("Cannot {what} after the child has been released"));
        }
        self.ipc
            .as_mut()
            .ok_or_else(|| format!("Cannot {what}: IPC channel is gone"))
    }

    ///
    /// Writes the given bytes to the PTY, polling for writability as needed.
    ///
    pub fn write(&mut self, data: &[u8]) -> Result<(), String> {
        let fd = self.master.ok_or("Process output has reached EOF")?;
        let mut written = 0;
        while written < data.len() {
            match unistd::write(fd, &data[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) => {
                    let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
                    if let Err(e) = poll(&mut fds, -1) {
                        if e != Errno::EINTR {
                            return Err(format!("poll on pty failed: {e}"));
                        }
                    }
                }
                Err(Errno::EINTR) => (),
                Err(e) => return Err(format!("write to pty failed: {e}")),
            }
        }
        Ok(())
    }

    ///
    /// Reads available output, waiting up to the given timeout for some to arrive. Returns an
    /// empty buffer on timeout. A zero-byte read or EIO transitions to EOF: the master closes
    /// and the child is reaped.
    ///
    pub fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, String> {
        let Some(fd) = self.master else {
            return Ok(Vec::new());
        };
        let deadline = Instant::now() + timeout;
        let mut buf = [0_u8; 4096];
        loop {
            match unistd::read(fd, &mut buf) {
                Ok(0) => {
                    self.enter_eof()?;
                    return Ok(Vec::new());
                }
                Ok(n) => return Ok(buf[..n].to_vec()),
                // The last slave descriptor closing surfaces as EIO on Linux.
                Err(Errno::EIO) => {
                    self.enter_eof()?;
                    return Ok(Vec::new());
                }
                Err(Errno::EAGAIN) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(Vec::new());
                    }
                    let millis = remaining.as_millis().min(i32::MAX as u128) as i32;
                    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
                    match poll(&mut fds, millis.max(1)) {
                        Ok(0) => return Ok(Vec::new()),
                        Ok(_) => (),
                        Err(Errno::EINTR) => (),
                        Err(e) => return Err(format!("poll on pty failed: {e}")),
                    }
                }
                Err(Errno::EINTR) => (),
                Err(e) => return Err(format!("read from pty failed: {e}")),
            }
        }
    }

    fn enter_eof(&mut self) -> Result<(), String> {
        if let Some(fd) = self.master.take() {
            let _ = unistd::close(fd);
        }
        self.reap_blocking()
    }

    fn reap_blocking(&mut self) -> Result<(), String> {
        if self.status.is_some() {
            return Ok(());
        }
        let status = waitpid(self.pid, None)
            .map_err(|e| format!("waitpid({}) failed: {e}", self.pid))?;
        self.status = Some(exit_code(status));
        debug!("pid {} exited with status {:?}", self.pid, self.status);
        Ok(())
    }

    fn try_reap(&mut self) -> Result<bool, String> {
        if self.status.is_some() {
            return Ok(true);
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(false),
            Ok(status) => {
                self.status = Some(exit_code(status));
                Ok(true)
            }
            Err(e) => Err(format!("waitpid({}) failed: {e}", self.pid)),
        }
    }

    ///
    /// Terminates the child if it is still running and reaps it. SIGINT first; if the child has
    /// not exited within the graceful shutdown timeout, SIGKILL. Returns the exit code.
    ///
    pub fn close(&mut self) -> Result<i32, String> {
        // A child still parked in its setup stub would never see a signal's default
        // disposition take effect before exec; dropping the channel unparks it.
        if !self.released {
            self.ipc = None;
            self.released = true;
        }

        if self.status.is_none() {
            let _ = kill(self.pid, Signal::SIGINT);
            let deadline = Instant::now() + self.graceful_shutdown_timeout;
            while !self.try_reap()? {
                if Instant::now() >= deadline {
                    warn!(
                        "pid {} did not exit after SIGINT; sending SIGKILL",
                        self.pid
                    );
                    let _ = kill(self.pid, Signal::SIGKILL);
                    self.reap_blocking()?;
                    break;
                }
                std::thread::sleep(GRACEFUL_SHUTDOWN_POLL_TIME);
            }
        }

        if let Some(fd) = self.master.take() {
            let _ = unistd::close(fd);
        }
        Ok(self.status.expect("child was reaped above"))
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = self.reap_blocking();
        }
        if let Some(fd) = self.master.take() {
            let _ = unistd::close(fd);
        }
    }
}

fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
        _ => 1,
    }
}

fn set_cloexec(fd: RawFd) -> Result<(), String> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(|_| ())
        .map_err(|e| format!("fcntl(F_SETFD) failed: {e}"))
}

fn set_nonblocking(fd: RawFd) -> Result<(), String> {
    fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
        .map(|_| ())
        .map_err(|e| format!("fcntl(F_SETFL) failed: {e}"))
}

pub fn termios_bytes(termios: &libc::termios) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            termios as *const libc::termios as *const u8,
            mem::size_of::<libc::termios>(),
        )
    }
}

pub fn termios_from_bytes(bytes: &[u8]) -> Result<libc::termios, String> {
    if bytes.len() != mem::size_of::<libc::termios>() {
        return Err(format!(
            "Terminal attribute payload has size {}, expected {}",
            bytes.len(),
            mem::size_of::<libc::termios>()
        ));
    }
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const libc::termios) })
}

///
/// The child side of spawn, between fork and exec. Establishes the terminal, services the
/// attribute-exchange protocol until the parent releases it, then execs. Never returns.
///
fn child_main(
    slave: RawFd,
    master: RawFd,
    child_fd: RawFd,
    parent_fd: RawFd,
    argv: &[CString],
) -> ! {
    let _ = unistd::close(master);
    let _ = unistd::close(parent_fd);

    // The channel is close-on-exec, so a successful exec closes it for us; keeping it open
    // until then lets an exec failure still be reported.
    let mut channel = Channel::from_raw_fd(child_fd);
    match child_setup(slave, &mut channel, argv) {
        Ok(never) => match never {},
        Err(msg) => {
            // Best effort: the parent may already be gone.
            let _ = channel.send(Tag::Error, msg.as_bytes());
            unsafe { libc::_exit(127) }
        }
    }
}

enum Never {}

fn child_setup(slave: RawFd, channel: &mut Channel, argv: &[CString]) -> Result<Never, String> {
    unistd::setsid().map_err(|e| format!("setsid failed: {e}"))?;
    if unsafe { libc::ioctl(slave, libc::TIOCSCTTY, 0) } == -1 {
        return Err(format!(
            "ioctl(TIOCSCTTY) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    for stdio in 0..3 {
        unistd::dup2(slave, stdio).map_err(|e| format!("dup2 failed: {e}"))?;
    }
    if slave > 2 {
        let _ = unistd::close(slave);
    }

    // Snapshot so the inquiry handler reflects attribute changes applied in between.
    let snapshot: Termios = tcgetattr(0).map_err(|e| format!("tcgetattr failed: {e}"))?;
    let current = Rc::new(RefCell::new(snapshot));

    let current2 = current.clone();
    channel.set_handler(
        Tag::TermiosInquiry,
        Box::new(move |chan, _payload| {
            let attrs: libc::termios = current2.borrow().clone().into();
            chan.send(Tag::TermiosSet, termios_bytes(&attrs))
        }),
    );
    let current3 = current.clone();
    channel.set_handler(
        Tag::TermiosSet,
        Box::new(move |chan, payload| {
            let attrs = termios_from_bytes(payload)?;
            let termios: Termios = attrs.into();
            tcsetattr(0, SetArg::TCSANOW, &termios)
                .map_err(|e| format!("tcsetattr failed: {e}"))?;
            *current3.borrow_mut() = termios;
            chan.send(Tag::TermiosAck, b"")
        }),
    );

    channel.send(Tag::Release, b"")?;
    channel.recv(Tag::Release)?;

    unsafe {
        signal(Signal::SIGINT, SigHandler::SigDfl)
            .map_err(|e| format!("Failed to restore SIGINT: {e}"))?;
    }
    unistd::execvp(&argv[0], argv).map_err(|e| format!("execvp {:?} failed: {e}", argv[0]))?;
    unreachable!("execvp returned without error");
}
