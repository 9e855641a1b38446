// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;

use log::debug;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd;
use num_enum::{IntoPrimitive, TryFromPrimitive};

///
/// A duplex message channel over one end of a Unix socket pair, used to synchronize a parent
/// with a forked child before it execs.
///
/// Each message on the wire is a native-endian header `{size: u32, tag: u32}` followed by
/// `size - 8` payload bytes, where `size` counts the header itself. A tag of zero is reserved
/// and never appears on the wire.
///
/// Incoming messages dispatch to a handler registered for their tag; messages without a handler
/// are queued in arrival order. The channel drains pending input before every send and whenever
/// its descriptor polls readable, so callbacks observe messages promptly regardless of which
/// direction is active.
///
pub struct Channel {
    fd: RawFd,
    handlers: HashMap<Tag, Handler>,
    queue: VecDeque<Message>,
    rdbuf: Vec<u8>,
    eof: bool,
}

pub const HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Tag {
    /// Bidirectional synchronization: the child announces readiness, the parent permits exec.
    Release = 1,
    /// Child-to-parent failure report; the payload is a UTF-8 string.
    Error = 2,
    /// Parent asks the child for its current terminal attributes; empty payload.
    TermiosInquiry = 3,
    /// Terminal attributes in the platform's native layout, in either direction.
    TermiosSet = 4,
    /// Child acknowledges an applied TermiosSet; empty payload.
    TermiosAck = 5,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

///
/// Handlers receive the channel itself so that they can reply inline, as the terminal-attribute
/// exchange requires.
///
pub type Handler = Box<dyn FnMut(&mut Channel, &[u8]) -> Result<(), String>>;

impl Channel {
    ///
    /// Wraps an already-connected socket. The descriptor must be non-blocking; both ends of a
    /// `pair` are.
    ///
    pub fn from_raw_fd(fd: RawFd) -> Channel {
        Channel {
            fd,
            handlers: HashMap::new(),
            queue: VecDeque::new(),
            rdbuf: Vec::new(),
            eof: false,
        }
    }

    ///
    /// A connected pair of channels, non-blocking and close-on-exec on both ends.
    ///
    pub fn pair() -> Result<(Channel, Channel), String> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| format!("Failed to create socket pair: {e}"))?;
        Ok((Channel::from_raw_fd(a), Channel::from_raw_fd(b)))
    }

    ///
    /// The underlying descriptor, for callers that multiplex the channel with other IO.
    ///
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.eof
    }

    ///
    /// Registers the handler for a tag, replacing any existing one.
    ///
    pub fn set_handler(&mut self, tag: Tag, handler: Handler) {
        self.handlers.insert(tag, handler);
    }

    ///
    /// Sends one message, blocking (via poll) until the full frame is written.
    ///
    pub fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<(), String> {
        self.drain()?;
        if self.eof {
            return Err("IPC channel is closed".to_owned());
        }

        let total = HEADER_SIZE + payload.len();
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&(total as u32).to_ne_bytes());
        frame.extend_from_slice(&u32::from(tag).to_ne_bytes());
        frame.extend_from_slice(payload);

        let mut written = 0;
        while written < frame.len() {
            match unistd::write(self.fd, &frame[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) => self.wait(PollFlags::POLLOUT)?,
                Err(Errno::EINTR) => (),
                Err(e) => {
                    self.eof = true;
                    return Err(format!("IPC send failed: {e}"));
                }
            }
        }
        Ok(())
    }

    ///
    /// Reads whatever input is pending without blocking, dispatching complete messages to
    /// handlers and queueing the rest. On end-of-file the channel enters the closed state:
    /// sends and blocking receives fail from then on, but queued messages remain poppable.
    ///
    pub fn drain(&mut self) -> Result<(), String> {
        let mut buf = [0_u8; 4096];
        while !self.eof {
            match unistd::read(self.fd, &mut buf) {
                Ok(0) => {
                    debug!("IPC peer closed the channel");
                    self.eof = true;
                }
                Ok(n) => {
                    self.rdbuf.extend_from_slice(&buf[..n]);
                    self.dispatch()?;
                }
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => (),
                Err(e) => {
                    self.eof = true;
                    return Err(format!("IPC read failed: {e}"));
                }
            }
        }
        self.dispatch()?;
        if self.eof && !self.rdbuf.is_empty() {
            return Err("IPC channel closed mid-message".to_owned());
        }
        Ok(())
    }

    ///
    /// Blocks until a message with the given tag arrives and returns its payload. A queued
    /// message at the head with a different tag is a protocol violation.
    ///
    pub fn recv(&mut self, tag: Tag) -> Result<Vec<u8>, String> {
        loop {
            self.drain()?;
            if let Some(msg) = self.queue.pop_front() {
                if msg.tag == tag {
                    return Ok(msg.payload);
                }
                return Err(format!(
                    "IPC protocol error: received {:?} while waiting for {:?}",
                    msg.tag, tag
                ));
            }
            if self.eof {
                return Err("IPC channel is closed".to_owned());
            }
            self.wait(PollFlags::POLLIN)?;
        }
    }

    ///
    /// Dequeues the oldest queued message, if any. Usable after the channel has closed.
    ///
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    ///
    /// Shuts down the write side, drains until the peer closes, then closes the descriptor.
    ///
    pub fn close(mut self) -> Result<(), String> {
        let _ = nix::sys::socket::shutdown(self.fd, nix::sys::socket::Shutdown::Write);
        while !self.eof {
            self.wait(PollFlags::POLLIN)?;
            self.drain()?;
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Result<(), String> {
        while self.rdbuf.len() >= HEADER_SIZE {
            let size = u32::from_ne_bytes(self.rdbuf[0..4].try_into().unwrap()) as usize;
            if size < HEADER_SIZE {
                self.eof = true;
                self.rdbuf.clear();
                return Err(format!(
                    "IPC protocol error: message size {size} is smaller than its header"
                ));
            }
            let raw_tag = u32::from_ne_bytes(self.rdbuf[4..8].try_into().unwrap());
            let tag = Tag::try_from(raw_tag).map_err(|_| {
                self.eof = true;
                format!("IPC protocol error: invalid message tag {raw_tag}")
            })?;
            if self.rdbuf.len() < size {
                break;
            }

            let payload = self.rdbuf[HEADER_SIZE..size].to_vec();
            self.rdbuf.drain(..size);
            if let Some(mut handler) = self.handlers.remove(&tag) {
                let result = handler(self, &payload);
                self.handlers.entry(tag).or_insert(handler);
                result?;
            } else {
                self.queue.push_back(Message { tag, payload });
            }
        }
        Ok(())
    }

    fn wait(&self, flags: PollFlags) -> Result<(), String> {
        let mut fds = [PollFd::new(self.fd, flags)];
        loop {
            match poll(&mut fds, -1) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => (),
                Err(e) => return Err(format!("IPC poll failed: {e}")),
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = unistd::close(self.fd);
    }
}

#[cfg(test)]
mod tests;
