// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::{Duration, Instant};

use log::info;

use crate::matcher::{Matcher, MatcherKind};
use crate::process::PtyProcess;
use crate::script::{Script, Statement, Stmt};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

///
/// An executable step compiled from one script statement. Timeouts and matcher defaults are
/// resolved at queue time: a `timeout` or `matcher` directive affects the actions created
/// after it.
///
#[derive(Clone, Debug)]
struct Action {
    kind: Kind,
    timeout: Duration,
    line: u32,
}

#[derive(Clone, Debug)]
enum Kind {
    Spawn { argv: Vec<String> },
    Match { pattern: String, matcher: Matcher, body: Vec<Action> },
    One { arms: Vec<Action> },
    Eof,
    Write { text: String },
    Enqueue { text: String },
    Raw { on: bool },
    Stty { args: Vec<String> },
    Cfg { bytes: Option<usize>, delay: Option<f64> },
    Sleep { secs: f64 },
    Log { message: String },
    Debug,
    Release,
    Exit { code: i32 },
    Fail { body: Vec<Action> },
}

///
/// An ordered collection of actions with a processing policy: sequential contexts run actions
/// in order; an alternation context completes when any of its match arms succeeds. Nested
/// blocks push further contexts on the driver's stack.
///
#[derive(Debug)]
struct Context {
    actions: Vec<Action>,
    cursor: usize,
    mode: Mode,
}

#[derive(Debug, Eq, PartialEq)]
enum Mode {
    Sequential,
    Alternation,
}

impl Context {
    fn sequential(actions: Vec<Action>) -> Context {
        Context {
            actions,
            cursor: 0,
            mode: Mode::Sequential,
        }
    }

    fn alternation(arms: Vec<Action>) -> Context {
        Context {
            actions: arms,
            cursor: 0,
            mode: Mode::Alternation,
        }
    }

    fn done(&self) -> bool {
        self.cursor >= self.actions.len()
    }
}

#[derive(Clone, Copy, Debug)]
struct Rate {
    bytes: usize,
    delay: Duration,
}

#[derive(Clone, Copy)]
struct QueueState {
    timeout: Duration,
    matcher: MatcherKind,
}

///
/// Drives a parsed script against a child process on a PTY.
///
pub struct Driver {
    name: String,
    process: Option<PtyProcess>,
    buffer: Vec<u8>,
    raw: bool,
    rate: Option<Rate>,
    pending: Vec<u8>,
    fail_handler: Option<Vec<Action>>,
    exit: Option<i32>,
}

impl Driver {
    ///
    /// Runs a script to completion and returns its exit code. The child, if one was spawned
    /// and is still running, is terminated before returning.
    ///
    pub fn run(script: &Script, default_timeout: Option<Duration>) -> Result<i32, String> {
        let mut state = QueueState {
            timeout: default_timeout.unwrap_or(DEFAULT_TIMEOUT),
            matcher: MatcherKind::Plain,
        };
        let actions = compile(&mut state, &script.statements, &script.name)?;

        let mut driver = Driver {
            name: script.name.clone(),
            process: None,
            buffer: Vec::new(),
            raw: false,
            rate: None,
            pending: Vec::new(),
            fail_handler: None,
            exit: None,
        };
        let result = driver.drive(actions);
        let close_result = match driver.process.take() {
            Some(mut process) => process.close().map(|_| ()),
            None => Ok(()),
        };
        result?;
        close_result?;
        Ok(driver.exit.unwrap_or(0))
    }

    ///
    /// The drive stage: consume the topmost context until it completes, then pop. New contexts
    /// pushed by match callbacks or alternation blocks run before their parent resumes.
    ///
    fn drive(&mut self, actions: Vec<Action>) -> Result<(), String> {
        let mut stack = vec![Context::sequential(actions)];
        while self.exit.is_none() {
            let Some(mut context) = stack.pop() else {
                break;
            };
            if context.done() {
                continue;
            }
            let push = match context.mode {
                Mode::Sequential => self.step(&mut context)?,
                Mode::Alternation => self.step_one(&mut context)?,
            };
            if !context.done() {
                stack.push(context);
            }
            if let Some(child) = push {
                stack.push(child);
            }
        }
        Ok(())
    }

    ///
    /// Processes the single action at the cursor of a sequential context.
    ///
    fn step(&mut self, context: &mut Context) -> Result<Option<Context>, String> {
        let action = context.actions[context.cursor].clone();
        context.cursor += 1;
        match action.kind {
            Kind::Spawn { ref argv } => {
                if self.process.is_some() {
                    return Err(self.diag(action.line, "A process is already spawned"));
                }
                self.process = Some(
                    PtyProcess::spawn(argv).map_err(|e| self.diag(action.line, &e))?,
                );
                Ok(None)
            }
            Kind::Match {
                ref pattern,
                ref matcher,
                ref body,
            } => {
                let desc = format!("match \"{}\"", pattern.escape_debug());
                self.expect(matcher, &desc, action.timeout, action.line)?;
                if self.exit.is_some() || body.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Context::sequential(body.clone())))
                }
            }
            Kind::One { ref arms } => Ok(Some(Context::alternation(arms.clone()))),
            Kind::Eof => {
                self.expect_eof(action.timeout, action.line)?;
                Ok(None)
            }
            Kind::Write { ref text } => {
                let data = translate(text, self.raw);
                self.write_bytes(&data, action.line)?;
                Ok(None)
            }
            Kind::Enqueue { ref text } => {
                let mut data = translate(text, self.raw);
                self.pending.append(&mut data);
                Ok(None)
            }
            Kind::Raw { on } => {
                self.raw = on;
                Ok(None)
            }
            Kind::Stty { ref args } => {
                self.apply_stty(args, action.line)?;
                Ok(None)
            }
            Kind::Cfg { bytes, delay } => {
                let current = self.rate.unwrap_or(Rate {
                    bytes: 0,
                    delay: Duration::ZERO,
                });
                let rate = Rate {
                    bytes: bytes.unwrap_or(current.bytes),
                    delay: delay
                        .map(Duration::from_secs_f64)
                        .unwrap_or(current.delay),
                };
                self.rate = if rate.bytes == 0 { None } else { Some(rate) };
                Ok(None)
            }
            Kind::Sleep { secs } => {
                std::thread::sleep(Duration::from_secs_f64(secs));
                Ok(None)
            }
            Kind::Log { ref message } => {
                info!("{message}");
                Ok(None)
            }
            Kind::Debug => {
                info!("buffer ({} bytes):\n{}", self.buffer.len(), hexdump(&self.buffer));
                Ok(None)
            }
            Kind::Release => {
                self.release(action.line)?;
                Ok(None)
            }
            Kind::Exit { code } => {
                self.exit = Some(code);
                Ok(None)
            }
            Kind::Fail { ref body } => {
                self.fail_handler = Some(body.clone());
                Ok(None)
            }
        }
    }

    ///
    /// Processes an alternation context in full: read until any arm matches, or until the
    /// shortest arm timeout elapses.
    ///
    fn step_one(&mut self, context: &mut Context) -> Result<Option<Context>, String> {
        let line = context.actions.first().map(|a| a.line).unwrap_or(0);
        self.ensure_released(line)?;
        self.flush_pending(line)?;

        let shortest = context
            .actions
            .iter()
            .map(|a| a.timeout)
            .min()
            .unwrap_or(DEFAULT_TIMEOUT);
        let deadline = Instant::now() + shortest;
        loop {
            for action in &context.actions {
                let Kind::Match {
                    ref matcher,
                    ref body,
                    ..
                } = action.kind
                else {
                    // The parser rejects anything else inside a one block.
                    continue;
                };
                if let Some((_, end)) = matcher.find(&self.buffer) {
                    self.buffer.drain(..end);
                    let body = body.clone();
                    context.cursor = context.actions.len();
                    return if body.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(Context::sequential(body)))
                    };
                }
            }

            let eof = self.process.as_ref().is_some_and(|p| p.eof());
            if eof {
                context.cursor = context.actions.len();
                return self.failed(line, "one", "failed: process output reached EOF");
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = self
                .process
                .as_mut()
                .expect("ensure_released checked the process")
                .read(remaining)?;
            if !chunk.is_empty() {
                self.buffer.extend_from_slice(&chunk);
            } else if Instant::now() >= deadline
                && !self.process.as_ref().is_some_and(|p| p.eof())
            {
                context.cursor = context.actions.len();
                return self.failed(line, "one", &format!("timed out after {shortest:?}"));
            }
        }
    }

    ///
    /// Consumes buffered output until the pattern first-matches, trimming the buffer through
    /// the end of the match. Times out or fails at EOF via the failure path.
    ///
    fn expect(
        &mut self,
        matcher: &Matcher,
        desc: &str,
        timeout: Duration,
        line: u32,
    ) -> Result<(), String> {
        self.ensure_released(line)?;
        self.flush_pending(line)?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((_, end)) = matcher.find(&self.buffer) {
                self.buffer.drain(..end);
                return Ok(());
            }
            if self.process.as_ref().is_some_and(|p| p.eof()) {
                return self
                    .failed(line, desc, "failed: process output reached EOF")
                    .map(|_| ());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = self
                .process
                .as_mut()
                .expect("ensure_released checked the process")
                .read(remaining)?;
            if !chunk.is_empty() {
                self.buffer.extend_from_slice(&chunk);
            } else if Instant::now() >= deadline
                && !self.process.as_ref().is_some_and(|p| p.eof())
            {
                return self
                    .failed(line, desc, &format!("timed out after {timeout:?}"))
                    .map(|_| ());
            }
        }
    }

    fn expect_eof(&mut self, timeout: Duration, line: u32) -> Result<(), String> {
        self.ensure_released(line)?;
        self.flush_pending(line)?;
        let deadline = Instant::now() + timeout;
        loop {
            let Some(process) = self.process.as_mut() else {
                return Ok(());
            };
            if process.eof() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = process.read(remaining)?;
            if !chunk.is_empty() {
                self.buffer.extend_from_slice(&chunk);
            } else if Instant::now() >= deadline && !process.eof() {
                return self
                    .failed(line, "eof", &format!("timed out after {timeout:?}"))
                    .map(|_| ());
            }
        }
    }

    ///
    /// The failure path for match and eof actions. The installed fail handler, if any, runs
    /// once; it may rescue the script by exiting, otherwise the original diagnostic
    /// propagates.
    ///
    fn failed(
        &mut self,
        line: u32,
        desc: &str,
        why: &str,
    ) -> Result<Option<Context>, String> {
        let diag = self.diag(line, &format!("{desc} {why}"));
        if let Some(handler) = self.fail_handler.take() {
            info!("{diag}; running failure handler");
            self.drive(handler)?;
            if self.exit.is_some() {
                return Ok(None);
            }
        }
        Err(diag)
    }

    fn release(&mut self, line: u32) -> Result<(), String> {
        let Some(process) = self.process.as_mut() else {
            return Err(format!("{}:{line}: No process has been spawned", self.name));
        };
        if !process.released() {
            process.release().map_err(|e| format!("{}:{line}: {e}", self.name))?;
        }
        Ok(())
    }

    fn ensure_released(&mut self, line: u32) -> Result<(), String> {
        if self.process.is_none() {
            return Err(format!("{}:{line}: No process has been spawned", self.name));
        }
        self.release(line)
    }

    fn flush_pending(&mut self, line: u32) -> Result<(), String> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.pending);
        self.write_bytes(&data, line)
    }

    fn write_bytes(&mut self, data: &[u8], line: u32) -> Result<(), String> {
        self.ensure_released(line)?;
        let name = self.name.clone();
        let rate = self.rate;
        let process = self.process.as_mut().expect("ensure_released checked");
        match rate {
            Some(rate) => {
                for chunk in data.chunks(rate.bytes) {
                    process
                        .write(chunk)
                        .map_err(|e| format!("{name}:{line}: {e}"))?;
                    std::thread::sleep(rate.delay);
                }
            }
            None => process
                .write(data)
                .map_err(|e| format!("{name}:{line}: {e}"))?,
        }
        Ok(())
    }

    fn apply_stty(&mut self, args: &[String], line: u32) -> Result<(), String> {
        let name = self.name.clone();
        let Some(process) = self.process.as_mut() else {
            return Err(format!("{name}:{line}: No process has been spawned"));
        };
        let mut termios = process
            .inquire_termios()
            .map_err(|e| format!("{name}:{line}: {e}"))?;
        for arg in args {
            stty_flag(&mut termios, arg).map_err(|e| format!("{name}:{line}: {e}"))?;
        }
        process
            .set_termios(&termios)
            .map_err(|e| format!("{name}:{line}: {e}"))
    }

    fn diag(&self, line: u32, msg: &str) -> String {
        format!("{}:{line}: {msg}", self.name)
    }
}

///
/// The queue stage: lower statements to actions, resolving timeout and matcher defaults as
/// directives are encountered. Nested blocks compile with the defaults in effect at their
/// position.
///
fn compile(
    state: &mut QueueState,
    statements: &[Stmt],
    name: &str,
) -> Result<Vec<Action>, String> {
    let mut actions = Vec::new();
    for stmt in statements {
        let line = stmt.line;
        let kind = match &stmt.statement {
            Statement::Timeout { secs } => {
                state.timeout = Duration::from_secs_f64(*secs);
                continue;
            }
            Statement::Matcher { kind } => {
                state.matcher = *kind;
                continue;
            }
            Statement::Spawn { argv } => Kind::Spawn { argv: argv.clone() },
            Statement::Match {
                pattern,
                matcher,
                timeout,
                body,
            } => {
                let compiled =
                    Matcher::compile(matcher.unwrap_or(state.matcher), pattern)
                        .map_err(|e| format!("{name}:{line}: {e}"))?;
                let mut inner = *state;
                if let Some(secs) = timeout {
                    inner.timeout = Duration::from_secs_f64(*secs);
                }
                let mut body_state = inner;
                let body = compile(&mut body_state, body, name)?;
                let action = Action {
                    kind: Kind::Match {
                        pattern: pattern.clone(),
                        matcher: compiled,
                        body,
                    },
                    timeout: inner.timeout,
                    line,
                };
                actions.push(action);
                continue;
            }
            Statement::One { arms } => {
                let mut arm_state = *state;
                Kind::One {
                    arms: compile(&mut arm_state, arms, name)?,
                }
            }
            Statement::Eof { timeout } => {
                actions.push(Action {
                    kind: Kind::Eof,
                    timeout: timeout
                        .map(Duration::from_secs_f64)
                        .unwrap_or(state.timeout),
                    line,
                });
                continue;
            }
            Statement::Write { text } => Kind::Write { text: text.clone() },
            Statement::Enqueue { text } => Kind::Enqueue { text: text.clone() },
            Statement::Raw { on } => Kind::Raw { on: *on },
            Statement::Stty { args } => Kind::Stty { args: args.clone() },
            Statement::Cfg { bytes, delay } => Kind::Cfg {
                bytes: *bytes,
                delay: *delay,
            },
            Statement::Sleep { secs } => Kind::Sleep { secs: *secs },
            Statement::Log { message } => Kind::Log {
                message: message.clone(),
            },
            Statement::Debug => Kind::Debug,
            Statement::Release => Kind::Release,
            Statement::Exit { code } => Kind::Exit { code: *code },
            Statement::Fail { body } => {
                let mut body_state = *state;
                Kind::Fail {
                    body: compile(&mut body_state, body, name)?,
                }
            }
        };
        actions.push(Action {
            kind,
            timeout: state.timeout,
            line,
        });
    }
    Ok(actions)
}

///
/// Control-character translation for writes: `^X` with X in `@`..`_` becomes the control byte,
/// `\^` escapes a literal caret. Raw mode passes bytes through untouched.
///
pub fn translate(text: &str, raw: bool) -> Vec<u8> {
    if raw {
        return text.as_bytes().to_vec();
    }
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    let mut utf8 = [0_u8; 4];
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'^') {
            chars.next();
            out.push(b'^');
        } else if c == '^' {
            match chars.peek() {
                Some(&next) if ('@'..='_').contains(&next) => {
                    chars.next();
                    out.push(next as u8 - 0x40);
                }
                _ => out.push(b'^'),
            }
        } else {
            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
        }
    }
    out
}

///
/// A classic offset/hex/ascii dump, sixteen bytes per row.
///
pub fn hexdump(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for (i, row) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", i * 16);
        for j in 0..16 {
            match row.get(j) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }
            if j == 7 {
                out.push(' ');
            }
        }
        out.push(' ');
        for &b in row {
            out.push(if (0x20..0x7f).contains(&b) { b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

pub(crate) fn stty_flag(termios: &mut libc::termios, name: &str) -> Result<(), String> {
    let (clear, flag) = match name.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, name),
    };

    fn set(field: &mut libc::tcflag_t, bits: libc::tcflag_t, clear: bool) {
        if clear {
            *field &= !bits;
        } else {
            *field |= bits;
        }
    }

    match flag {
        "echo" => set(&mut termios.c_lflag, libc::ECHO, clear),
        "echoe" => set(&mut termios.c_lflag, libc::ECHOE, clear),
        "echok" => set(&mut termios.c_lflag, libc::ECHOK, clear),
        "icanon" => set(&mut termios.c_lflag, libc::ICANON, clear),
        "isig" => set(&mut termios.c_lflag, libc::ISIG, clear),
        "iexten" => set(&mut termios.c_lflag, libc::IEXTEN, clear),
        "icrnl" => set(&mut termios.c_iflag, libc::ICRNL, clear),
        "inlcr" => set(&mut termios.c_iflag, libc::INLCR, clear),
        "igncr" => set(&mut termios.c_iflag, libc::IGNCR, clear),
        "ixon" => set(&mut termios.c_iflag, libc::IXON, clear),
        "istrip" => set(&mut termios.c_iflag, libc::ISTRIP, clear),
        "opost" => set(&mut termios.c_oflag, libc::OPOST, clear),
        "onlcr" => set(&mut termios.c_oflag, libc::ONLCR, clear),
        // `raw` disables line editing, echo, signals and output processing; `-raw` restores
        // a cooked terminal.
        "raw" => {
            let cooked = clear;
            set(
                &mut termios.c_lflag,
                libc::ICANON | libc::ECHO | libc::ISIG | libc::IEXTEN,
                !cooked,
            );
            set(
                &mut termios.c_iflag,
                libc::ICRNL | libc::IXON | libc::INLCR | libc::IGNCR | libc::ISTRIP,
                !cooked,
            );
            set(&mut termios.c_oflag, libc::OPOST, !cooked);
        }
        other => return Err(format!("Unknown terminal flag '{other}'")),
    }
    Ok(())
}

