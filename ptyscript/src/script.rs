// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The script language for driving a scripted child: one statement per line, with `{ ... }`
//! blocks for match callbacks, alternation and failure handling. Parsing produces the
//! statement sequence that the driver queues and executes; each statement carries its source
//! line for diagnostics.

use std::fs;
use std::path::Path;

use crate::matcher::MatcherKind;

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Fork the scripted child.
    Spawn { argv: Vec<String> },
    /// Consume buffered output up to and including the first occurrence of the pattern.
    Match {
        pattern: String,
        matcher: Option<MatcherKind>,
        timeout: Option<f64>,
        body: Vec<Stmt>,
    },
    /// Alternation: complete when any arm's pattern matches. Arms must be `match` statements.
    One { arms: Vec<Stmt> },
    /// Expect the child's output to reach end-of-file.
    Eof { timeout: Option<f64> },
    /// Write to the terminal, translating `^X` control sequences unless raw mode is on.
    Write { text: String },
    /// Defer a write until the next match action begins polling.
    Enqueue { text: String },
    Raw { on: bool },
    /// Exchange terminal attributes with the not-yet-released child.
    Stty { args: Vec<String> },
    /// Rate-limit subsequent writes: chunks of `bytes` with `delay` seconds between them.
    Cfg { bytes: Option<usize>, delay: Option<f64> },
    /// Default timeout for actions that follow.
    Timeout { secs: f64 },
    /// Default matcher for actions that follow.
    Matcher { kind: MatcherKind },
    Sleep { secs: f64 },
    Log { message: String },
    /// Hexdump the current output buffer to the log.
    Debug,
    /// Permit the child to exec now rather than at the first interaction.
    Release,
    Exit { code: i32 },
    /// Install the failure handler block.
    Fail { body: Vec<Stmt> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub statement: Statement,
    pub line: u32,
}

#[derive(Clone, Debug)]
pub struct Script {
    /// Display name for diagnostics, normally the file path.
    pub name: String,
    pub statements: Vec<Stmt>,
}

pub fn parse_file(path: &Path) -> Result<Script, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read script {}: {e}", path.display()))?;
    parse_source(&text, &path.display().to_string())
}

pub fn parse_source(text: &str, name: &str) -> Result<Script, String> {
    let mut parser = Parser {
        name,
        lines: text.lines().collect(),
        pos: 0,
    };
    // An interpreter line is tolerated and skipped.
    if parser.lines.first().is_some_and(|l| l.starts_with("#!")) {
        parser.pos = 1;
    }
    let statements = parser.statements(None)?;
    Ok(Script {
        name: name.to_owned(),
        statements,
    })
}

struct Parser<'a> {
    name: &'a str,
    lines: Vec<&'a str>,
    pos: usize,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Opt(String, String),
    Open,
}

impl<'a> Parser<'a> {
    ///
    /// Parses statements until end-of-input, or until the closing brace of the block opened at
    /// `open_line`.
    ///
    fn statements(&mut self, open_line: Option<u32>) -> Result<Vec<Stmt>, String> {
        let mut out = Vec::new();
        loop {
            let Some(&raw) = self.lines.get(self.pos) else {
                return match open_line {
                    Some(line) => Err(self.err(line, "Unterminated block")),
                    None => Ok(out),
                };
            };
            self.pos += 1;
            let line_no = self.pos as u32;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "}" {
                return match open_line {
                    Some(_) => Ok(out),
                    None => Err(self.err(line_no, "Unmatched '}'")),
                };
            }
            out.push(self.statement(line, line_no)?);
        }
    }

    fn statement(&mut self, line: &str, line_no: u32) -> Result<Stmt, String> {
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (line, ""),
        };

        // Spawn takes a full command line, split shell-style.
        if keyword == "spawn" {
            let argv = shlex::split(rest)
                .ok_or_else(|| self.err(line_no, "Malformed spawn command line"))?;
            if argv.is_empty() {
                return Err(self.err(line_no, "spawn requires a command"));
            }
            return Ok(Stmt {
                statement: Statement::Spawn { argv },
                line: line_no,
            });
        }

        let mut tokens = tokenize(rest).map_err(|e| self.err(line_no, &e))?;
        let opens_block = tokens.last() == Some(&Token::Open);
        if opens_block {
            tokens.pop();
        }

        let statement = match keyword {
            "match" => {
                let pattern = take_str(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "match requires a quoted pattern"))?;
                let (matcher, timeout) = self.action_opts(&tokens, line_no)?;
                let body = if opens_block {
                    self.statements(Some(line_no))?
                } else {
                    Vec::new()
                };
                Statement::Match {
                    pattern,
                    matcher,
                    timeout,
                    body,
                }
            }
            "one" => {
                if !opens_block {
                    return Err(self.err(line_no, "one requires a block"));
                }
                let arms = self.statements(Some(line_no))?;
                for arm in &arms {
                    if !matches!(arm.statement, Statement::Match { .. }) {
                        return Err(self.err(
                            arm.line,
                            "Only match actions are permitted inside a one block",
                        ));
                    }
                }
                Statement::One { arms }
            }
            "fail" => {
                if !opens_block {
                    return Err(self.err(line_no, "fail requires a block"));
                }
                Statement::Fail {
                    body: self.statements(Some(line_no))?,
                }
            }
            "eof" => {
                let (matcher, timeout) = self.action_opts(&tokens, line_no)?;
                if matcher.is_some() {
                    return Err(self.err(line_no, "eof takes no matcher"));
                }
                Statement::Eof { timeout }
            }
            "write" => Statement::Write {
                text: take_str(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "write requires a quoted string"))?,
            },
            "enqueue" => Statement::Enqueue {
                text: take_str(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "enqueue requires a quoted string"))?,
            },
            "log" => Statement::Log {
                message: take_str(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "log requires a quoted string"))?,
            },
            "raw" => match take_word(&mut tokens).as_deref() {
                Some("on") => Statement::Raw { on: true },
                Some("off") => Statement::Raw { on: false },
                _ => return Err(self.err(line_no, "raw requires 'on' or 'off'")),
            },
            "stty" => {
                let args: Vec<String> = tokens
                    .iter()
                    .map(|t| match t {
                        Token::Word(w) => Ok(w.clone()),
                        _ => Err(self.err(line_no, "stty takes flag names")),
                    })
                    .collect::<Result<_, String>>()?;
                if args.is_empty() {
                    return Err(self.err(line_no, "stty requires at least one flag"));
                }
                Statement::Stty { args }
            }
            "cfg" => {
                let mut bytes = None;
                let mut delay = None;
                for token in &tokens {
                    match token {
                        Token::Opt(k, v) if k == "rate.bytes" => {
                            bytes = Some(v.parse::<usize>().map_err(|_| {
                                self.err(line_no, &format!("Bad rate.bytes value '{v}'"))
                            })?);
                        }
                        Token::Opt(k, v) if k == "rate.delay" => {
                            delay = Some(self.seconds(v, line_no)?);
                        }
                        Token::Opt(k, _) => {
                            return Err(
                                self.err(line_no, &format!("Unknown cfg setting '{k}'"))
                            );
                        }
                        _ => return Err(self.err(line_no, "cfg takes key=value settings")),
                    }
                }
                Statement::Cfg { bytes, delay }
            }
            "timeout" => {
                let value = take_word(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "timeout requires a value in seconds"))?;
                Statement::Timeout {
                    secs: self.seconds(&value, line_no)?,
                }
            }
            "matcher" => {
                let value = take_word(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "matcher requires a name"))?;
                Statement::Matcher {
                    kind: MatcherKind::parse(&value).map_err(|e| self.err(line_no, &e))?,
                }
            }
            "sleep" => {
                let value = take_word(&mut tokens)
                    .ok_or_else(|| self.err(line_no, "sleep requires a value in seconds"))?;
                Statement::Sleep {
                    secs: self.seconds(&value, line_no)?,
                }
            }
            "debug" => Statement::Debug,
            "release" => Statement::Release,
            "exit" => {
                let code = match take_word(&mut tokens) {
                    Some(word) => word
                        .parse::<i32>()
                        .map_err(|_| self.err(line_no, &format!("Bad exit code '{word}'")))?,
                    None => 0,
                };
                Statement::Exit { code }
            }
            other => {
                return Err(self.err(line_no, &format!("Unknown statement '{other}'")));
            }
        };

        if opens_block && !matches!(keyword, "match" | "one" | "fail") {
            return Err(self.err(line_no, &format!("'{keyword}' does not take a block")));
        }
        Ok(Stmt {
            statement,
            line: line_no,
        })
    }

    fn action_opts(
        &self,
        tokens: &[Token],
        line_no: u32,
    ) -> Result<(Option<MatcherKind>, Option<f64>), String> {
        let mut matcher = None;
        let mut timeout = None;
        for token in tokens {
            match token {
                Token::Opt(k, v) if k == "timeout" => timeout = Some(self.seconds(v, line_no)?),
                Token::Opt(k, v) if k == "matcher" => {
                    matcher = Some(MatcherKind::parse(v).map_err(|e| self.err(line_no, &e))?);
                }
                Token::Opt(k, _) => {
                    return Err(self.err(line_no, &format!("Unknown option '{k}'")));
                }
                _ => return Err(self.err(line_no, "Unexpected argument")),
            }
        }
        Ok((matcher, timeout))
    }

    fn seconds(&self, value: &str, line_no: u32) -> Result<f64, String> {
        let secs = value
            .parse::<f64>()
            .map_err(|_| self.err(line_no, &format!("Bad duration '{value}'")))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(self.err(line_no, "Durations must be non-negative"));
        }
        Ok(secs)
    }

    fn err(&self, line: u32, msg: &str) -> String {
        format!("{}:{line}: {msg}", self.name)
    }
}

fn take_str(tokens: &mut Vec<Token>) -> Option<String> {
    match tokens.first() {
        Some(Token::Str(_)) => match tokens.remove(0) {
            Token::Str(s) => Some(s),
            _ => unreachable!(),
        },
        _ => None,
    }
}

fn take_word(tokens: &mut Vec<Token>) -> Option<String> {
    match tokens.first() {
        Some(Token::Word(_)) => match tokens.remove(0) {
            Token::Word(w) => Some(w),
            _ => unreachable!(),
        },
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '{' {
            chars.next();
            tokens.push(Token::Open);
        } else if c == '}' {
            return Err("'}' must appear on its own line".to_owned());
        } else if c == '"' {
            chars.next();
            tokens.push(Token::Str(quoted(&mut chars)?));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '{' || c == '}' {
                    break;
                }
                chars.next();
                if c == '=' {
                    let value = if chars.peek() == Some(&'"') {
                        chars.next();
                        quoted(&mut chars)?
                    } else {
                        let mut v = String::new();
                        while let Some(&c) = chars.peek() {
                            if c.is_whitespace() || c == '{' || c == '}' {
                                break;
                            }
                            v.push(c);
                            chars.next();
                        }
                        v
                    };
                    tokens.push(Token::Opt(word, value));
                    word = String::new();
                    break;
                }
                word.push(c);
            }
            if !word.is_empty() {
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

fn quoted(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String, String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("Unterminated string".to_owned()),
            Some('"') => return Ok(out),
            Some('\\') => match chars.next() {
                None => return Err("Unterminated string".to_owned()),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('e') => out.push('\x1b'),
                Some('0') => out.push('\0'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                // Unknown escapes pass through, so `\^` survives for the control-character
                // translator.
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
            },
            Some(c) => out.push(c),
        }
    }
}

