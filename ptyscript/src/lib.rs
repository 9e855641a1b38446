// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Scripted driving of a child process under a pseudo-terminal: spawn the child with a
//! synchronized setup handshake, then run a declarative match/expect script against its
//! output.

pub mod driver;
pub mod matcher;
pub mod process;
pub mod script;

pub use driver::{Driver, DEFAULT_TIMEOUT};
pub use matcher::{Matcher, MatcherKind};
pub use process::PtyProcess;
pub use script::{parse_file, parse_source, Script};

#[cfg(test)]
mod script_tests;
