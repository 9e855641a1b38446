// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::matcher::MatcherKind;
use crate::script::{parse_source, Statement};

fn statements(text: &str) -> Vec<Statement> {
    parse_source(text, "test")
        .unwrap()
        .statements
        .into_iter()
        .map(|s| s.statement)
        .collect()
}

#[test]
fn spawn_splits_shell_style() {
    assert_eq!(
        statements("spawn sh -c \"echo hi there\""),
        vec![Statement::Spawn {
            argv: vec!["sh".to_owned(), "-c".to_owned(), "echo hi there".to_owned()],
        }]
    );
}

#[test]
fn match_with_options() {
    assert_eq!(
        statements("match \"ok\" timeout=2.5 matcher=regex"),
        vec![Statement::Match {
            pattern: "ok".to_owned(),
            matcher: Some(MatcherKind::Regex),
            timeout: Some(2.5),
            body: Vec::new(),
        }]
    );
}

#[test]
fn match_with_body() {
    let got = statements("match \"login:\" {\n  write \"root\\n\"\n}");
    let Statement::Match { ref body, .. } = got[0] else {
        panic!("expected a match: {got:?}");
    };
    assert_eq!(
        body[0].statement,
        Statement::Write {
            text: "root\n".to_owned(),
        }
    );
}

#[test]
fn shebang_is_stripped() {
    assert_eq!(statements("#!/usr/bin/env ptyscript\ndebug"), vec![Statement::Debug]);
}

#[test]
fn comments_and_blanks_are_skipped() {
    assert_eq!(
        statements("# a comment\n\n  release\n"),
        vec![Statement::Release]
    );
}

#[test]
fn string_escapes() {
    assert_eq!(
        statements(r#"write "a\tb\r\n\e\\\"""#),
        vec![Statement::Write {
            text: "a\tb\r\n\x1b\\\"".to_owned(),
        }]
    );
}

#[test]
fn caret_escape_survives_parsing() {
    // The control-character translator needs to see the backslash.
    assert_eq!(
        statements(r#"write "\^D""#),
        vec![Statement::Write {
            text: "\\^D".to_owned(),
        }]
    );
}

#[test]
fn one_block() {
    let got = statements("one {\n  match \"a\"\n  match \"b\"\n}");
    let Statement::One { ref arms } = got[0] else {
        panic!("expected a one block: {got:?}");
    };
    assert_eq!(arms.len(), 2);
}

#[test]
fn one_block_rejects_non_match() {
    let err = parse_source("one {\n  match \"a\"\n  write \"b\"\n}", "t").unwrap_err();
    assert_eq!(err, "t:3: Only match actions are permitted inside a one block");
}

#[test]
fn fail_block_takes_any_statement() {
    let got = statements("fail {\n  log \"died\"\n  exit 3\n}");
    let Statement::Fail { ref body } = got[0] else {
        panic!("expected a fail block: {got:?}");
    };
    assert_eq!(body.len(), 2);
    assert_eq!(body[1].statement, Statement::Exit { code: 3 });
}

#[test]
fn unterminated_block() {
    let err = parse_source("one {\n  match \"a\"\n", "t").unwrap_err();
    assert_eq!(err, "t:1: Unterminated block");
}

#[test]
fn unmatched_close() {
    let err = parse_source("}\n", "t").unwrap_err();
    assert_eq!(err, "t:1: Unmatched '}'");
}

#[test]
fn unknown_statement() {
    let err = parse_source("frobnicate\n", "t").unwrap_err();
    assert_eq!(err, "t:1: Unknown statement 'frobnicate'");
}

#[test]
fn negative_durations_rejected() {
    let err = parse_source("sleep -1\n", "t").unwrap_err();
    assert_eq!(err, "t:1: Durations must be non-negative");
    let err = parse_source("match \"x\" timeout=-2\n", "t").unwrap_err();
    assert_eq!(err, "t:1: Durations must be non-negative");
}

#[test]
fn cfg_rate() {
    assert_eq!(
        statements("cfg rate.bytes=16 rate.delay=0.25"),
        vec![Statement::Cfg {
            bytes: Some(16),
            delay: Some(0.25),
        }]
    );
    let err = parse_source("cfg rate.burst=1", "t").unwrap_err();
    assert_eq!(err, "t:1: Unknown cfg setting 'rate.burst'");
}

#[test]
fn stty_flags() {
    assert_eq!(
        statements("stty -echo raw"),
        vec![Statement::Stty {
            args: vec!["-echo".to_owned(), "raw".to_owned()],
        }]
    );
}

#[test]
fn exit_defaults_to_zero() {
    assert_eq!(statements("exit"), vec![Statement::Exit { code: 0 }]);
    assert_eq!(statements("exit 4"), vec![Statement::Exit { code: 4 }]);
}

#[test]
fn directives() {
    assert_eq!(
        statements("timeout 30\nmatcher regex"),
        vec![
            Statement::Timeout { secs: 30.0 },
            Statement::Matcher {
                kind: MatcherKind::Regex,
            },
        ]
    );
}

#[test]
fn blocks_only_for_block_statements() {
    let err = parse_source("write \"x\" {\n}\n", "t").unwrap_err();
    assert_eq!(err, "t:1: 'write' does not take a block");
}
