// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `#!` interpreter lines.
//!
//! The first space splits the line: everything before it is the interpreter path, everything
//! after it (spaces included) is one extra argument.

/// Bytes read from a candidate script.
pub const SCRIPT_PREFIX_LEN: usize = 4096;

/// Parsed interpreter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shebang {
    /// Interpreter path as written.
    pub interpreter: String,
    /// Optional single argument.
    pub arg: Option<String>,
}

impl Shebang {
    /// Parses the leading bytes of a file. `None` means the file is not a script.
    pub fn parse(prefix: &[u8]) -> Option<Self> {
        let body = prefix.strip_prefix(b"#!")?;
        let end = body.iter().position(|&b| b == b'\n' || b == b'\r').unwrap_or(body.len());
        let line = String::from_utf8_lossy(&body[..end]);
        let line = line.trim_start_matches([' ', '\t']).trim_end();
        let (interpreter, arg) = match line.split_once(' ') {
            Some((interpreter, arg)) => (interpreter, Some(arg.to_string())),
            None => (line, None),
        };
        Some(Self { interpreter: interpreter.to_string(), arg })
    }

    /// Rewrites `args` to `[interpreter, arg?, script, args[1..]...]`.
    pub fn rewrite_args(&self, interpreter: &str, script: &str, args: &mut Vec<String>) {
        match args.first_mut() {
            Some(first) => *first = script.to_string(),
            None => args.push(script.to_string()),
        }
        let rest = std::mem::take(args);
        args.push(interpreter.to_string());
        args.extend(self.arg.clone());
        args.extend(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_at_first_space_only() {
        let shebang = Shebang::parse(b"#!/usr/bin/env python -u -O\nprint(1)\n").unwrap();
        assert_eq!(shebang.interpreter, "/usr/bin/env");
        assert_eq!(shebang.arg.as_deref(), Some("python -u -O"));
    }

    #[test]
    fn handles_crlf_and_missing_newline() {
        assert_eq!(Shebang::parse(b"#!/bin/sh\r\n").unwrap().interpreter, "/bin/sh");
        let bare = Shebang::parse(b"#! /bin/bash").unwrap();
        assert_eq!(bare.interpreter, "/bin/bash");
        assert_eq!(bare.arg, None);
        assert_eq!(Shebang::parse(b"\x7fELF"), None);
    }

    #[test]
    fn rewrite_prepends_interpreter_and_arg() {
        let shebang = Shebang::parse(b"#!/bin/interp arg\n").unwrap();
        let mut argv = args(&["run.sh", "a", "b"]);
        shebang.rewrite_args("/bin/interp", "/home/user/run.sh", &mut argv);
        assert_eq!(argv, args(&["/bin/interp", "arg", "/home/user/run.sh", "a", "b"]));
    }
}
