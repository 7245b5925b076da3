// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Resolution of a spawn target into argv and loading descriptor
//!
//! Flow per target:
//!   1. bare name missing from the local PATH: the host resolves it (no manifest)
//!   2. unreadable target: ENOENT
//!   3. `#!` script: argv is rewritten and the interpreter becomes the target (repeat from 1)
//!   4. portable bitcode magic: portable manifest
//!   5. dependency discovery: static or shared manifest

use std::sync::Arc;

use log::debug;

use crate::{
    absolute_path, find_in_path, DependencyResolver, Error, FileSystem, Manifest, Result,
    Shebang, PORTABLE_MAGIC, SCRIPT_PREFIX_LEN,
};

/// Tunables of the resolution flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Dependency promoted to the manifest `program` entry.
    pub loader_name: String,
    /// Name given to the program's own dependency record.
    pub main_alias: String,
    /// Nested interpreter expansions allowed before `ELOOP`.
    pub max_interpreter_depth: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            loader_name: "runnable-ld.so".to_string(),
            main_alias: "main.nexe".to_string(),
            max_interpreter_depth: 4,
        }
    }
}

/// Resolves spawn targets against a filesystem view.
pub struct Resolver {
    fs: Arc<dyn FileSystem>,
    dependencies: Arc<dyn DependencyResolver>,
    options: ResolveOptions,
}

impl Resolver {
    /// Creates a resolver.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        dependencies: Arc<dyn DependencyResolver>,
        options: ResolveOptions,
    ) -> Self {
        Self { fs, dependencies, options }
    }

    /// Filesystem view used for resolution.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Resolves `path`, rewriting `args` in place.
    ///
    /// Paths containing a `/` are read relative to `cwd`; `args` keeps the caller's spelling.
    /// `Ok(None)` means the host resolves the program by name.
    pub fn resolve(
        &self,
        path: &str,
        args: &mut Vec<String>,
        search_path: &str,
        cwd: &str,
    ) -> Result<Option<Manifest>> {
        let mut program = path.to_string();
        let mut depth = 0;
        let target = loop {
            if self.use_host_lookup(&mut program, args, search_path) {
                debug!("loader: {program} left to host lookup");
                return Ok(None);
            }
            let target = absolute_path(cwd, &program);
            if !self.fs.readable(&target) {
                return Err(Error::NotFound(program));
            }
            let prefix = self
                .fs
                .read_prefix(&target, SCRIPT_PREFIX_LEN)
                .map_err(|source| Error::Read { path: target.clone(), source })?;
            if prefix.len() < 2 {
                return Err(Error::NotExecutable(program));
            }
            let Some(shebang) = Shebang::parse(&prefix) else {
                break target;
            };
            depth += 1;
            if depth > self.options.max_interpreter_depth {
                return Err(Error::InterpreterLoop(path.to_string()));
            }
            let interpreter = self.locate_interpreter(&shebang.interpreter, cwd);
            shebang.rewrite_args(&interpreter, &program, args);
            debug!("loader: {program} runs under {interpreter}");
            program = interpreter;
        };

        let magic = self
            .fs
            .read_prefix(&target, PORTABLE_MAGIC.len())
            .map_err(|source| Error::Read { path: target.clone(), source })?;
        if magic.as_slice() == PORTABLE_MAGIC {
            return Ok(Some(Manifest::Portable { program: target }));
        }

        let dependencies = self.dependencies.resolve(&target)?;
        if dependencies.is_static() {
            return Ok(Some(Manifest::Static { arch: dependencies.arch, program: target }));
        }
        Ok(Some(Manifest::shared(
            &target,
            &dependencies.arch,
            &dependencies.paths,
            cwd,
            &self.options.loader_name,
            &self.options.main_alias,
        )))
    }

    // A bare name found on PATH becomes that path (and argv[0]); one not found is host-resolved.
    fn use_host_lookup(&self, program: &mut String, args: &mut [String], search_path: &str) -> bool {
        if program.contains('/') {
            return false;
        }
        match find_in_path(self.fs.as_ref(), program, search_path) {
            Some(found) => {
                if let Some(first) = args.first_mut() {
                    first.clone_from(&found);
                }
                *program = found;
                false
            }
            None => true,
        }
    }

    // Interpreters missing at their full path are reduced to the base name for PATH lookup.
    fn locate_interpreter(&self, interpreter: &str, cwd: &str) -> String {
        if self.fs.readable(&absolute_path(cwd, interpreter)) {
            return interpreter.to_string();
        }
        match interpreter.rsplit_once('/') {
            Some((_, base)) => base.to_string(),
            None => interpreter.to_string(),
        }
    }
}
