// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Architecture and shared-library discovery.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use goblin::elf::{header, Elf};
use log::debug;

use crate::{find_in_path, Error, FileSystem, Result};

/// Outcome of dependency discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependencies {
    /// Architecture key used in manifests.
    pub arch: String,
    /// Ordered dependency paths; empty for statically linked programs.
    pub paths: Vec<String>,
}

impl Dependencies {
    /// Returns `true` for statically linked programs.
    pub fn is_static(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Discovers what the host must fetch to start an executable.
pub trait DependencyResolver: Send + Sync {
    /// Resolves `path` into its architecture and dependency list.
    fn resolve(&self, path: &str) -> Result<Dependencies>;
}

/// Maps an ELF machine to the architecture key the host understands.
pub fn arch_for_machine(machine: u16) -> Option<&'static str> {
    Some(match machine {
        header::EM_X86_64 => "x86-64",
        header::EM_386 => "x86-32",
        header::EM_ARM => "arm",
        header::EM_AARCH64 => "aarch64",
        header::EM_RISCV => "riscv64",
        _ => return None,
    })
}

struct ObjectInfo {
    arch: &'static str,
    interpreter: Option<String>,
    needed: Vec<String>,
}

/// [`DependencyResolver`] reading ELF objects through a [`FileSystem`].
///
/// The dependency list is the program interpreter, the program itself and every `DT_NEEDED`
/// library (transitively) found on the library search path.
pub struct ElfDependencyResolver {
    fs: Arc<dyn FileSystem>,
    library_path: String,
}

impl ElfDependencyResolver {
    /// Creates a resolver searching libraries along the colon-separated `library_path`.
    pub fn new(fs: Arc<dyn FileSystem>, library_path: &str) -> Self {
        Self { fs, library_path: library_path.to_string() }
    }

    fn inspect(&self, path: &str) -> Result<ObjectInfo> {
        let bytes = self
            .fs
            .read(path)
            .map_err(|source| Error::Read { path: path.to_string(), source })?;
        let elf = Elf::parse(&bytes)
            .map_err(|err| Error::InvalidObject { path: path.to_string(), reason: err.to_string() })?;
        let machine = elf.header.e_machine;
        let arch = arch_for_machine(machine)
            .ok_or_else(|| Error::UnsupportedMachine { path: path.to_string(), machine })?;
        Ok(ObjectInfo {
            arch,
            interpreter: elf.interpreter.map(str::to_string),
            needed: elf.libraries.iter().map(|lib| lib.to_string()).collect(),
        })
    }

    fn locate(&self, name: &str) -> Result<String> {
        if name.contains('/') {
            return if self.fs.readable(name) {
                Ok(name.to_string())
            } else {
                Err(Error::NotFound(name.to_string()))
            };
        }
        find_in_path(self.fs.as_ref(), name, &self.library_path)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

impl DependencyResolver for ElfDependencyResolver {
    fn resolve(&self, path: &str) -> Result<Dependencies> {
        let program = self.inspect(path)?;
        let arch = program.arch.to_string();
        if program.interpreter.is_none() && program.needed.is_empty() {
            return Ok(Dependencies { arch, paths: Vec::new() });
        }

        let mut paths: Vec<String> = program.interpreter.into_iter().collect();
        paths.push(path.to_string());
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = program.needed.into();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let found = self.locate(&name)?;
            queue.extend(self.inspect(&found)?.needed);
            paths.push(found);
        }
        debug!("loader: {path} ({arch}) needs {paths:?}");
        Ok(Dependencies { arch, paths })
    }
}
