// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Loading descriptors (`nmf`) attached to spawn requests.
//!
//! Wire shape: `{"program": {<arch>: {"url": <path>}}, "files": {<name>: {<arch>: {"url": <path>}}}}`.
//! Portable bitcode uses `{"program": {"portable": {"pnacl-translate": {"url": <path>}}}}`.

use procbridge_ipc::Dictionary;

/// Leading bytes of a portable bitcode executable.
pub const PORTABLE_MAGIC: &[u8; 4] = b"PEXE";

/// Loading descriptor for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Statically linked program.
    Static {
        /// Architecture key.
        arch: String,
        /// Absolute program path.
        program: String,
    },
    /// Dynamically linked program.
    Shared {
        /// Architecture key.
        arch: String,
        /// Dynamic loader path, the entry the host starts.
        program: Option<String>,
        /// `(name, absolute path)` of every other file the loader opens.
        files: Vec<(String, String)>,
    },
    /// Portable bitcode translated by the host.
    Portable {
        /// Absolute program path.
        program: String,
    },
}

/// Makes `path` absolute against `cwd`.
///
/// `.` and `..` components are folded; `..` at the root stays at the root.
pub fn absolute_path(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') { path.to_string() } else { format!("{cwd}/{path}") };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn url_entry(key: &str, path: &str) -> Dictionary {
    Dictionary::new().with(key, Dictionary::new().with("url", path))
}

impl Manifest {
    /// Builds the manifest of a dynamically linked `program`.
    ///
    /// The dependency whose base name equals the program's is renamed to `main_alias`; the one
    /// named `loader_name` becomes the `program` entry.
    pub fn shared(
        program: &str,
        arch: &str,
        dependencies: &[String],
        cwd: &str,
        loader_name: &str,
        main_alias: &str,
    ) -> Self {
        let program_base = base_name(program);
        let mut loader = None;
        let mut files = Vec::new();
        for dependency in dependencies {
            let path = absolute_path(cwd, dependency);
            let mut name = base_name(dependency);
            if name == program_base {
                name = main_alias;
            }
            if name == loader_name {
                loader = Some(path);
            } else {
                files.push((name.to_string(), path));
            }
        }
        Self::Shared { arch: arch.to_string(), program: loader, files }
    }

    /// Encodes the manifest as a message dictionary.
    pub fn to_dictionary(&self) -> Dictionary {
        match self {
            Self::Static { arch, program } => {
                Dictionary::new().with("program", url_entry(arch, program))
            }
            Self::Shared { arch, program, files } => {
                let mut nmf = Dictionary::new();
                if let Some(program) = program {
                    nmf.set("program", url_entry(arch, program));
                }
                let mut entries = Dictionary::new();
                for (name, path) in files {
                    entries.set(name, url_entry(arch, path));
                }
                nmf.with("files", entries)
            }
            Self::Portable { program } => Dictionary::new().with(
                "program",
                Dictionary::new().with("portable", url_entry("pnacl-translate", program)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_renames_program_and_promotes_loader() {
        let deps = vec![
            "/lib/runnable-ld.so".to_string(),
            "bin/tool".to_string(),
            "/lib/libc.so.6".to_string(),
        ];
        let manifest = Manifest::shared(
            "/work/bin/tool",
            "x86-64",
            &deps,
            "/work/",
            "runnable-ld.so",
            "main.nexe",
        );
        assert_eq!(
            manifest,
            Manifest::Shared {
                arch: "x86-64".into(),
                program: Some("/lib/runnable-ld.so".into()),
                files: vec![
                    ("main.nexe".into(), "/work/bin/tool".into()),
                    ("libc.so.6".into(), "/lib/libc.so.6".into()),
                ],
            }
        );
        let nmf = manifest.to_dictionary();
        let files = nmf.dict("files").unwrap();
        let url = files.dict("main.nexe").unwrap().dict("x86-64").unwrap().str("url").unwrap();
        assert_eq!(url, "/work/bin/tool");
        let program = nmf.dict("program").unwrap().dict("x86-64").unwrap();
        assert_eq!(program.str("url").unwrap(), "/lib/runnable-ld.so");
    }

    #[test]
    fn portable_uses_translate_key() {
        let nmf = Manifest::Portable { program: "/bin/app.pexe".into() }.to_dictionary();
        let url = nmf
            .dict("program")
            .and_then(|p| p.dict("portable"))
            .and_then(|p| p.dict("pnacl-translate"))
            .and_then(|p| p.str("url"))
            .unwrap();
        assert_eq!(url, "/bin/app.pexe");
    }

    #[test]
    fn absolute_path_joins_relative_only() {
        assert_eq!(absolute_path("/home/user", "a.out"), "/home/user/a.out");
        assert_eq!(absolute_path("/", "a.out"), "/a.out");
        assert_eq!(absolute_path("/home", "/bin/sh"), "/bin/sh");
        assert_eq!(absolute_path("/work", "./tool"), "/work/tool");
        assert_eq!(absolute_path("/work/src/", "../bin//tool"), "/work/bin/tool");
        assert_eq!(absolute_path("/", "../.."), "/");
    }
}
