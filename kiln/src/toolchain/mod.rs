// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The toolchain adapter: maps generic compile/archive/link intents to
//! concrete command lines for a compiler family, and normalizes the
//! family's header-dependency output.
//!
//! The only polymorphism is the tagged [`Family`] variant; there is no
//! open-ended plugin surface.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

/// Known compiler families.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Deserialize,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    GnuLike,
    MsvcLike,
}

/// The language of a translation unit, decided by file suffix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Language {
    C,
    Cxx,
}

/// A generic compile request, shaped into an argv by the family.
#[derive(Clone, Debug)]
pub struct CompileIntent {
    pub source: PathBuf,
    pub object: PathBuf,
    pub language: Language,
    pub include_dirs: Vec<PathBuf>,
    /// Where GNU-like compilers should write the Makefile-format header
    /// dependency output.
    pub deps_file: Option<PathBuf>,
}

/// The raw TOML description.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawToolchain {
    family: Family,
    c_compiler: Option<String>,
    cxx_compiler: Option<String>,
    archiver: Option<String>,
    linker: Option<String>,
    #[serde(default)]
    c_flags: Vec<String>,
    #[serde(default)]
    cxx_flags: Vec<String>,
    #[serde(default)]
    link_flags: Vec<String>,
    parallelism: Option<usize>,
}

/// A usable toolchain description.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub family: Family,
    c_compiler: String,
    cxx_compiler: String,
    archiver: String,
    linker: String,
    c_flags: Vec<String>,
    cxx_flags: Vec<String>,
    link_flags: Vec<String>,
    parallelism: Option<usize>,
}

/// Environment variable naming a toolchain description file.
pub const TOOLCHAIN_ENV: &str = "KILN_TOOLCHAIN";

/// Conventional toolchain file name inside a project.
pub const TOOLCHAIN_FILE: &str = "toolchain.toml";

impl Toolchain {
    /// Loads a toolchain description file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(
                ErrorKind::BadToolchain,
                format!("unreadable toolchain description {}", path.display()),
                e,
            )
        })?;
        let raw: RawToolchain = toml::from_str(&text).map_err(|e| {
            Error::with_source(
                ErrorKind::BadToolchain,
                format!("malformed toolchain description {}", path.display()),
                e,
            )
        })?;
        Ok(Self::from_raw(raw))
    }

    /// Finds the toolchain for a project: an explicit path, the
    /// `KILN_TOOLCHAIN` environment variable, the project's
    /// `toolchain.toml`, or a host default probed from `PATH`.
    pub fn discover(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(TOOLCHAIN_ENV) {
            return Self::load(Path::new(&path));
        }
        let project_file = project_dir.join(TOOLCHAIN_FILE);
        if project_file.is_file() {
            return Self::load(&project_file);
        }
        Self::host_default()
    }

    /// A GNU-like default using `cc`/`c++`/`ar` from `PATH`.
    pub fn host_default() -> Result<Self> {
        for tool in ["cc", "c++", "ar"] {
            if find_in_path(tool).is_none() {
                return Err(Error::new(
                    ErrorKind::BadToolchain,
                    format!(
                        "no toolchain description found and {:?} is not in PATH; \
                         write a {} or set {}",
                        tool, TOOLCHAIN_FILE, TOOLCHAIN_ENV
                    ),
                ));
            }
        }
        Ok(Self::from_raw(RawToolchain {
            family: Family::GnuLike,
            c_compiler: None,
            cxx_compiler: None,
            archiver: None,
            linker: None,
            c_flags: Vec::new(),
            cxx_flags: Vec::new(),
            link_flags: Vec::new(),
            parallelism: None,
        }))
    }

    fn from_raw(raw: RawToolchain) -> Self {
        let (c, cxx, ar) = match raw.family {
            Family::GnuLike => ("cc", "c++", "ar"),
            Family::MsvcLike => ("cl", "cl", "lib"),
        };
        let cxx_compiler = raw.cxx_compiler.unwrap_or_else(|| cxx.to_owned());
        Self {
            family: raw.family,
            c_compiler: raw.c_compiler.unwrap_or_else(|| c.to_owned()),
            linker: raw.linker.unwrap_or_else(|| match raw.family {
                Family::GnuLike => cxx_compiler.clone(),
                Family::MsvcLike => "link".to_owned(),
            }),
            cxx_compiler,
            archiver: raw.archiver.unwrap_or_else(|| ar.to_owned()),
            c_flags: raw.c_flags,
            cxx_flags: raw.cxx_flags,
            link_flags: raw.link_flags,
            parallelism: raw.parallelism,
        }
    }

    /// The worker count for the build scheduler: the description's value,
    /// or CPU count + 2.
    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                + 2
        })
    }

    pub fn object_ext(&self) -> &'static str {
        match self.family {
            Family::GnuLike => "o",
            Family::MsvcLike => "obj",
        }
    }

    pub fn archive_ext(&self) -> &'static str {
        match self.family {
            Family::GnuLike => "a",
            Family::MsvcLike => "lib",
        }
    }

    pub fn exe_ext(&self) -> &'static str {
        match self.family {
            Family::GnuLike => "",
            Family::MsvcLike => "exe",
        }
    }

    /// The argv for a compile node.
    pub fn compile_command(&self, intent: &CompileIntent) -> Vec<String> {
        let (compiler, flags) = match intent.language {
            Language::C => (&self.c_compiler, &self.c_flags),
            Language::Cxx => (&self.cxx_compiler, &self.cxx_flags),
        };
        let mut argv = vec![compiler.clone()];
        match self.family {
            Family::GnuLike => {
                argv.extend(flags.iter().cloned());
                for dir in &intent.include_dirs {
                    argv.push("-I".to_owned());
                    argv.push(dir.display().to_string());
                }
                if let Some(deps) = &intent.deps_file {
                    argv.push("-MMD".to_owned());
                    argv.push("-MF".to_owned());
                    argv.push(deps.display().to_string());
                }
                argv.push("-c".to_owned());
                argv.push(intent.source.display().to_string());
                argv.push("-o".to_owned());
                argv.push(intent.object.display().to_string());
            }
            Family::MsvcLike => {
                argv.push("/nologo".to_owned());
                argv.extend(flags.iter().cloned());
                for dir in &intent.include_dirs {
                    argv.push(format!("/I{}", dir.display()));
                }
                // Header dependencies come from stdout rather than a file.
                argv.push("/showIncludes".to_owned());
                argv.push("/c".to_owned());
                argv.push(intent.source.display().to_string());
                argv.push(format!("/Fo{}", intent.object.display()));
            }
        }
        argv
    }

    /// The argv for an archive node.
    pub fn archive_command(&self, objects: &[PathBuf], out: &Path) -> Vec<String> {
        match self.family {
            Family::GnuLike => {
                let mut argv = vec![
                    self.archiver.clone(),
                    "rcs".to_owned(),
                    out.display().to_string(),
                ];
                argv.extend(objects.iter().map(|o| o.display().to_string()));
                argv
            }
            Family::MsvcLike => {
                let mut argv = vec![
                    self.archiver.clone(),
                    "/nologo".to_owned(),
                    format!("/OUT:{}", out.display()),
                ];
                argv.extend(objects.iter().map(|o| o.display().to_string()));
                argv
            }
        }
    }

    /// The argv for a link node. `inputs` carries objects first, then
    /// archives in link order.
    pub fn link_command(&self, inputs: &[PathBuf], out: &Path) -> Vec<String> {
        match self.family {
            Family::GnuLike => {
                let mut argv = vec![self.linker.clone()];
                argv.extend(inputs.iter().map(|i| i.display().to_string()));
                argv.extend(self.link_flags.iter().cloned());
                argv.push("-o".to_owned());
                argv.push(out.display().to_string());
                argv
            }
            Family::MsvcLike => {
                let mut argv = vec![
                    self.linker.clone(),
                    "/nologo".to_owned(),
                    format!("/OUT:{}", out.display()),
                ];
                argv.extend(self.link_flags.iter().cloned());
                argv.extend(inputs.iter().map(|i| i.display().to_string()));
                argv
            }
        }
    }

    /// Normalizes the family's header-dependency output into a header
    /// list: the `.d` Makefile written during the compile for GNU-like
    /// compilers, the captured stdout for MSVC-like ones.
    pub fn normalize_deps(&self, stdout: &str, deps_file: Option<&Path>) -> Result<Vec<PathBuf>> {
        match self.family {
            Family::GnuLike => {
                let Some(deps_file) = deps_file else {
                    return Ok(Vec::new());
                };
                let content = match std::fs::read_to_string(deps_file) {
                    Ok(content) => content,
                    // A compiler that wrote no deps file contributes no
                    // header records rather than failing the build.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => {
                        return Err(Error::from_io(
                            e,
                            format!("reading {}", deps_file.display()),
                        ))
                    }
                };
                Ok(parse_makefile_deps(&content))
            }
            Family::MsvcLike => Ok(parse_show_includes(stdout)),
        }
    }
}

/// Parses Makefile-format dependency output (`out: src hdr1 hdr2 \ ...`),
/// returning every prerequisite except the first (the source itself).
fn parse_makefile_deps(content: &str) -> Vec<PathBuf> {
    let mut items: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = content.chars().peekable();
    let mut seen_colon = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                // An escaped space belongs to the file name.
                Some(' ') => current.push(' '),
                // A line continuation is whitespace.
                Some('\n') | Some('\r') => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush(&mut current, &mut items, seen_colon);
                }
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ':' if !seen_colon => {
                // The rule target ends here.
                current.clear();
                seen_colon = true;
            }
            c if c.is_whitespace() => flush(&mut current, &mut items, seen_colon),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut items, seen_colon);

    // The first prerequisite is the primary source file.
    items.into_iter().skip(1).map(PathBuf::from).collect()
}

fn flush(current: &mut String, items: &mut Vec<String>, seen_colon: bool) {
    if !current.is_empty() && seen_colon {
        items.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Parses `/showIncludes` output lines.
fn parse_show_includes(stdout: &str) -> Vec<PathBuf> {
    const MARKER: &str = "Note: including file:";
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix(MARKER))
        .map(|rest| PathBuf::from(rest.trim_start()))
        .collect()
}

/// Searches `PATH` for an executable.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn gnu() -> Toolchain {
        Toolchain::from_raw(RawToolchain {
            family: Family::GnuLike,
            c_compiler: Some("gcc".to_owned()),
            cxx_compiler: Some("g++".to_owned()),
            archiver: Some("ar".to_owned()),
            linker: None,
            c_flags: vec![],
            cxx_flags: vec!["-std=c++17".to_owned()],
            link_flags: vec![],
            parallelism: Some(4),
        })
    }

    fn msvc() -> Toolchain {
        Toolchain::from_raw(RawToolchain {
            family: Family::MsvcLike,
            c_compiler: None,
            cxx_compiler: None,
            archiver: None,
            linker: None,
            c_flags: vec![],
            cxx_flags: vec![],
            link_flags: vec![],
            parallelism: None,
        })
    }

    #[test]
    fn loads_a_description() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOOLCHAIN_FILE);
        std::fs::write(
            &path,
            r#"
family = "gnu-like"
cxx-compiler = "clang++"
cxx-flags = ["-std=c++20"]
parallelism = 8
"#,
        )
        .unwrap();
        let toolchain = Toolchain::load(&path)?;
        assert_eq!(Family::GnuLike, toolchain.family);
        assert_eq!(8, toolchain.parallelism());
        let cmd = toolchain.compile_command(&CompileIntent {
            source: PathBuf::from("a.cpp"),
            object: PathBuf::from("a.o"),
            language: Language::Cxx,
            include_dirs: vec![],
            deps_file: None,
        });
        assert_eq!("clang++", cmd[0]);
        assert!(cmd.contains(&"-std=c++20".to_owned()));
        Ok(())
    }

    #[test]
    fn malformed_description_is_bad_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOOLCHAIN_FILE);
        std::fs::write(&path, "family = \"quantum\"").unwrap();
        let err = Toolchain::load(&path).unwrap_err();
        assert_eq!("bad-toolchain", err.marker());

        let err = Toolchain::load(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!("bad-toolchain", err.marker());
    }

    #[test]
    fn gnu_compile_command_shape() {
        let cmd = gnu().compile_command(&CompileIntent {
            source: PathBuf::from("src/foo.cpp"),
            object: PathBuf::from("out/foo.o"),
            language: Language::Cxx,
            include_dirs: vec![PathBuf::from("include")],
            deps_file: Some(PathBuf::from("out/foo.d")),
        });
        assert_eq!(
            vec![
                "g++",
                "-std=c++17",
                "-I",
                "include",
                "-MMD",
                "-MF",
                "out/foo.d",
                "-c",
                "src/foo.cpp",
                "-o",
                "out/foo.o",
            ],
            cmd.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn msvc_compile_command_shape() {
        let cmd = msvc().compile_command(&CompileIntent {
            source: PathBuf::from("foo.cpp"),
            object: PathBuf::from("foo.obj"),
            language: Language::Cxx,
            include_dirs: vec![PathBuf::from("include")],
            deps_file: None,
        });
        assert_eq!(
            vec![
                "cl",
                "/nologo",
                "/Iinclude",
                "/showIncludes",
                "/c",
                "foo.cpp",
                "/Fofoo.obj",
            ],
            cmd.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn parses_makefile_deps() {
        let content = "out/foo.o: src/foo.cpp include/foo.hpp \\\n  include/detail/impl.hpp \\\n  /usr/include/weird\\ name.h\n";
        let deps = parse_makefile_deps(content);
        assert_eq!(
            vec![
                PathBuf::from("include/foo.hpp"),
                PathBuf::from("include/detail/impl.hpp"),
                PathBuf::from("/usr/include/weird name.h"),
            ],
            deps
        );
    }

    #[test]
    fn parses_show_includes() {
        let stdout = "foo.cpp\nNote: including file: C:\\inc\\foo.hpp\nNote: including file:   C:\\inc\\deep\\bar.hpp\nsome other line\n";
        let deps = parse_show_includes(stdout);
        assert_eq!(
            vec![
                PathBuf::from("C:\\inc\\foo.hpp"),
                PathBuf::from("C:\\inc\\deep\\bar.hpp"),
            ],
            deps
        );
    }

    #[test]
    fn extensions_follow_the_family() {
        assert_eq!("o", gnu().object_ext());
        assert_eq!("a", gnu().archive_ext());
        assert_eq!("", gnu().exe_ext());
        assert_eq!("obj", msvc().object_ext());
        assert_eq!("lib", msvc().archive_ext());
        assert_eq!("exe", msvc().exe_ext());
    }
}
