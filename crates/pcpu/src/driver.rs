//! PiOS toolchain glue: argument vectors for the assembler and linker jobs,
//! runtime file lookup and compile options.
//!
//! Nothing here spawns processes or parses driver flags. Callers describe the
//! job with [`PiosLinkOptions`] and receive the argument list to pass on.

use std::path::{Path, PathBuf};

use crate::abi;
use crate::target::{PIOS_TRIPLE, PREDEFINED_MACROS};

/// Triple handed to the assembler.
pub const ASSEMBLER_TRIPLE: &str = PIOS_TRIPLE;

/// Linker-job description, one field per driver flag that affects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiosLinkOptions {
    pub output: Option<PathBuf>,
    /// Objects, archives and `-l` arguments in command-line order.
    pub inputs: Vec<String>,
    /// User `-L` directories.
    pub search_paths: Vec<PathBuf>,
    /// Pass-through linker arguments (`-T`, `-e`, `-s`, `-t`, `-z`, `-r`).
    pub extra_args: Vec<String>,
    pub nostdlib: bool,
    pub nostartfiles: bool,
    pub nodefaultlibs: bool,
    /// `-r`: relocatable output, no runtime files or libraries.
    pub relocatable: bool,
    pub shared: bool,
    pub pie: bool,
    pub no_pie: bool,
    /// `-pg`: link the profiling flavours of the system libraries.
    pub profile: bool,
    pub pthread: bool,
    /// Driver is in C++ mode.
    pub cxx: bool,
    /// Link the C++ standard library (only in C++ mode).
    pub link_cxx_stdlib: bool,
    /// Add `-lc++experimental`.
    pub cxx_experimental: bool,
    /// Link the compiler runtime builtins archive.
    pub compiler_rt: bool,
}

impl PiosLinkOptions {
    fn needs_entry(&self) -> bool {
        !(self.nostdlib || self.shared)
    }

    fn needs_start_files(&self) -> bool {
        !(self.nostdlib || self.nostartfiles || self.relocatable)
    }

    fn needs_default_libs(&self) -> bool {
        !(self.nostdlib || self.nodefaultlibs || self.relocatable)
    }
}

/// Include-related driver flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncludeOptions {
    pub nostdinc: bool,
    pub nobuiltininc: bool,
    pub nostdlibinc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiosToolchain {
    sysroot: PathBuf,
    resource_dir: Option<PathBuf>,
    file_paths: Vec<PathBuf>,
}

impl PiosToolchain {
    /// A toolchain rooted at `sysroot`. Runtime files are looked up in
    /// `<sysroot>/lib` then `<sysroot>/usr/lib`.
    pub fn new(sysroot: impl Into<PathBuf>) -> Self {
        let sysroot = sysroot.into();
        let file_paths = vec![sysroot.join("lib"), sysroot.join("usr/lib")];
        Self {
            sysroot,
            resource_dir: None,
            file_paths,
        }
    }

    /// Sets the compiler resource directory whose `include` holds builtin headers.
    #[must_use]
    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    pub fn file_paths(&self) -> &[PathBuf] {
        &self.file_paths
    }

    /// First existing `name` in the file paths, else `name` itself.
    pub fn find_file(&self, name: &str) -> PathBuf {
        self.file_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| {
                tracing::trace!(name, "runtime file not found in sysroot");
                PathBuf::from(name)
            })
    }

    fn file_arg(&self, name: &str) -> String {
        self.find_file(name).display().to_string()
    }

    /// Compiler runtime builtins archive.
    pub fn compiler_rt(&self) -> PathBuf {
        self.sysroot.join(abi::COMPILER_RT)
    }

    /// `-triple=pcpu-unknown-pios --filetype=obj -o <output> <inputs>`, after
    /// any `-Wa,`/`-Xassembler` pass-through arguments.
    pub fn assembler_args(
        &self,
        passthrough: &[String],
        output: &Path,
        inputs: &[PathBuf],
    ) -> Vec<String> {
        let mut args = passthrough.to_vec();
        args.push(format!("-triple={ASSEMBLER_TRIPLE}"));
        args.push("--filetype=obj".into());
        args.push("-o".into());
        args.push(output.display().to_string());
        args.extend(inputs.iter().map(|input| input.display().to_string()));
        args
    }

    /// Full linker argument vector for one link job.
    pub fn linker_args(&self, opts: &PiosLinkOptions) -> Vec<String> {
        let mut args = Vec::new();
        if !self.sysroot.as_os_str().is_empty() {
            args.push(format!("--sysroot={}", self.sysroot.display()));
        }
        if opts.needs_entry() {
            args.push("-e".into());
            args.push(abi::ENTRY_SYMBOL.into());
        }
        args.push("--no-eh-frame-hdr".into());
        // Dynamic linking is not supported, even with -shared.
        args.push("-Bstatic".into());
        if opts.pie {
            args.push("-pie".into());
        }
        if opts.no_pie || opts.profile {
            args.push("-nopie".into());
        }
        if let Some(output) = &opts.output {
            args.push("-o".into());
            args.push(output.display().to_string());
        }
        args.push("-T".into());
        args.push(self.file_arg(abi::DEFAULT_LINKER_SCRIPT));

        if opts.needs_start_files() {
            if opts.shared {
                args.push(self.file_arg("crti.o"));
                args.push(self.file_arg("crtbeginS.o"));
            } else {
                args.push(self.file_arg("crt0.o"));
                args.push(self.file_arg("crti.o"));
                args.push(self.file_arg("crtbegin.o"));
            }
        }

        args.extend(opts.search_paths.iter().map(|dir| format!("-L{}", dir.display())));
        args.extend(self.file_paths.iter().map(|dir| format!("-L{}", dir.display())));
        args.extend(opts.extra_args.iter().cloned());
        args.extend(opts.inputs.iter().cloned());

        if opts.needs_default_libs() {
            self.push_default_libs(opts, &mut args);
        }

        if opts.needs_start_files() {
            args.push(self.file_arg(if opts.shared { "crtendS.o" } else { "crtend.o" }));
            args.push(self.file_arg("crtn.o"));
        }
        tracing::debug!(count = args.len(), "constructed linker arguments");
        args
    }

    fn push_default_libs(&self, opts: &PiosLinkOptions, args: &mut Vec<String>) {
        if opts.cxx {
            if opts.link_cxx_stdlib {
                args.extend(Self::cxx_stdlib_args(opts.profile, opts.cxx_experimental));
            }
            args.push(if opts.profile { "-lm_p" } else { "-lm" }.into());
        }
        if opts.compiler_rt {
            args.push(self.compiler_rt().display().to_string());
        }
        if opts.pthread {
            let profiled = !opts.shared && opts.profile;
            args.push(if profiled { "-lpthread_p" } else { "-lpthread" }.into());
        }
        if !opts.shared {
            args.push(if opts.profile { "-lc_p" } else { "-lc" }.into());
        }
    }

    /// libc++ and its dependencies.
    pub fn cxx_stdlib_args(profile: bool, experimental: bool) -> Vec<String> {
        let flavour = |lib: &str| {
            if profile {
                format!("-l{lib}_p")
            } else {
                format!("-l{lib}")
            }
        };
        let mut args = vec![flavour("c++")];
        if experimental {
            args.push("-lc++experimental".into());
        }
        args.push(flavour("c++abi"));
        args.push(flavour("pthread"));
        args
    }

    /// Target options for the compiler job. Constructors run from `.ctors`
    /// unless init arrays are requested explicitly.
    pub fn compile_args(&self, use_init_array: bool) -> Vec<String> {
        let mut args: Vec<String> = PREDEFINED_MACROS
            .iter()
            .map(|(name, value)| format!("-D{name}={value}"))
            .collect();
        if !use_init_array {
            args.push("-fno-use-init-array".into());
        }
        args
    }

    /// System include directories in search order.
    pub fn system_include_dirs(&self, opts: IncludeOptions, cxx: bool) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if opts.nostdinc {
            return dirs;
        }
        if cxx && !opts.nostdlibinc {
            dirs.push(self.sysroot.join("usr/include/c++/v1"));
        }
        match &self.resource_dir {
            Some(resource) if !opts.nobuiltininc => dirs.push(resource.join("include")),
            _ => {}
        }
        if !opts.nostdlibinc {
            dirs.push(self.sysroot.join("usr/include"));
        }
        dirs
    }
}
