//! Build-system detection.

use std::path::Path;

/// A recognised build system: its manifest and the one command that builds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSystem {
    pub name: &'static str,
    pub manifest: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl BuildSystem {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program)
            .chain(self.args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Checked in order; the first manifest present wins.
pub const BUILD_SYSTEMS: &[BuildSystem] = &[
    BuildSystem {
        name: "swiftpm",
        manifest: "Package.swift",
        program: "swift",
        args: &["build"],
    },
    BuildSystem {
        name: "cargo",
        manifest: "Cargo.toml",
        program: "cargo",
        args: &["build"],
    },
    BuildSystem {
        name: "go",
        manifest: "go.mod",
        program: "go",
        args: &["build", "./..."],
    },
    BuildSystem {
        name: "npm",
        manifest: "package.json",
        program: "npm",
        args: &["run", "build", "--if-present"],
    },
    BuildSystem {
        name: "python",
        manifest: "pyproject.toml",
        program: "python3",
        args: &["-m", "compileall", "-q", "."],
    },
    BuildSystem {
        name: "python",
        manifest: "setup.py",
        program: "python3",
        args: &["-m", "compileall", "-q", "."],
    },
    BuildSystem {
        name: "cmake",
        manifest: "CMakeLists.txt",
        program: "cmake",
        args: &["-S", ".", "-B", "build"],
    },
    BuildSystem {
        name: "make",
        manifest: "Makefile",
        program: "make",
        args: &[],
    },
];

pub fn detect_build_system(root: &Path) -> Option<&'static BuildSystem> {
    BUILD_SYSTEMS
        .iter()
        .find(|system| root.join(system.manifest).is_file())
}
