#![allow(dead_code)]

use anyhow::Result;
use depsnap::blacklist::Blacklist;
use depsnap::extract::{DependencyExtractor, EnvIndex, ExtractOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A build workspace on disk:
///
/// ```text
/// <root>/proj/            working directory
/// <root>/proj/src/main.c
/// <root>/sdk/include/a.h
/// <root>/sdk/lib/libfoo.so
/// <root>/sdk/lib/libfoo.so.1 -> libfoo.so
/// <root>/store/           backing store
/// ```
pub struct Workspace {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub cwd: PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().canonicalize()?;
        let cwd = root.join("proj");

        fs::create_dir_all(cwd.join("src"))?;
        fs::create_dir_all(root.join("sdk/include"))?;
        fs::create_dir_all(root.join("sdk/lib"))?;
        fs::write(cwd.join("src/main.c"), "#include <a.h>\nint main(void) { return A; }\n")?;
        fs::write(root.join("sdk/include/a.h"), "#define A 0\n")?;
        fs::write(root.join("sdk/lib/libfoo.so"), b"\x7fELF fake library")?;
        #[cfg(unix)]
        std::os::unix::fs::symlink("libfoo.so", root.join("sdk/lib/libfoo.so.1"))?;

        Ok(Self {
            temp_dir,
            root,
            cwd,
        })
    }

    pub fn sdk(&self, rel: &str) -> PathBuf {
        self.root.join("sdk").join(rel)
    }

    pub fn store_root(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Writes `lines` as a trace log inside the working directory.
    pub fn write_log(&self, lines: &[String]) -> Result<PathBuf> {
        let path = self.cwd.join(".depsnap-trace-test.log");
        fs::write(&path, lines.join("\n"))?;
        Ok(path)
    }

    pub fn extractor(&self, env: EnvIndex) -> DependencyExtractor {
        let mut options = ExtractOptions::new(self.cwd.clone());
        options.system_root = None;
        DependencyExtractor::new(options, Blacklist::new(&self.cwd), env)
    }
}

pub fn strace_open(path: &Path, ret: i64) -> String {
    format!("openat(AT_FDCWD, \"{}\", O_RDONLY|O_CLOEXEC) = {ret}", path.display())
}

pub fn strace_exec(path: &Path) -> String {
    format!(
        "execve(\"{}\", [\"{}\", \"-c\", \"a, b\"], 0x7ffd5f1c9a38 /* 42 vars */) = 0",
        path.display(),
        path.display()
    )
}

pub fn strace_readlink(link: &Path, target: &str) -> String {
    format!(
        "readlink(\"{}\", \"{target}\", 4095) = {}",
        link.display(),
        target.len()
    )
}
