//! Finding libpython on disk.
//!
//! A small probe script runs under the target interpreter and prints one
//! `KEY: value` line per configuration variable. From that report we build
//! an ordered list of candidate library files, most specific first.
//!
//! Every key is optional. A key that is missing, empty, or printed as
//! `None` (Python's rendering of an unset config var) counts as absent.

use std::collections::HashMap;
use std::env;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Environment variable that relocates the interpreter's standard library.
pub const PYTHON_HOME_ENV: &str = "PYTHONHOME";

/// Probe script. Must stay valid for both Python 2 and Python 3.
const INVESTIGATOR: &str = r#"
import sys
try:
    import sysconfig
except ImportError:
    from distutils import sysconfig
for var in ("VERSION", "LIBRARY", "LDLIBRARY", "INSTSONAME", "LIBDIR",
            "MULTIARCH", "PYTHONFRAMEWORKPREFIX"):
    print("%s: %s" % (var, sysconfig.get_config_var(var)))
print("executable: %s" % sys.executable)
print("prefix: %s" % getattr(sys, "base_prefix", sys.prefix))
print("exec_prefix: %s" % getattr(sys, "base_exec_prefix", sys.exec_prefix))
"#;

/// Parsed probe report.
#[derive(Debug, Clone, Default)]
pub struct PythonConfig {
    vars: HashMap<String, String>,
}

impl PythonConfig {
    /// Parse a `KEY: value` report. Lines without the separator are skipped.
    pub fn parse(report: &str) -> Self {
        let vars = report
            .lines()
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.trim().to_string(), v.trim_end().to_string()))
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != "None")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("VERSION")
    }

    pub fn executable(&self) -> Option<&str> {
        self.get("executable")
    }

    pub fn prefix(&self) -> Option<&str> {
        self.get("prefix")
    }

    pub fn exec_prefix(&self) -> Option<&str> {
        self.get("exec_prefix")
    }

    /// Library base names, most specific first, without duplicates.
    pub fn library_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(ld) = self.get("LDLIBRARY") {
            names.push(ld.to_string());
            if let Some(base) = Path::new(ld).file_name() {
                names.push(base.to_string_lossy().into_owned());
            }
        }
        if let Some(soname) = self.get("INSTSONAME") {
            names.push(soname.to_string());
        }
        if let Some(lib) = self.get("LIBRARY") {
            if let Some(stem) = strip_library_extension(lib) {
                names.push(stem);
            }
        }
        if let Some(v) = self.version() {
            names.push(format!("{DLL_PREFIX}python{v}"));
        }
        names.push(format!("{DLL_PREFIX}python"));
        dedup(names)
    }

    /// Directories to search, in order, without duplicates.
    pub fn library_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(libdir) = self.get("LIBDIR") {
            dirs.push(PathBuf::from(libdir));
            if let Some(multiarch) = self.get("MULTIARCH") {
                dirs.push(Path::new(libdir).join(multiarch));
            }
        }
        if let Some(exe) = self.executable() {
            let exe = Path::new(exe);
            if cfg!(windows) {
                if let Some(dir) = exe.parent() {
                    dirs.push(dir.to_path_buf());
                }
            } else if let Some(root) = exe.parent().and_then(Path::parent) {
                dirs.push(root.join("lib"));
            }
        }
        if cfg!(target_os = "macos") {
            if let Some(fw) = self.get("PYTHONFRAMEWORKPREFIX") {
                dirs.push(PathBuf::from(fw));
            }
        }
        if let Some(exec_prefix) = self.exec_prefix() {
            dirs.push(PathBuf::from(exec_prefix));
            dirs.push(Path::new(exec_prefix).join("lib"));
        }
        dedup(dirs)
    }

    /// Every (directory, file) pair to try, names outermost.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let dirs = self.library_dirs();
        let mut out = Vec::new();
        for name in self.library_names() {
            for file in library_file_names(&name) {
                for dir in &dirs {
                    out.push(dir.join(&file));
                }
            }
        }
        dedup(out)
    }

    /// Value `PYTHONHOME` should take for this installation.
    ///
    /// Windows documents prefix and exec-prefix as identical and breaks
    /// when both are listed, so only exec-prefix is used there.
    pub fn python_home(&self) -> Option<OsString> {
        let exec_prefix = self.exec_prefix()?;
        if cfg!(windows) {
            return Some(OsString::from(exec_prefix));
        }
        let prefix = self.prefix().unwrap_or(exec_prefix);
        env::join_paths([prefix, exec_prefix]).ok()
    }
}

/// Run the probe script under `python` and parse its report.
pub fn investigate(python: &str) -> Result<PythonConfig> {
    let output = Command::new(python)
        .arg("-c")
        .arg(INVESTIGATOR)
        .env("PYTHONIOENCODING", "UTF-8")
        .stderr(Stdio::null())
        .output()
        .map_err(|e| Error::Discovery(format!("{python}: {e}")))?;
    if !output.status.success() {
        return Err(Error::Discovery(format!(
            "{python} exited with {}",
            output.status
        )));
    }
    let report = String::from_utf8_lossy(&output.stdout);
    Ok(PythonConfig::parse(&report))
}

/// Set `PYTHONHOME` when the caller left it unset, then make sure the
/// interpreter still starts. Some distributions break when it is set; in
/// that case the variable is removed again.
pub fn configure_python_home(python: &str, config: &PythonConfig) {
    if env::var_os(PYTHON_HOME_ENV).is_some() {
        return;
    }
    let Some(home) = config.python_home() else {
        return;
    };
    env::set_var(PYTHON_HOME_ENV, &home);
    let works = Command::new(python)
        .args(["-c", "import site"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if works {
        log::debug!("{PYTHON_HOME_ENV}={}", home.to_string_lossy());
    } else {
        log::warn!(
            "{python} fails to start with {PYTHON_HOME_ENV}={}, leaving it unset",
            home.to_string_lossy()
        );
        env::remove_var(PYTHON_HOME_ENV);
    }
}

/// File names to look for given a library base name. Names that already
/// carry a shared-library suffix (including versioned sonames) are kept.
fn library_file_names(name: &str) -> Vec<String> {
    if name.ends_with(DLL_SUFFIX) || name.contains(&format!("{DLL_SUFFIX}.")) {
        return vec![name.to_string()];
    }
    let mut files = vec![format!("{name}{DLL_SUFFIX}")];
    // Framework builds report a bare path such as
    // `Python.framework/Versions/3.11/Python`.
    if name.contains('/') {
        files.push(name.to_string());
    }
    files
}

/// `libpython3.11.a` -> `libpython3.11`. Only real library extensions are
/// stripped; the `11` in `libpython3.11` is not one.
fn strip_library_extension(lib: &str) -> Option<String> {
    let base = Path::new(lib).file_name()?.to_string_lossy().into_owned();
    for ext in [".a", ".lib", ".so", ".dylib", ".dll"] {
        if let Some(stem) = base.strip_suffix(ext) {
            return Some(stem.to_string());
        }
    }
    Some(base)
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
VERSION: 3.11
LIBRARY: libpython3.11.a
LDLIBRARY: libpython3.11.so
INSTSONAME: libpython3.11.so.1.0
LIBDIR: /usr/lib
MULTIARCH: x86_64-linux-gnu
PYTHONFRAMEWORKPREFIX:
executable: /usr/bin/python3
prefix: /usr
exec_prefix: /usr
";

    #[test]
    fn parse_treats_empty_and_none_as_absent() {
        let cfg = PythonConfig::parse("LIBDIR: None\nVERSION: 3.12\nnoise line\n");
        assert_eq!(cfg.get("LIBDIR"), None);
        assert_eq!(cfg.version(), Some("3.12"));
        assert_eq!(cfg.get("MISSING"), None);

        let cfg = PythonConfig::parse(REPORT);
        assert_eq!(cfg.get("PYTHONFRAMEWORKPREFIX"), None);
        assert_eq!(cfg.executable(), Some("/usr/bin/python3"));
    }

    #[test]
    fn values_may_contain_the_separator() {
        let cfg = PythonConfig::parse("executable: C:: weird: path\n");
        assert_eq!(cfg.executable(), Some("C:: weird: path"));
    }

    #[test]
    fn library_names_most_specific_first() {
        let cfg = PythonConfig::parse(REPORT);
        let names = cfg.library_names();
        assert_eq!(names[0], "libpython3.11.so");
        assert_eq!(names[1], "libpython3.11.so.1.0");
        assert_eq!(names.last().unwrap(), &format!("{DLL_PREFIX}python"));
        assert!(names.contains(&format!("{DLL_PREFIX}python3.11")));
        // LDLIBRARY and its basename are the same string here.
        assert_eq!(
            names.iter().filter(|n| *n == "libpython3.11.so").count(),
            1
        );
    }

    #[test]
    fn missing_config_still_yields_generic_name() {
        let cfg = PythonConfig::default();
        assert_eq!(cfg.library_names(), vec![format!("{DLL_PREFIX}python")]);
        assert!(cfg.library_dirs().is_empty());
        assert!(cfg.candidates().is_empty());
        assert!(cfg.python_home().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn library_dirs_on_linux() {
        let cfg = PythonConfig::parse(REPORT);
        assert_eq!(
            cfg.library_dirs(),
            vec![
                PathBuf::from("/usr/lib"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu"),
                PathBuf::from("/usr"),
            ]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn candidates_iterate_names_then_dirs() {
        let cfg = PythonConfig::parse(REPORT);
        let candidates = cfg.candidates();
        assert_eq!(candidates[0], PathBuf::from("/usr/lib/libpython3.11.so"));
        assert_eq!(
            candidates[1],
            PathBuf::from("/usr/lib/x86_64-linux-gnu/libpython3.11.so")
        );
        assert!(candidates
            .contains(&PathBuf::from("/usr/lib/x86_64-linux-gnu/libpython3.11.so.1.0")));
        assert!(!candidates.iter().any(|p| p.to_string_lossy().ends_with(".a.so")));
    }

    #[cfg(unix)]
    #[test]
    fn python_home_joins_both_prefixes() {
        let cfg = PythonConfig::parse("prefix: /opt/py\nexec_prefix: /opt/py-x\n");
        assert_eq!(cfg.python_home(), Some(OsString::from("/opt/py:/opt/py-x")));
    }

    #[test]
    fn strips_only_library_extensions() {
        assert_eq!(
            strip_library_extension("libpython3.11.a").as_deref(),
            Some("libpython3.11")
        );
        assert_eq!(
            strip_library_extension("/x/libpython3.11").as_deref(),
            Some("libpython3.11")
        );
    }
}
