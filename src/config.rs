//! Load-time configuration.

use std::env;

/// Environment variable naming the Python executable to probe.
pub const PYTHON_ENV: &str = "PYTHON";

/// Executables tried when neither a hint nor `$PYTHON` is given.
const DEFAULT_EXECUTABLES: &[&str] = &["python3", "python"];

/// How to locate and start the interpreter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit executable to run the discovery probe with.
    pub python: Option<String>,
    /// Passed to `Py_InitializeEx`. Embedding hosts usually keep their own
    /// signal handlers, so this defaults to `false`.
    pub init_signals: bool,
    /// Set `PYTHONHOME` from the discovered prefixes when it is unset.
    pub set_python_home: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: None,
            init_signals: false,
            set_python_home: true,
        }
    }
}

impl Config {
    /// Defaults, with the executable taken from `$PYTHON` when set.
    pub fn from_env() -> Self {
        let python = env::var(PYTHON_ENV).ok().filter(|s| !s.is_empty());
        Self {
            python,
            ..Self::default()
        }
    }

    pub fn python(mut self, executable: impl Into<String>) -> Self {
        self.python = Some(executable.into());
        self
    }

    pub fn init_signals(mut self, yes: bool) -> Self {
        self.init_signals = yes;
        self
    }

    pub fn set_python_home(mut self, yes: bool) -> Self {
        self.set_python_home = yes;
        self
    }

    /// Executables to try, most specific first: the hint, `$PYTHON`,
    /// then the stock names.
    pub fn executables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let env_python = env::var(PYTHON_ENV).ok().filter(|s| !s.is_empty());
        for exe in self
            .python
            .iter()
            .cloned()
            .chain(env_python)
            .chain(DEFAULT_EXECUTABLES.iter().map(|s| s.to_string()))
        {
            if !out.contains(&exe) {
                out.push(exe);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_hint_comes_first() {
        let cfg = Config::default().python("/opt/py/bin/python3.12");
        let exes = cfg.executables();
        assert_eq!(exes[0], "/opt/py/bin/python3.12");
        assert!(exes.iter().any(|e| e == "python3"));
        assert!(exes.iter().any(|e| e == "python"));
    }

    #[test]
    fn executables_are_deduplicated() {
        let cfg = Config::default().python("python3");
        let exes = cfg.executables();
        assert_eq!(exes.iter().filter(|e| *e == "python3").count(), 1);
    }

    #[test]
    fn builder_flags() {
        let cfg = Config::default().init_signals(true).set_python_home(false);
        assert!(cfg.init_signals);
        assert!(!cfg.set_python_home);
    }
}
