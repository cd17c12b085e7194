//! Best-effort probes for run metadata tags.
//!
//! Every probe returns `Option`: a missing tool, a directory outside
//! version control, or an unset variable yields `None`, never an error.

use std::process::Command;

/// Version of the running project, when the process was launched by cargo.
pub fn project_version() -> Option<String> {
    std::env::var("CARGO_PKG_VERSION")
        .ok()
        .filter(|v| !v.is_empty())
}

pub fn git_commit() -> Option<String> {
    git(&["rev-parse", "HEAD"])
}

pub fn git_branch() -> Option<String> {
    git(&["rev-parse", "--abbrev-ref", "HEAD"])
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

pub fn host_name() -> Option<String> {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.is_empty() {
            return Some(host);
        }
    }
    let output = Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_never_panic() {
        // Values depend on the environment; only the contract is checked.
        let _ = project_version();
        let _ = git_commit();
        let _ = git_branch();
        let _ = host_name();
    }
}
