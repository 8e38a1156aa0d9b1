// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=WATERCAM_VERSION");

    // Packagers building from a tarball set the version explicitly
    let version = std::env::var("WATERCAM_VERSION")
        .ok()
        .or_else(git_version)
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output with the leading `v` removed.
///
/// "v0.2.0" stays "0.2.0"; "v0.2.0-4-gabc1234" becomes "0.2.0+4.abc1234".
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let described = described.strip_prefix('v').unwrap_or(&described);

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [hash, commits, base] => {
            let hash = hash.strip_prefix('g').unwrap_or(hash);
            Some(format!("{}+{}.{}", base, commits, hash))
        }
        _ => Some(described.to_string()),
    }
}
