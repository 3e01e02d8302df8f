use std::env;
use std::process::Command;

// Stamps the footer with the commit the bundle was built from. CI can pin the
// value through FLEET_SAILS_COMMIT when the checkout has no .git directory.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-env-changed=FLEET_SAILS_COMMIT");

    let commit = env::var("FLEET_SAILS_COMMIT")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(git_short_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=FLEET_SAILS_COMMIT={}", commit.trim());
}

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}
