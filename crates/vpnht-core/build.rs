use std::process::Command;

/// Commit id for the `/health` route and startup log. Release tarballs carry
/// no `.git`, so packagers may pass `VPNHT_GIT_HASH` through the environment.
fn git_hash() -> String {
    if let Ok(hash) = std::env::var("VPNHT_GIT_HASH") {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }
    Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=VPNHT_GIT_HASH={}", git_hash());

    let built_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    println!("cargo:rustc-env=VPNHT_BUILD_TIMESTAMP={built_at}");

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=VPNHT_BUILD_PROFILE={profile}");

    println!("cargo:rerun-if-env-changed=VPNHT_GIT_HASH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}
