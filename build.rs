use std::process::Command;

fn main() {
    // CI may hand us the commit directly; otherwise ask git.
    let commit = std::env::var("GIT_COMMIT_SHA")
        .ok()
        .or_else(|| {
            let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
            output
                .status
                .success()
                .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        })
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let short = commit.get(..7).unwrap_or(&commit);
    println!("cargo:rustc-env=GIT_COMMIT_SHORT={short}");
    println!("cargo:rerun-if-env-changed=GIT_COMMIT_SHA");

    if std::path::Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs/heads");
    }
}
