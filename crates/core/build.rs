use std::env;
use std::process::Command;

fn main() {
	let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
	let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

	println!("cargo:rustc-env=ROUTER_BUILD_PROFILE_NAME={profile}");
	println!("cargo:rustc-env=ROUTER_BUILD_TARGET={target}");
	println!(
		"cargo:rustc-env=ROUTER_BUILD_RUSTC_VERSION={}",
		rustc_version::version().unwrap()
	);

	// Best-effort git revision; absent in source tarballs or shallow clones.
	if let Ok(output) = Command::new("git").args(["rev-parse", "HEAD"]).output() {
		if output.status.success() {
			let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
			println!("cargo:rustc-env=ROUTER_BUILD_GIT_REVISION={rev}");
		}
	}
	println!("cargo:rerun-if-changed=../../.git/HEAD");
}
