use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Put memory.x where the cortex-m-rt linker script can find it.
    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumb") {
        fs::copy("memory.x", out.join("memory.x")).expect("copying memory.x");
        println!("cargo:rustc-link-search={}", out.display());
    }
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
