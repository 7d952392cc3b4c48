use std::{env, fs, path::PathBuf};

fn main() {
    // Make memory.x visible to the linker. The link scripts themselves are
    // passed via rustflags in .cargo/config.toml.
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let memory_x = fs::read_to_string("memory.x").expect("Failed to read memory.x");
    fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
}
