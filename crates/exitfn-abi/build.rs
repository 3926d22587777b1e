fn main() {
    let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let version_script = format!("{manifest_dir}/version_scripts/libexitfn.map");
    // The exported symbols are only unmangled without `debug_assertions`, so the
    // version script can only be applied when they exist.
    let exports_symbols = std::env::var_os("CARGO_CFG_DEBUG_ASSERTIONS").is_none();
    if exports_symbols && std::path::Path::new(&version_script).exists() {
        println!("cargo:rustc-cdylib-link-arg=-Wl,--version-script={version_script}");
    }
    println!("cargo:rerun-if-changed=version_scripts/libexitfn.map");
}
