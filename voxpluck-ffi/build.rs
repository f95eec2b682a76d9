// Header generation for the C ABI.
//
// With `cbindgen` on PATH the header is regenerated from src/lib.rs into
// $OUT_DIR and mirrored to include/voxpluck.h. Without it, the checked-in
// include/voxpluck.h is copied to $OUT_DIR so downstream builds find it in
// the same place either way.

use std::{env, fs, path::Path, path::PathBuf, process::Command};

const HEADER: &str = "voxpluck.h";

fn cbindgen_available() -> bool {
    Command::new("cbindgen")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn generate(crate_dir: &Path, out: &Path) -> bool {
    Command::new("cbindgen")
        .args(["--crate", "voxpluck-ffi", "--lang", "C", "--output"])
        .arg(out)
        .current_dir(crate_dir)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=include/{HEADER}");

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let checked_in = crate_dir.join("include").join(HEADER);
    let generated = out_dir.join(HEADER);

    if cbindgen_available() {
        if generate(&crate_dir, &generated) {
            let _ = fs::copy(&generated, &checked_in);
            println!("cargo:warning=voxpluck-ffi: generated {} with cbindgen", generated.display());
            return;
        }
        println!("cargo:warning=voxpluck-ffi: cbindgen failed; using the checked-in header");
    }

    if checked_in.exists() {
        fs::copy(&checked_in, &generated).expect("failed to copy include/voxpluck.h to OUT_DIR");
    } else {
        fs::write(&generated, b"/* voxpluck.h missing: install cbindgen or keep include/voxpluck.h checked in */\n")
            .expect("failed to write placeholder header");
    }
}
