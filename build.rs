//! Build script: links `libespeak-ng` when the `espeak` feature is enabled.
//!
//! Builds without the feature (library core, HTTP layer, tests) never touch
//! the native library.
//!
//! ## Resolution order
//!
//! 1. **`ESPEAK_LIB_DIR`** env var: explicit directory containing
//!    `libespeak-ng.{a,so,dylib}`.
//! 2. **pkg-config**: `PKG_CONFIG_PATH` is augmented with Homebrew's
//!    pkgconfig directories on macOS.
//! 3. **Platform path walk**: Homebrew prefixes on macOS, the multi-arch
//!    directory plus `/usr/lib64`, `/usr/lib`, `/usr/local/lib` on Linux.
//!
//! A static archive is preferred over a shared library at every step.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=ESPEAK_LIB_DIR");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");

    if std::env::var_os("CARGO_FEATURE_ESPEAK").is_none() {
        return;
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    if let Ok(dir) = std::env::var("ESPEAK_LIB_DIR") {
        link_from_dir(&dir, &target_os);
        return;
    }

    if try_pkg_config(&target_os) {
        return;
    }

    for dir in candidate_dirs(&target_os, &target_arch) {
        let dylib = if target_os == "macos" { "libespeak-ng.dylib" } else { "libespeak-ng.so" };
        let dir_path = Path::new(&dir);
        if dir_path.join("libespeak-ng.a").exists() || dir_path.join(dylib).exists() {
            link_from_dir(&dir, &target_os);
            return;
        }
    }

    panic!(
        "\n\n\
         torchts: the `espeak` feature needs libespeak-ng.\n\
         \n\
         \t  macOS   :  brew install espeak-ng\n\
         \t  Ubuntu  :  sudo apt install libespeak-ng-dev\n\
         \t  Alpine  :  apk add espeak-ng-dev\n\
         \n\
         Or point the build script at the library:\n\
         \n\
         \t  ESPEAK_LIB_DIR=/your/path/lib cargo build --features espeak\n\n"
    );
}

/// Emit link directives for the library inside `dir`, static first.
fn link_from_dir(dir: &str, target_os: &str) {
    println!("cargo:rustc-link-search=native={dir}");
    if Path::new(dir).join("libespeak-ng.a").exists() {
        println!("cargo:rustc-link-lib=static=espeak-ng");
        // espeak-ng is C++
        if target_os == "macos" {
            println!("cargo:rustc-link-lib=dylib=c++");
        } else {
            println!("cargo:rustc-link-lib=dylib=stdc++");
        }
    } else {
        println!("cargo:rustc-link-lib=dylib=espeak-ng");
    }
}

fn try_pkg_config(target_os: &str) -> bool {
    let mut search: Vec<String> = Vec::new();
    if target_os == "macos" {
        for prefix in ["/opt/homebrew", "/usr/local"] {
            let p = format!("{prefix}/lib/pkgconfig");
            if Path::new(&p).is_dir() {
                search.push(p);
            }
        }
    }
    if let Ok(existing) = std::env::var("PKG_CONFIG_PATH") {
        if !existing.is_empty() {
            search.push(existing);
        }
    }

    let Ok(out) = Command::new("pkg-config")
        .args(["--libs", "espeak-ng"])
        .env("PKG_CONFIG_PATH", search.join(":"))
        .output()
    else {
        return false;
    };
    if !out.status.success() {
        return false;
    }

    let Ok(flags) = String::from_utf8(out.stdout) else {
        return false;
    };
    for token in flags.split_whitespace() {
        if let Some(path) = token.strip_prefix("-L") {
            println!("cargo:rustc-link-search=native={path}");
        } else if let Some(lib) = token.strip_prefix("-l") {
            println!("cargo:rustc-link-lib=dylib={lib}");
        }
    }
    true
}

fn candidate_dirs(target_os: &str, target_arch: &str) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();
    if target_os == "macos" {
        for prefix in ["/opt/homebrew", "/usr/local"] {
            dirs.push(format!("{prefix}/opt/espeak-ng/lib"));
            dirs.push(format!("{prefix}/lib"));
        }
    } else {
        let multiarch = match target_arch {
            "x86_64" => "x86_64-linux-gnu",
            "aarch64" => "aarch64-linux-gnu",
            "arm" => "arm-linux-gnueabihf",
            _ => "",
        };
        if !multiarch.is_empty() {
            dirs.push(format!("/usr/lib/{multiarch}"));
        }
        dirs.extend(["/usr/lib64", "/usr/lib", "/usr/local/lib"].map(String::from));
    }
    dirs.into_iter().filter(|d| Path::new(d).is_dir()).collect()
}
