// build.rs

/// Probes libX11 and libXrandr through pkg-config and emits cfg flags for
/// optional Xlib entry points.
///
/// `has_xio_error_exit_handler` is set when libX11 is at least 1.7.0, the first
/// release exporting `XSetIOErrorExitHandler`.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo::rustc-check-cfg=cfg(has_xio_error_exit_handler)");

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" && !target_os.ends_with("bsd") {
        println!("cargo:warning=backdrop targets X11; building without libX11 probing");
        return;
    }

    let mut pkg_config_success = true;
    for lib in ["x11", "xrandr"] {
        if let Err(e) = pkg_config::probe_library(lib) {
            eprintln!("pkg-config failed for library '{}': {}", lib, e);
            pkg_config_success = false;
        }
    }

    if !pkg_config_success {
        // Assume the libraries live in a standard search path.
        println!("cargo:rustc-link-lib=X11");
        println!("cargo:rustc-link-lib=Xrandr");
        println!("cargo:rustc-link-search=/usr/lib");
        eprintln!("Manual linking flags applied. Ensure X11 and Xrandr development libraries are installed.");
        return;
    }

    match pkg_config::Config::new()
        .atleast_version("1.7.0")
        .cargo_metadata(false)
        .probe("x11")
    {
        Ok(_) => println!("cargo:rustc-cfg=has_xio_error_exit_handler"),
        Err(_) => println!(
            "cargo:warning=libX11 older than 1.7.0: a lost X connection will terminate the process"
        ),
    }
}
