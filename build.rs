fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_XEN").is_none() {
        return;
    }

    if !(cfg!(target_os = "linux") && cfg!(target_arch = "x86_64")) {
        panic!(
            "the xen bindings of {} only work with linux on x86_64",
            env!("CARGO_PKG_NAME")
        );
    }

    println!("cargo:rustc-link-lib=xenctrl");
    println!("cargo:rustc-link-lib=xenforeignmemory");
}
