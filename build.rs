fn main() {
    #[cfg(feature = "nidaq")]
    println!("cargo:rustc-link-lib=NIDAQmx");
    #[cfg(feature = "nidaq")]
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        println!(
            "cargo:rustc-link-search=native=C:/Program Files (x86)/National Instruments/Shared/ExternalCompilerSupport/C/lib64/msvc"
        );
    }
}
