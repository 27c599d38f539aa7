fn main() {
    println!("cargo:rerun-if-env-changed=RUST_ANDROID_BUILD_ON_ANDROID");

    if std::env::var("RUST_ANDROID_BUILD_ON_ANDROID").is_ok() {
        println!("cargo:rustc-cfg=rust_android_build_on_android");
    }

    println!("cargo:rustc-check-cfg=cfg(rust_android_build_on_android)");
}
