use std::env;
use std::process::exit;

fn main() -> anyhow::Result<()> {
    if env::var("CARGO").is_err() {
        eprintln!("This binary may only be called via `cargo android-build`.");
        exit(1);
    }

    let args = std::env::args().skip(1).collect::<Vec<_>>();

    rust_android_build::cli::run(args)
}
