/// Called from Java as `System.loadLibrary("demo")` followed by a native call.
#[unsafe(no_mangle)]
pub extern "C" fn demo_answer() -> i32 {
    if cfg!(feature = "logging") {
        eprintln!("demo_answer called");
    }
    42
}

#[test]
fn answers() {
    assert_eq!(demo_answer(), 42);
}
