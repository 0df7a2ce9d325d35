//! Parser fuzz target: feed arbitrary text to the definition parser and, when it parses,
//! build it in an empty session. Neither step may panic.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if dsdlc::parse(s).is_err() {
        return;
    }
    let tree = dsdlc::MemoryTree::new().with("/fuzz/ns/Input.1.0.dsdl", s);
    let mut session = dsdlc::Session::new(tree, dsdlc::Options::default());
    session.add_target_root("/fuzz/ns");
    let _ = session.build_all();
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
