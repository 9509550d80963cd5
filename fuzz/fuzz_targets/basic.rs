#![no_main]
use interval_collection::test_utils::{fuzzing, Action};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|actions: Vec<Action>| { fuzzing(actions) });
