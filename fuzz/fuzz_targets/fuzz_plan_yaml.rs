//! Fuzz target for emulation plan parsing.

#![no_main]

use atomic_runner::catalog::EmulationPlan;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(plan) = EmulationPlan::from_slice(data) {
        for (_, test) in plan.enabled_tests() {
            let _ = test.inputs.to_pairs();
        }
    }
});
