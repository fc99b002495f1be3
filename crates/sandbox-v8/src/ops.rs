use deno_core::{OpState, op2};

/// Last envelope posted by the in-isolate harness. Taken (not peeked) by the
/// host after each phase so a stale report can never be read twice.
pub(crate) struct HarnessReport(pub(crate) String);

#[op2(fast)]
fn op_sandbox_report(state: &mut OpState, #[string] envelope: &str) {
    state.put(HarnessReport(envelope.to_owned()));
}

deno_core::extension!(sandbox_ext, ops = [op_sandbox_report]);
