use std::time::Duration;

use azvm_common::settings::WaitPolicy;

use crate::context::{RunContext, RunNames};

pub fn fast_wait() -> WaitPolicy {
    WaitPolicy {
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_millis(250),
    }
}

pub fn fast_context() -> RunContext {
    RunContext::with_names(RunNames::with_suffix(123, "azvmtestaccount"), "local", fast_wait())
}
