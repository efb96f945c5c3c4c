// End-to-end tests for the emission pipeline: threshold gating, sync and
// async sinks, overflow policies, and the shutdown drain. Unit tests for
// individual modules live next to the code they cover.

pub(crate) mod support;

mod pipeline_tests;
