mod fake;
mod trace;
mod wait;

pub use fake::{Action, FakeClient, Verb};
pub use trace::trace_init;
pub use wait::wait_until;
