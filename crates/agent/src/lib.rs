//! The Forgehand agent loop.
//!
//! A phase runs **stream → act → observe** until the model ends its turn:
//!
//! 1. **Receive** user input (text and/or images) from a session
//! 2. **Stream** one model call, forwarding text and tool starts as they arrive
//! 3. **If tool use**: run the tools in order, append results, loop back to 2
//! 4. **If end of turn**: emit `complete`
//!
//! A phase that exceeds its token or turn ceiling saves a checkpoint and
//! emits `needs_continue` instead; the next phase resumes from it.

pub mod loop_runner;
pub mod session;
pub mod stream_decoder;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentLoop, PhaseEnd, PhaseOutcome, continuation_prompt};
pub use session::SessionRegistry;
pub use stream_decoder::{DecodedMessage, StreamDecoder};
