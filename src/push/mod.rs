//! Resilient network push
//!
//! The push side of the pipeline: a supervised external encoder process,
//! the restart policy, and the channel that keeps frames flowing into the
//! encoder across transport failures.

pub mod channel;
pub mod policy;
pub mod supervisor;

pub use channel::{PushChannel, PushOutcome, PushState};
pub use policy::RetryPolicy;
pub use supervisor::{EncoderLink, EncoderProcess, EncoderSupervisor, Supervisor};
