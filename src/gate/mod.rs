pub mod policy;
pub mod raw;
pub mod service;

pub use policy::CapturePolicy;
pub use raw::{RawReading, Sample};
pub use service::{local_now, Admission, CaptureKey, GateOutcome, SampleGate, SkipReason};
