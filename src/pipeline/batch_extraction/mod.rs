//! Patient Record Aggregator
//!
//! Turns one plain-text document per patient into one structured record per
//! patient, with failures isolated first per window, then per patient.
//!
//! ```text
//! Windower → Extraction Invoker → Reducer → Tolerant Parser → PatientOutcome
//! ```
//!
//! Windows of one patient run in document order. Patients are independent
//! and may run on a bounded worker pool sharing one model session.

pub mod types;
pub mod invoker;
pub mod reducer;
pub mod runner;

pub use types::*;
pub use invoker::ExtractionInvoker;
pub use reducer::Reducer;
pub use runner::{PatientPipeline, ProgressFn};
