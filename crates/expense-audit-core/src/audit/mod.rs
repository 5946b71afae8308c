//! Audit orchestration: state machine, fusion and cancellation
//!
//! - `orchestrator`: runs audits and owns their lifecycle
//! - `fusion`: rule + semantic outcome to verdict and risk
//! - `cancel`: cooperative cancellation tokens

pub mod cancel;
pub mod fusion;
pub mod orchestrator;

pub use cancel::CancellationToken;
pub use fusion::{fuse, risk_score, Verdict, DEFAULT_RAG_PASS_THRESHOLD};
pub use orchestrator::{AuditHandle, AuditOrchestrator, CANCELLED_REASON};
