//! evalbox evaluation engine.
//!
//! ```text
//! EvaluationRequest → Validator → Extractor → Harness → (Sandbox × N) → Quality → EvaluationResponse
//! ```
//!
//! [`Engine`] is the only entry point a caller needs. It is built once from
//! an [`EngineConfig`] and may serve any number of concurrent evaluations;
//! no state but a completion counter is shared between them.

pub mod config;
pub mod engine;
pub mod extractor;
pub mod harness;
pub mod quality;
pub mod request;
pub mod response;
pub mod telemetry;
pub mod validator;

pub use config::{ConfigError, EngineConfig};
pub use engine::{submission_digest, Engine, EngineError, EngineStats, HEALTH_CHECK_SOURCE};
pub use harness::CancellationToken;
pub use request::EvaluationRequest;
pub use response::{EvaluationResponse, FeedbackInput, ProfileSignal, SOME_TESTS_FAILED};
pub use telemetry::init_tracing;
