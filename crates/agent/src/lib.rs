//! Agent runtime for the auto-insurance intake conversation.
//!
//! Each turn follows a constrained loop:
//! 1. **Observe** the stored session, its vehicles and the recent history.
//! 2. **Ask the oracle** (`oracle`) for a reply and a verdict on the latest user
//!    message, letting it call the lookup tools (`tools`) that `guardrails` offers
//!    for the phase.
//! 3. **Reconcile** the verdict with the deterministic rules in `intake-core`.
//! 4. **Commit** the flow transition and decide whether to advance again.
//!
//! # Safety Principle
//!
//! The model only proposes. Which value is stored and which question comes next
//! are decided by the deterministic flow.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod lookup;
pub mod oracle;
pub mod prompts;
pub mod runtime;
pub mod tools;

pub use guardrails::{ToolDecision, ToolPolicy};
pub use llm::{LlmClient, LlmError, LlmErrorKind, OpenAiCompatibleClient};
pub use lookup::{NhtsaClient, QuoteSource, VehicleLookup, ZenQuotesClient};
pub use oracle::{LlmOracle, OracleAdapter, OracleReply};
pub use runtime::{AgentRuntime, RuntimeSettings, SessionSnapshot, Stores};
pub use tools::ToolRegistry;
