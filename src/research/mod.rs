//! The iterative research loop and the four model-backed steps it drives.

pub mod judge;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod report;
pub mod state;
pub mod summarizer;

pub use judge::{Judge, Verdict};
pub use orchestrator::{
    LoopSettings, Phase, ResearchLoop, ResearchRequest, RunOutcome, RunResult, StopReason,
};
pub use planner::Planner;
pub use report::ReportCompiler;
pub use state::{Clarification, Finding, ResearchState};
pub use summarizer::Summarizer;
