//! # Dual-Source Research
//!
//! An iterative research loop built with the Rig framework. Given a topic
//! and the user's clarifications it plans queries, searches the public web
//! and an internal entity store in parallel, summarizes what comes back,
//! asks the model whether the findings are enough, and finally writes a
//! markdown report with its sources.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dual_source_research::{
//!     activity::TracingSink, llm::OllamaGenerator, research::LoopSettings,
//!     research::ResearchLoop, research::ResearchRequest, search::GatewaySettings,
//!     search::SearchGateway,
//! };
//!
//! # async fn demo() {
//! let generator = Arc::new(OllamaGenerator::new("http://localhost:11434", "llama3.2", 0.3));
//! let gateway = SearchGateway::new(None, None, GatewaySettings::default());
//! let research = ResearchLoop::new(generator, gateway, LoopSettings::default());
//!
//! let outcome = research.run(ResearchRequest::new("Rust async runtimes"), &TracingSink).await;
//! println!("{:?}", outcome.report());
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod llm;
pub mod research;
pub mod search;

pub use activity::{Activity, ActivityCategory, ActivitySink, ActivityStatus, RunEvent};
pub use config::Config;
pub use error::{BackendError, GenerationError, ResearchError};
pub use research::{ResearchLoop, ResearchRequest, RunOutcome, RunResult};
pub use search::{SearchGateway, SearchQuery, SearchResult, SearchSource};
