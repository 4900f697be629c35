//! Autonomous repo healing: clone, analyze, and drive the
//! fix → commit → PR → CI → retry loop.

pub mod branch;
pub mod ci;
pub mod cloner;
pub mod fix_agent;
pub mod orchestrator;
pub mod pr;
pub mod session;

pub use branch::BranchManager;
pub use ci::CiAgent;
pub use fix_agent::{FixAgent, LlmFixAgent, RuleBasedFixAgent};
pub use orchestrator::Orchestrator;
pub use pr::PrCreator;
pub use session::{
    CiStatus, Fix, FixStatus, HealResult, HealSession, MAX_RETRIES, ProgressEvent,
};
