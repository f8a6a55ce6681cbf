pub mod actuator;
pub mod diff;
pub mod enricher;
pub mod filter;
pub mod metrics;
pub mod orchestrator;

pub use actuator::{FollowActuator, FollowService};
pub use diff::{find_non_reciprocal, DiffOptions, DiffReport, ReciprocityAuditor};
pub use enricher::{ProfileEnricher, UserDataSource};
pub use filter::{FilterPredicate, FollowFilter, Verdict};
pub use metrics::{RunMetrics, RunSummary};
pub use orchestrator::{PipelineOrchestrator, SyncApi};
