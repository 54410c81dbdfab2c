//! Core pipeline orchestration and domain logic for IndexFlow.
//!
//! This crate ties collection, publishing, temporal aggregation, the quality
//! gate and the partitioned sink into end-to-end runs (`run_once`,
//! `run_transform`) and a fixed-delay [`Scheduler`].

pub mod aggregate;
pub mod history;
pub mod pipeline;
pub mod publish;
pub mod quality;
pub mod schedule;
pub mod sink;

pub use aggregate::{Aggregation, aggregate};
pub use history::load_accumulated;
pub use pipeline::{
    PipelineContext, ProgressReporter, RunReport, SilentProgress, run_once, run_transform,
};
pub use publish::{PublishOutcome, publish_cycle};
pub use quality::{DEFAULT_RULE, QualityReport, Rule, evaluate, parse_ruleset, validate};
pub use schedule::{ScheduleSummary, Scheduler};
pub use sink::{PARTITION_KEYS, PartitionedSink, SinkReport};
