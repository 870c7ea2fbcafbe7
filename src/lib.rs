//! Parses PostgreSQL `EXPLAIN` / `EXPLAIN (ANALYZE)` output — text or JSON,
//! with or without export artifacts — into a normalized plan tree, then
//! annotates it with derived metrics (exclusive cost and duration, planner
//! estimate error, outlier tags).
//!
//! The entry points are [`from_source`] (format auto-detected), [`from_text`]
//! and [`from_json`] (format known up front), and [`create_plan`] (wraps a
//! parsed tree plus the original query into the full [`Plan`] envelope and
//! runs [`analyze`] over it).

mod analyze;
mod dispatch;
mod error;
mod facade;
mod json;
mod lexicon;
mod model;
mod text;
mod util;

pub use analyze::analyze;
pub use dispatch::from_source;
pub use error::{ExplainError, Result};
pub use facade::create_plan;
pub use json::from_json;
pub use model::{EstimateDirection, Node, ParentRelationship, Plan, PlanTree, Trigger, Worker};
pub use text::from_text;
