//! Storage seam between the protocol interpreter and the time-series engine.
//!
//! The engine itself lives outside this crate. [`ChartStore`] is the set of
//! operations the interpreter needs; [`MemoryStore`] is a small in-process
//! implementation used by the binary and the tests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{Algorithm, ChartType};

pub mod memory;

pub use memory::{ChartSnapshot, CommittedInterval, MemoryStore};

/// Handle to a chart, identified by its full `type.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartRef(Arc<str>);

impl ChartRef {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a dimension inside a chart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimensionRef {
    pub chart: ChartRef,
    pub id: Arc<str>,
}

/// Everything needed to create a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartDefinition {
    pub chart_type: String,
    pub id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub units: Option<String>,
    pub family: String,
    pub category: String,
    pub kind: ChartType,
    pub priority: i64,
    pub update_every: u64,
    /// Hidden from top-level summaries.
    pub detail: bool,
}

impl ChartDefinition {
    pub fn full_id(&self) -> String {
        format!("{}.{}", self.chart_type, self.id)
    }
}

/// Everything needed to create a dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionDefinition {
    pub id: String,
    pub name: Option<String>,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
}

/// How far to move a chart's time base before collecting the next interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalStep {
    /// The plugin measured the elapsed time itself.
    Elapsed(Duration),
    /// Derive the step from the wall clock.
    PluginDriven,
}

/// Operations the protocol interpreter performs against the time-series engine.
#[cfg_attr(test, mockall::automock)]
pub trait ChartStore: Send + Sync {
    /// Find a chart by its full id (`type.id`).
    fn find_chart(&self, id: &str) -> Option<ChartRef>;

    /// Find a chart by its type and id parts.
    fn find_chart_by_type(&self, chart_type: &str, id: &str) -> Option<ChartRef>;

    fn create_chart(&self, definition: ChartDefinition) -> ChartRef;

    fn find_dimension(&self, chart: &ChartRef, id: &str) -> Option<DimensionRef>;

    fn create_dimension(&self, chart: &ChartRef, definition: DimensionDefinition) -> DimensionRef;

    /// Record the value collected for `dimension` in the open interval.
    /// Returns `false` when the chart has no such dimension.
    fn set_value(&self, chart: &ChartRef, dimension: &str, value: i64) -> bool;

    /// Whether the chart has committed at least one interval.
    fn has_completed_interval(&self, chart: &ChartRef) -> bool;

    fn advance_interval(&self, chart: &ChartRef, step: IntervalStep);

    /// Commit the values set since the interval was opened.
    fn commit_interval(&self, chart: &ChartRef);
}
