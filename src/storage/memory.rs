use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    ChartDefinition, ChartRef, ChartStore, DimensionDefinition, DimensionRef, IntervalStep,
};

const HISTORY_LEN: usize = 60;

/// One committed collection interval.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedInterval {
    pub committed_at: DateTime<Utc>,
    /// Step the time base was advanced by before collection, if any.
    pub elapsed: Option<Duration>,
    /// Values set during the interval, in dimension creation order.
    pub values: Vec<(String, i64)>,
}

/// Read-only view of a chart held by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct ChartSnapshot {
    pub definition: ChartDefinition,
    pub dimensions: Vec<DimensionDefinition>,
    pub completed_intervals: u64,
    pub history: Vec<CommittedInterval>,
}

impl ChartSnapshot {
    pub fn last_interval(&self) -> Option<&CommittedInterval> {
        self.history.last()
    }
}

struct DimensionEntry {
    definition: DimensionDefinition,
    pending: Option<i64>,
}

struct ChartEntry {
    definition: ChartDefinition,
    dimensions: Vec<DimensionEntry>,
    completed_intervals: u64,
    last_collected: Option<Instant>,
    pending_elapsed: Option<Duration>,
    history: VecDeque<CommittedInterval>,
}

/// In-process chart store keeping the last few committed intervals per chart.
#[derive(Default)]
pub struct MemoryStore {
    charts: DashMap<String, ChartEntry>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn chart_count(&self) -> usize {
        self.charts.len()
    }

    pub fn chart(&self, id: &str) -> Option<ChartSnapshot> {
        self.charts.get(id).map(|entry| ChartSnapshot {
            definition: entry.definition.clone(),
            dimensions: entry
                .dimensions
                .iter()
                .map(|dim| dim.definition.clone())
                .collect(),
            completed_intervals: entry.completed_intervals,
            history: entry.history.iter().cloned().collect(),
        })
    }
}

impl ChartStore for MemoryStore {
    fn find_chart(&self, id: &str) -> Option<ChartRef> {
        self.charts.get(id).map(|entry| ChartRef::new(entry.key().as_str()))
    }

    fn find_chart_by_type(&self, chart_type: &str, id: &str) -> Option<ChartRef> {
        self.find_chart(&format!("{chart_type}.{id}"))
    }

    fn create_chart(&self, definition: ChartDefinition) -> ChartRef {
        let full_id = definition.full_id();
        tracing::debug!(
            chart = %full_id,
            kind = definition.kind.as_str(),
            priority = definition.priority,
            update_every = definition.update_every,
            detail = definition.detail,
            "Creating chart"
        );

        self.charts.entry(full_id.clone()).or_insert_with(|| ChartEntry {
            definition,
            dimensions: Vec::new(),
            completed_intervals: 0,
            last_collected: None,
            pending_elapsed: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
        });
        ChartRef::new(full_id)
    }

    fn find_dimension(&self, chart: &ChartRef, id: &str) -> Option<DimensionRef> {
        let entry = self.charts.get(chart.id())?;
        entry
            .dimensions
            .iter()
            .find(|dim| dim.definition.id == id)
            .map(|dim| DimensionRef {
                chart: chart.clone(),
                id: dim.definition.id.as_str().into(),
            })
    }

    fn create_dimension(&self, chart: &ChartRef, definition: DimensionDefinition) -> DimensionRef {
        let id: Arc<str> = definition.id.as_str().into();
        if let Some(mut entry) = self.charts.get_mut(chart.id()) {
            if !entry.dimensions.iter().any(|dim| dim.definition.id == definition.id) {
                tracing::debug!(
                    chart = %chart,
                    dimension = %definition.id,
                    algorithm = definition.algorithm.as_str(),
                    multiplier = definition.multiplier,
                    divisor = definition.divisor,
                    hidden = definition.hidden,
                    "Creating dimension"
                );
                entry.dimensions.push(DimensionEntry {
                    definition,
                    pending: None,
                });
            }
        }
        DimensionRef {
            chart: chart.clone(),
            id,
        }
    }

    fn set_value(&self, chart: &ChartRef, dimension: &str, value: i64) -> bool {
        let Some(mut entry) = self.charts.get_mut(chart.id()) else {
            return false;
        };
        match entry
            .dimensions
            .iter_mut()
            .find(|dim| dim.definition.id == dimension)
        {
            Some(dim) => {
                dim.pending = Some(value);
                true
            }
            None => false,
        }
    }

    fn has_completed_interval(&self, chart: &ChartRef) -> bool {
        self.charts
            .get(chart.id())
            .is_some_and(|entry| entry.completed_intervals > 0)
    }

    fn advance_interval(&self, chart: &ChartRef, step: IntervalStep) {
        let Some(mut entry) = self.charts.get_mut(chart.id()) else {
            return;
        };
        let elapsed = match step {
            IntervalStep::Elapsed(elapsed) => elapsed,
            IntervalStep::PluginDriven => entry
                .last_collected
                .map(|at| at.elapsed())
                .unwrap_or_else(|| Duration::from_secs(entry.definition.update_every)),
        };
        entry.pending_elapsed = Some(elapsed);
    }

    fn commit_interval(&self, chart: &ChartRef) {
        let Some(mut entry) = self.charts.get_mut(chart.id()) else {
            return;
        };
        let entry = &mut *entry;

        let values = entry
            .dimensions
            .iter_mut()
            .filter_map(|dim| {
                dim.pending
                    .take()
                    .map(|value| (dim.definition.id.clone(), value))
            })
            .collect();

        if entry.history.len() == HISTORY_LEN {
            entry.history.pop_front();
        }
        entry.history.push_back(CommittedInterval {
            committed_at: Utc::now(),
            elapsed: entry.pending_elapsed.take(),
            values,
        });
        entry.completed_intervals += 1;
        entry.last_collected = Some(Instant::now());

        tracing::trace!(
            chart = %chart,
            completed = entry.completed_intervals,
            "Committed interval"
        );
    }
}
