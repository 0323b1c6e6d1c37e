use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::command::{parse_lenient_i64, parse_lenient_u64, Algorithm, ChartType, Command};
use super::error::ProtocolViolation;
use super::tokenizer::{split_words, Words, MAX_WORDS};
use crate::config::clamp_interval;
use crate::plugin::PluginDescriptor;
use crate::storage::{ChartDefinition, ChartRef, ChartStore, DimensionDefinition, IntervalStep};

const DEFAULT_PRIORITY: i64 = 1000;

type LineWords<'a> = Words<'a, MAX_WORDS>;

/// What the worker should do after a line was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// The plugin asked to be disabled.
    Disable,
    /// The plugin reported the pid that should receive signals.
    ReportedPid(u32),
    /// The plugin stopped itself and waits for a SIGCONT.
    Pause,
}

/// Protocol state for one run of one plugin process.
///
/// A session starts without a chart context and with no samples. `CHART` and
/// `BEGIN` set the context, `END` commits and clears it, `FLUSH` clears it
/// without committing.
pub struct ProtocolSession {
    plugin: Arc<PluginDescriptor>,
    store: Arc<dyn ChartStore>,
    extensions: bool,
    current_chart: Option<ChartRef>,
    samples: u64,
}

impl ProtocolSession {
    pub fn new(plugin: Arc<PluginDescriptor>, store: Arc<dyn ChartStore>, extensions: bool) -> Self {
        Self {
            plugin,
            store,
            extensions,
            current_chart: None,
            samples: 0,
        }
    }

    pub fn current_chart(&self) -> Option<&ChartRef> {
        self.current_chart.as_ref()
    }

    /// Number of `SET` lines accepted in this run.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Interpret one line of plugin output. Blank lines are ignored.
    pub fn process_line(&mut self, line: &str) -> Result<Flow, ProtocolViolation> {
        let words = split_words::<MAX_WORDS>(line);
        let Some(first) = words.non_empty(0) else {
            return Ok(Flow::Continue);
        };

        let command = Command::lookup(first, self.extensions)
            .ok_or_else(|| ProtocolViolation::UnknownCommand(first.to_string()))?;

        match command {
            Command::Chart => self.chart(&words),
            Command::Dimension => self.dimension(&words),
            Command::Begin => self.begin(&words),
            Command::Set => self.set(&words),
            Command::End => self.end(),
            Command::Flush => {
                debug!(plugin = %self.plugin.id(), "FLUSH requested");
                self.current_chart = None;
                Ok(Flow::Continue)
            }
            Command::Disable => Ok(Flow::Disable),
            Command::MyPid => {
                let pid = words.get(1).map(parse_lenient_u64).unwrap_or(0);
                match u32::try_from(pid) {
                    Ok(pid) if pid > 0 => Ok(Flow::ReportedPid(pid)),
                    _ => Ok(Flow::Continue),
                }
            }
            Command::StoppingWakeMeUp => Ok(Flow::Pause),
        }
    }

    fn chart(&mut self, words: &LineWords<'_>) -> Result<Flow, ProtocolViolation> {
        self.current_chart = None;

        let (chart_type, id) = words
            .get(1)
            .and_then(|full_id| full_id.split_once('.'))
            .filter(|(chart_type, id)| !chart_type.is_empty() && !id.is_empty())
            .ok_or(ProtocolViolation::ChartWithoutId)?;

        if let Some(existing) = self.store.find_chart_by_type(chart_type, id) {
            debug!(
                plugin = %self.plugin.id(),
                chart = %existing,
                "Chart already exists, not adding it again"
            );
            self.current_chart = Some(existing);
            return Ok(Flow::Continue);
        }

        let category = words.non_empty(6).unwrap_or(chart_type);
        let update_every = words
            .get(9)
            .map(parse_lenient_u64)
            .filter(|every| *every > 0)
            .map(clamp_interval)
            .unwrap_or_else(|| self.plugin.update_every());

        let definition = ChartDefinition {
            chart_type: chart_type.to_string(),
            id: id.to_string(),
            name: words.non_empty(2).map(str::to_string),
            title: words.get(3).map(str::to_string),
            units: words.get(4).map(str::to_string),
            family: words.non_empty(5).unwrap_or(id).to_string(),
            category: category.to_string(),
            kind: words.get(7).map(ChartType::from_name).unwrap_or_default(),
            priority: words.get(8).map(parse_lenient_i64).unwrap_or(DEFAULT_PRIORITY),
            update_every,
            detail: category == "none",
        };

        let chart = self.store.create_chart(definition);
        self.plugin.set_update_every(update_every);
        self.current_chart = Some(chart);
        Ok(Flow::Continue)
    }

    fn dimension(&mut self, words: &LineWords<'_>) -> Result<Flow, ProtocolViolation> {
        let id = words
            .non_empty(1)
            .ok_or(ProtocolViolation::DimensionWithoutId)?;
        let chart = self
            .current_chart
            .as_ref()
            .ok_or(ProtocolViolation::DimensionWithoutChart)?;

        if self.store.find_dimension(chart, id).is_some() {
            debug!(
                plugin = %self.plugin.id(),
                chart = %chart,
                dimension = id,
                "Dimension already exists, not adding it again"
            );
            return Ok(Flow::Continue);
        }

        let factor = |index: usize| match words.non_empty(index).map(parse_lenient_i64) {
            Some(0) | None => 1,
            Some(value) => value,
        };

        let definition = DimensionDefinition {
            id: id.to_string(),
            name: words.non_empty(2).map(str::to_string),
            algorithm: words
                .non_empty(3)
                .map(Algorithm::from_name)
                .unwrap_or_default(),
            multiplier: factor(4),
            divisor: factor(5),
            hidden: words.get(6) == Some("hidden"),
        };
        self.store.create_dimension(chart, definition);
        Ok(Flow::Continue)
    }

    fn begin(&mut self, words: &LineWords<'_>) -> Result<Flow, ProtocolViolation> {
        let id = words.non_empty(1).ok_or(ProtocolViolation::BeginWithoutId)?;
        let chart = self
            .store
            .find_chart(id)
            .ok_or_else(|| ProtocolViolation::UnknownChart(id.to_string()))?;

        if self.store.has_completed_interval(&chart) {
            let microseconds = words.non_empty(2).map(parse_lenient_u64).unwrap_or(0);
            let step = if microseconds > 0 {
                IntervalStep::Elapsed(Duration::from_micros(microseconds))
            } else {
                IntervalStep::PluginDriven
            };
            self.store.advance_interval(&chart, step);
        }

        self.current_chart = Some(chart);
        Ok(Flow::Continue)
    }

    fn set(&mut self, words: &LineWords<'_>) -> Result<Flow, ProtocolViolation> {
        let Some(dimension) = words.non_empty(1) else {
            return Err(ProtocolViolation::SetWithoutDimension {
                chart: self.current_chart.as_ref().map(|chart| chart.id().to_string()),
            });
        };
        let value = words.non_empty(2).unwrap_or("0");

        let Some(chart) = self.current_chart.as_ref() else {
            return Err(ProtocolViolation::SetWithoutBegin {
                dimension: dimension.to_string(),
                value: value.to_string(),
            });
        };

        if !self.store.set_value(chart, dimension, parse_lenient_i64(value)) {
            warn!(
                plugin = %self.plugin.id(),
                chart = %chart,
                dimension,
                "SET on a dimension the chart does not have"
            );
        }
        self.samples += 1;
        Ok(Flow::Continue)
    }

    fn end(&mut self) -> Result<Flow, ProtocolViolation> {
        let chart = self
            .current_chart
            .take()
            .ok_or(ProtocolViolation::EndWithoutBegin)?;
        self.store.commit_interval(&chart);
        Ok(Flow::Continue)
    }
}
