use thiserror::Error;

/// A line the interpreter cannot accept. Any violation ends the plugin's run
/// and disables the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("CHART without a type.id")]
    ChartWithoutId,

    #[error("DIMENSION without an id")]
    DimensionWithoutId,

    #[error("DIMENSION without a CHART")]
    DimensionWithoutChart,

    #[error("BEGIN without a chart id")]
    BeginWithoutId,

    #[error("BEGIN on chart '{0}', which does not exist")]
    UnknownChart(String),

    #[error("SET without a dimension on chart '{}'", chart.as_deref().unwrap_or("<none>"))]
    SetWithoutDimension { chart: Option<String> },

    #[error("SET on dimension '{dimension}' with value '{value}', without a BEGIN")]
    SetWithoutBegin { dimension: String, value: String },

    #[error("END without a BEGIN")]
    EndWithoutBegin,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}
