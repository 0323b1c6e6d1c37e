use std::fmt;

/// Commands understood on a plugin's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Chart,
    Dimension,
    Begin,
    Set,
    End,
    Flush,
    Disable,
    /// Handshake extension: the plugin reports the pid to signal.
    MyPid,
    /// Handshake extension: the plugin stopped itself and wants a SIGCONT.
    StoppingWakeMeUp,
}

impl Command {
    /// Exact, case-sensitive lookup of a command word.
    ///
    /// The handshake commands are only part of the table when `extensions` is
    /// set; otherwise they are unknown like any other word.
    pub fn lookup(word: &str, extensions: bool) -> Option<Self> {
        let command = match word {
            "CHART" => Self::Chart,
            "DIMENSION" => Self::Dimension,
            "BEGIN" => Self::Begin,
            "SET" => Self::Set,
            "END" => Self::End,
            "FLUSH" => Self::Flush,
            "DISABLE" => Self::Disable,
            "MYPID" if extensions => Self::MyPid,
            "STOPPING_WAKE_ME_UP_PLEASE" if extensions => Self::StoppingWakeMeUp,
            _ => return None,
        };
        Some(command)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chart => "CHART",
            Self::Dimension => "DIMENSION",
            Self::Begin => "BEGIN",
            Self::Set => "SET",
            Self::End => "END",
            Self::Flush => "FLUSH",
            Self::Disable => "DISABLE",
            Self::MyPid => "MYPID",
            Self::StoppingWakeMeUp => "STOPPING_WAKE_ME_UP_PLEASE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a chart is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Stacked,
}

impl ChartType {
    /// Unknown names fall back to [`ChartType::Line`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "area" => Self::Area,
            "stacked" => Self::Stacked,
            _ => Self::Line,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Area => "area",
            Self::Stacked => "stacked",
        }
    }
}

/// How collected values of a dimension are turned into stored points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    Absolute,
    Incremental,
    PercentageOfAbsoluteRow,
    PercentageOfIncrementalRow,
}

impl Algorithm {
    /// Unknown names fall back to [`Algorithm::Absolute`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "incremental" => Self::Incremental,
            "percentage-of-absolute-row" => Self::PercentageOfAbsoluteRow,
            "percentage-of-incremental-row" => Self::PercentageOfIncrementalRow,
            _ => Self::Absolute,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absolute => "absolute",
            Self::Incremental => "incremental",
            Self::PercentageOfAbsoluteRow => "percentage-of-absolute-row",
            Self::PercentageOfIncrementalRow => "percentage-of-incremental-row",
        }
    }
}

/// Lenient integer parsing in the style plugins expect from C tooling:
/// optional leading whitespace and sign, then as many digits as are present.
/// Text without leading digits parses as 0 and overflow saturates.
pub fn parse_lenient_i64(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(b - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }
    value
}

/// Unsigned variant of [`parse_lenient_i64`]; negative input yields 0.
pub fn parse_lenient_u64(text: &str) -> u64 {
    u64::try_from(parse_lenient_i64(text)).unwrap_or(0)
}
