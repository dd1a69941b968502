use crate::trends::parsing::{RawRecord, RecordError};

use num_traits::Float;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

// Readings are f64 today; anything float-like plots the same way.
pub(crate) trait Reading: Float {}
impl<T: Float> Reading for T {}

pub(crate) type ReadingTime = chrono::DateTime<chrono::Utc>;
pub(crate) type TimedReading<T> = (T, ReadingTime);

pub(crate) fn finite<T: Reading>(value: T) -> Option<T> {
    value.is_finite().then_some(value)
}

/// One valid observation of one field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub(crate) struct Point {
    pub x: ReadingTime,
    pub y: f64,
}

impl From<TimedReading<f64>> for Point {
    fn from((y, x): TimedReading<f64>) -> Self {
        Self { x, y }
    }
}

/// Points for a single field, ascending by time. Equal timestamps keep the
/// order their records arrived in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub(crate) struct Series {
    points: Vec<Point>,
}

impl Series {
    fn from_unsorted(mut points: Vec<Point>) -> Self {
        // `sort_by_key` is stable.
        points.sort_by_key(|point| point.x);
        Self { points }
    }

    pub(crate) fn points(&self) -> &[Point] {
        &self.points
    }

    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Something that went wrong while normalizing, without stopping it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Diagnostic {
    MalformedInput { field: String, input: Value },
    InvalidPoint { field: String, record: Value, reason: RecordError },
}

impl Diagnostic {
    fn report(&self) {
        match self {
            Diagnostic::MalformedInput { field, input } => {
                error!(%field, %input, "invalid data structure for pollutant");
            }
            Diagnostic::InvalidPoint { field, record, reason } => {
                warn!(%field, %record, %reason, "invalid data point");
            }
        }
    }
}

/// Cleans `records` into a time-ordered series for `field`, logging every
/// record it had to drop.
pub(crate) fn normalize(records: &Value, field: &str) -> Series {
    let (series, diagnostics) = normalize_with_diagnostics(records, field);
    diagnostics.iter().for_each(Diagnostic::report);
    series
}

/// Same as [`normalize`], handing the diagnostics back instead of logging them.
pub(crate) fn normalize_with_diagnostics(
    records: &Value,
    field: &str,
) -> (Series, Vec<Diagnostic>) {
    let Value::Array(records) = records else {
        let malformed = Diagnostic::MalformedInput {
            field: field.to_owned(),
            input: records.clone(),
        };
        return (Series::default(), vec![malformed]);
    };

    let mut diagnostics = Vec::new();
    let points: Vec<Point> = records
        .iter()
        .filter_map(|record| {
            match RawRecord::try_from(record).and_then(|raw| raw.reading_at(field)) {
                Ok(reading) => Some(Point::from(reading)),
                Err(reason) => {
                    diagnostics.push(Diagnostic::InvalidPoint {
                        field: field.to_owned(),
                        record: record.clone(),
                        reason,
                    });
                    None
                }
            }
        })
        .collect();

    let series = Series::from_unsorted(points);
    debug!(
        %field,
        kept = series.len(),
        dropped = diagnostics.len(),
        "normalized series"
    );

    (series, diagnostics)
}

/// Lowest and highest value to show on a value axis that starts at zero.
pub(crate) fn zero_based_range<T: Reading>(values: &[T]) -> Option<(T, T)> {
    let (lo, hi) = values.iter().copied().filter(|v| v.is_finite()).fold(
        (None, None),
        |(lo, hi): (Option<T>, Option<T>), v| {
            (
                Some(lo.map_or(v, |lo| lo.min(v))),
                Some(hi.map_or(v, |hi| hi.max(v))),
            )
        },
    );

    Some((lo?.min(T::zero()), hi?.max(T::zero())))
}

pub(crate) mod graphs {
    use crate::trends::analysis::*;

    use plotly::color::{Rgb, Rgba};
    use plotly::common::{Font, Line, LineShape, Marker, Mode, Orientation, Title};
    use plotly::layout::{Axis, AxisType, Legend, RangeMode};
    use plotly::{Bar, Layout, Plot, Scatter};
    use serde_json::Value;

    /// Colors handed out by field position, wrapping around.
    pub(crate) const PALETTE: [(u8, u8, u8); 8] = [
        (15, 238, 238),
        (255, 99, 132),
        (53, 162, 235),
        (255, 206, 86),
        (75, 192, 192),
        (153, 102, 255),
        (255, 159, 64),
        (231, 233, 237),
    ];

    // 0x88 / 0xff
    const BAR_FILL_ALPHA: f64 = 136.0 / 255.0;

    const ANIMATION_DURATION_MS: u32 = 2_000;
    const ANIMATION_EASING: &str = "easeInOutQuart";
    const CHART_HEIGHT: usize = 300;
    const LINE_SMOOTHING: f64 = 0.1;

    // Millisecond precision, so sub-second readings keep distinct x positions.
    const X_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct Color {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Color {
        fn rgb(self) -> Rgb {
            Rgb::new(self.r, self.g, self.b)
        }

        fn with_alpha(self, alpha: f64) -> Rgba {
            Rgba::new(self.r, self.g, self.b, alpha)
        }

        pub(crate) fn css(self) -> String {
            format!("rgb({}, {}, {})", self.r, self.g, self.b)
        }
    }

    pub(crate) fn palette_color(index: usize) -> Color {
        let (r, g, b) = PALETTE[index % PALETTE.len()];
        Color { r, g, b }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum ChartKind {
        Line,
        Scatter,
        Bar,
    }

    impl ChartKind {
        pub(crate) const ALL: [ChartKind; 3] = [ChartKind::Line, ChartKind::Scatter, ChartKind::Bar];

        fn title_suffix(self) -> &'static str {
            match self {
                ChartKind::Line => "Line Chart",
                ChartKind::Scatter => "Scatter Plot",
                ChartKind::Bar => "Bar Chart",
            }
        }

        fn slug(self) -> &'static str {
            match self {
                ChartKind::Line => "line",
                ChartKind::Scatter => "scatter",
                ChartKind::Bar => "bar",
            }
        }

        fn point_size(self) -> usize {
            match self {
                ChartKind::Scatter => 4,
                ChartKind::Line | ChartKind::Bar => 2,
            }
        }

        fn border_width(self) -> f64 {
            match self {
                ChartKind::Bar => 1.0,
                ChartKind::Line | ChartKind::Scatter => 2.0,
            }
        }
    }

    /// One chart of one field, ready to be dropped into a page.
    pub(crate) struct Chart {
        pub kind: ChartKind,
        pub title: String,
        pub color: Color,
        pub plot: Plot,
    }

    impl Chart {
        fn to_html(&self, div_id: &str) -> String {
            format!(
                r#"<div class="trend-chart" data-kind="{}" data-title="{}" data-color="{}" data-animation-duration="{}" data-animation-easing="{}">{}</div>"#,
                self.kind.slug(),
                escape_html(&self.title),
                self.color.css(),
                ANIMATION_DURATION_MS,
                ANIMATION_EASING,
                self.plot.to_inline_html(Some(div_id)),
            )
        }
    }

    /// What gets shown for a field: a placeholder or the three charts.
    pub(crate) enum Panel {
        NoData { field: String },
        Charts { field: String, charts: [Chart; 3] },
    }

    impl Panel {
        pub(crate) fn field(&self) -> &str {
            match self {
                Panel::NoData { field } | Panel::Charts { field, .. } => field,
            }
        }

        pub(crate) fn to_html(&self) -> String {
            let field = escape_html(self.field());
            let body = match self {
                Panel::NoData { .. } => {
                    "<p class=\"no-data\">No data available for this pollutant.</p>".to_owned()
                }
                Panel::Charts { charts, .. } => charts
                    .iter()
                    .map(|chart| {
                        chart.to_html(&format!("{}-{}", div_safe(self.field()), chart.kind.slug()))
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            };

            format!("<section class=\"trend\">\n<h2>{field} Trends</h2>\n{body}\n</section>")
        }
    }

    pub(crate) fn plot(series: &Series, field: &str, title: &str, kind: ChartKind, color: Color) -> Plot {
        let (times, values): (Vec<String>, Vec<f64>) = series
            .points()
            .iter()
            .map(|point| (point.x.format(X_FORMAT).to_string(), point.y))
            .unzip();
        let label = format!("{field} Levels");

        let mut plot = Plot::new();

        match kind {
            ChartKind::Line | ChartKind::Scatter => {
                let mode = if kind == ChartKind::Line { Mode::LinesMarkers } else { Mode::Markers };
                let mut line = Line::new().color(color.rgb()).width(kind.border_width());
                if kind == ChartKind::Line {
                    line = line.shape(LineShape::Spline).smoothing(LINE_SMOOTHING);
                }
                let trace = Scatter::new(times, values.clone())
                    .name(label.as_str())
                    .mode(mode)
                    .line(line)
                    .marker(Marker::new().color(color.rgb()).size(kind.point_size()));
                plot.add_trace(trace);
            }
            ChartKind::Bar => {
                let trace = Bar::new(times, values.clone()).name(label.as_str()).marker(
                    Marker::new()
                        .color(color.with_alpha(BAR_FILL_ALPHA))
                        .line(Line::new().color(color.rgb()).width(kind.border_width())),
                );
                plot.add_trace(trace);
            }
        }

        plot.set_layout(layout(title, &values));
        plot
    }

    fn layout(title: &str, values: &[f64]) -> Layout {
        let white = Rgb::new(255, 255, 255);
        let grid = Rgba::new(255, 255, 255, 0.1);

        let mut y_axis = Axis::new()
            .title(Title::with_text("Value"))
            .range_mode(RangeMode::ToZero)
            .color(white)
            .grid_color(grid);
        if let Some((lo, hi)) = zero_based_range(values) {
            if hi > lo {
                y_axis = y_axis.range(vec![lo, hi]);
            }
        }

        Layout::new()
            .title(Title::with_text(title))
            .height(CHART_HEIGHT)
            .font(Font::new().color(white))
            .paper_background_color(Rgba::new(0, 0, 0, 0.2))
            .plot_background_color(Rgba::new(0, 0, 0, 0.0))
            .legend(Legend::new().orientation(Orientation::Horizontal).y(1.15))
            .x_axis(
                Axis::new()
                    .title(Title::with_text("Date"))
                    .type_(AxisType::Date)
                    .color(white)
                    .grid_color(grid),
            )
            .y_axis(y_axis)
    }

    /// Normalizes `field` and builds its panel, colored by `index` into the palette.
    pub(crate) fn panel(records: &Value, field: &str, index: usize) -> Panel {
        let series = normalize(records, field);
        if series.is_empty() {
            return Panel::NoData {
                field: field.to_owned(),
            };
        }

        let color = palette_color(index);
        let charts = ChartKind::ALL.map(|kind| {
            let title = format!("{field} - {}", kind.title_suffix());
            let plot = plot(&series, field, &title, kind, color);
            Chart { kind, title, color, plot }
        });

        Panel::Charts {
            field: field.to_owned(),
            charts,
        }
    }

    /// One panel per field, in the order given.
    pub(crate) fn panels<S: AsRef<str>>(records: &Value, fields: &[S]) -> Vec<Panel> {
        fields
            .iter()
            .enumerate()
            .map(|(index, field)| panel(records, field.as_ref(), index))
            .collect()
    }

    pub(crate) fn page(panels: &[Panel]) -> String {
        let sections = panels.iter().map(Panel::to_html).collect::<Vec<_>>().join("\n");
        format!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Air quality trends</title>\n\
             <script src=\"https://cdn.plot.ly/plotly-2.12.1.min.js\"></script>\n</head>\n\
             <body style=\"background:#111827;color:#fff\">\n{sections}\n</body>\n</html>"
        )
    }

    fn div_safe(field: &str) -> String {
        field
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    pub(crate) fn escape_html(text: &str) -> String {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&#39;"),
                c => escaped.push(c),
            }
        }
        escaped
    }
}
