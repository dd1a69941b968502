use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub(crate) const DEFAULT_LOCATION: &str = "Mumbai";

/// Day window handed to the data source. Positive looks back, negative looks
/// ahead (forecast). The value is opaque here and never clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TimeRangeInput", into = "i32")]
pub(crate) struct TimeRange(i32);

impl TimeRange {
    pub(crate) const fn days(days: i32) -> Self {
        Self(days)
    }

    pub(crate) fn as_days(self) -> i32 {
        self.0
    }

    pub(crate) fn is_forecast(self) -> bool {
        self.0 < 0
    }

    pub(crate) fn label(self) -> Option<&'static str> {
        PRESETS
            .iter()
            .find(|(range, _)| *range == self)
            .map(|(_, label)| *label)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self(7)
    }
}

impl From<TimeRange> for i32 {
    fn from(range: TimeRange) -> Self {
        range.0
    }
}

/// The selector choices offered to users. Other values are still accepted.
pub(crate) const PRESETS: [(TimeRange, &str); 6] = [
    (TimeRange::days(1), "Today's"),
    (TimeRange::days(7), "Last 7 Days"),
    (TimeRange::days(31), "Last Month"),
    (TimeRange::days(365), "Last Year"),
    (TimeRange::days(730), "Last 2 Years"),
    (TimeRange::days(-7), "Next 7 Days (forecasting)"),
];

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub(crate) enum TimeRangeError {
    #[error("time range `{0}` is not a whole number of days")]
    NotAnInteger(String),
}

impl FromStr for TimeRange {
    type Err = TimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(TimeRange)
            .map_err(|_| TimeRangeError::NotAnInteger(s.to_owned()))
    }
}

// Selector values arrive either as numbers or as the strings the form keeps.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRangeInput {
    Days(i32),
    Text(String),
}

impl TryFrom<TimeRangeInput> for TimeRange {
    type Error = TimeRangeError;

    fn try_from(input: TimeRangeInput) -> Result<Self, Self::Error> {
        match input {
            TimeRangeInput::Days(days) => Ok(TimeRange(days)),
            TimeRangeInput::Text(text) => text.parse(),
        }
    }
}

/// What the data source is asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilterQuery {
    pub location: String,
    pub time_range: TimeRange,
}

/// Location and time-range inputs plus the callback that consumes them.
///
/// The callback fires once from [`FiltersPanel::initialize`] at startup and
/// once for every [`FiltersPanel::apply`].
pub(crate) struct FiltersPanel<F> {
    location: String,
    time_range: TimeRange,
    on_apply: F,
    initialized: bool,
}

impl<F: FnMut(&FilterQuery)> FiltersPanel<F> {
    pub(crate) fn new(location: impl Into<String>, time_range: TimeRange, on_apply: F) -> Self {
        Self {
            location: location.into(),
            time_range,
            on_apply,
            initialized: false,
        }
    }

    pub(crate) fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    pub(crate) fn set_time_range(&mut self, time_range: TimeRange) {
        self.time_range = time_range;
    }

    pub(crate) fn query(&self) -> FilterQuery {
        FilterQuery {
            location: self.location.clone(),
            time_range: self.time_range,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Applies the current filters the first time it is called. Returns
    /// whether it did anything.
    pub(crate) fn initialize(&mut self) -> bool {
        if self.initialized {
            warn!("filters already initialized; ignoring");
            return false;
        }

        self.initialized = true;
        self.apply();
        true
    }

    pub(crate) fn apply(&mut self) -> FilterQuery {
        let query = self.query();
        info!(
            location = %query.location,
            days = query.time_range.as_days(),
            forecast = query.time_range.is_forecast(),
            "applying filters"
        );
        (self.on_apply)(&query);
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Seen = Rc<RefCell<Vec<FilterQuery>>>;

    fn recording_panel() -> (FiltersPanel<impl FnMut(&FilterQuery)>, Seen) {
        let seen = Seen::default();
        let sink = Rc::clone(&seen);
        let panel = FiltersPanel::new(DEFAULT_LOCATION, TimeRange::default(), move |query: &FilterQuery| {
            sink.borrow_mut().push(query.clone())
        });
        (panel, seen)
    }

    #[test]
    fn initialize_fires_exactly_once() {
        let (mut panel, seen) = recording_panel();

        assert!(panel.initialize());
        assert!(!panel.initialize());
        assert!(panel.is_initialized());

        assert_eq!(
            *seen.borrow(),
            vec![FilterQuery {
                location: "Mumbai".into(),
                time_range: TimeRange::days(7),
            }]
        );
    }

    #[test]
    fn apply_fires_on_every_call() {
        let (mut panel, seen) = recording_panel();
        panel.initialize();

        panel.set_location("Delhi");
        panel.apply();
        panel.apply();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].location, "Delhi");
    }

    #[test]
    fn forecast_range_is_passed_through_unchanged() {
        let (mut panel, seen) = recording_panel();

        panel.set_time_range("-7".parse().unwrap());
        let applied = panel.apply();

        assert_eq!(applied.time_range.as_days(), -7);
        assert!(applied.time_range.is_forecast());
        assert_eq!(seen.borrow()[0].time_range, TimeRange::days(-7));
    }

    #[test]
    fn unlisted_ranges_are_accepted() {
        let range: TimeRange = " 90 ".parse().unwrap();
        assert_eq!(range.as_days(), 90);
        assert_eq!(range.label(), None);
        assert_eq!(TimeRange::days(31).label(), Some("Last Month"));
    }

    #[test]
    fn bad_selector_text_is_rejected() {
        assert_eq!(
            "week".parse::<TimeRange>(),
            Err(TimeRangeError::NotAnInteger("week".into()))
        );
    }

    #[test]
    fn query_accepts_numeric_or_text_ranges() {
        let numeric: FilterQuery =
            serde_json::from_str(r#"{"location":"Pune","timeRange":-7}"#).unwrap();
        let text: FilterQuery =
            serde_json::from_str(r#"{"location":"Pune","timeRange":"-7"}"#).unwrap();

        assert_eq!(numeric, text);
        assert_eq!(
            serde_json::to_value(&numeric).unwrap(),
            serde_json::json!({ "location": "Pune", "timeRange": -7 })
        );
        assert!(serde_json::from_str::<FilterQuery>(r#"{"location":"Pune","timeRange":"soon"}"#).is_err());
    }
}
