use crate::config::Config;
use crate::server::filters::{FilterQuery, FiltersPanel, TimeRange, PRESETS};
use crate::trends::analysis::graphs;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) type FetchCallback = Box<dyn FnMut(&FilterQuery) + Send>;

/// Body of a filter update; absent fields keep their current value.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilterUpdate {
    pub location: Option<String>,
    pub time_range: Option<TimeRange>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilterPreset {
    pub value: TimeRange,
    pub label: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FiltersView {
    pub current: FilterQuery,
    pub current_label: Option<&'static str>,
    pub initialized: bool,
    pub last_fetch: Option<FilterQuery>,
    pub presets: Vec<FilterPreset>,
}

pub(crate) struct DashboardCtx {
    // Whatever upstream last sent us, unvalidated.
    records: Mutex<Value>,

    filters: Mutex<FiltersPanel<FetchCallback>>,
    last_fetch: Arc<Mutex<Option<FilterQuery>>>,

    default_fields: Vec<String>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DashboardCtx {
    pub(crate) fn new(config: &Config) -> Self {
        let last_fetch = Arc::new(Mutex::new(None));

        // The data source is external; all we do is remember what it was asked for.
        let fetched = Arc::clone(&last_fetch);
        let on_apply: FetchCallback = Box::new(move |query: &FilterQuery| {
            info!(location = %query.location, days = query.time_range.as_days(), "fetch requested");
            *lock(&fetched) = Some(query.clone());
        });

        Self {
            records: Mutex::new(Value::Array(Vec::new())),
            filters: Mutex::new(FiltersPanel::new(
                config.location.clone(),
                config.time_range,
                on_apply,
            )),
            last_fetch,
            default_fields: config.fields.clone(),
        }
    }

    /// Replaces the held records and returns how many top-level entries came in.
    /// Anything that isn't an array is kept as-is and counts as zero.
    pub(crate) fn submit_records(&self, records: Value) -> usize {
        let count = records.as_array().map_or(0, Vec::len);
        *lock(&self.records) = records;
        count
    }

    pub(crate) fn default_fields(&self) -> &[String] {
        &self.default_fields
    }

    pub(crate) fn panels<S: AsRef<str>>(&self, fields: &[S]) -> Vec<graphs::Panel> {
        let records = lock(&self.records);
        graphs::panels(&records, fields)
    }

    pub(crate) fn render_trends<S: AsRef<str>>(&self, fields: &[S]) -> String {
        graphs::page(&self.panels(fields))
    }

    /// Runs the startup fetch. Only the first call does anything.
    pub(crate) fn initialize_filters(&self) -> bool {
        lock(&self.filters).initialize()
    }

    pub(crate) fn apply_filters(&self, update: FilterUpdate) -> FilterQuery {
        let mut filters = lock(&self.filters);
        if let Some(location) = update.location {
            filters.set_location(location);
        }
        if let Some(time_range) = update.time_range {
            filters.set_time_range(time_range);
        }
        filters.apply()
    }

    pub(crate) fn filters_view(&self) -> FiltersView {
        let (current, initialized) = {
            let filters = lock(&self.filters);
            (filters.query(), filters.is_initialized())
        };

        FiltersView {
            current_label: current.time_range.label(),
            current,
            initialized,
            last_fetch: lock(&self.last_fetch).clone(),
            presets: PRESETS
                .iter()
                .map(|&(value, label)| FilterPreset { value, label })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> DashboardCtx {
        DashboardCtx::new(&Config::default())
    }

    #[test]
    fn startup_fetch_happens_once() {
        let ctx = ctx();
        assert_eq!(ctx.filters_view().last_fetch, None);
        assert!(!ctx.filters_view().initialized);

        assert!(ctx.initialize_filters());
        assert!(!ctx.initialize_filters());

        let view = ctx.filters_view();
        assert!(view.initialized);
        assert_eq!(view.last_fetch, Some(view.current.clone()));
        assert_eq!(view.current.location, "Mumbai");
    }

    #[test]
    fn partial_updates_keep_the_rest() {
        let ctx = ctx();

        let applied = ctx.apply_filters(FilterUpdate {
            location: None,
            time_range: Some(TimeRange::days(-7)),
        });

        assert_eq!(applied.location, "Mumbai");
        assert_eq!(applied.time_range.as_days(), -7);
        let view = ctx.filters_view();
        assert_eq!(view.last_fetch, Some(applied));
        assert_eq!(view.current_label, Some("Next 7 Days (forecasting)"));
    }

    #[test]
    fn unlisted_ranges_have_no_label() {
        let ctx = ctx();
        ctx.apply_filters(FilterUpdate {
            location: Some("Pune".into()),
            time_range: Some(TimeRange::days(90)),
        });

        assert_eq!(ctx.filters_view().current_label, None);
    }

    #[test]
    fn malformed_records_render_as_no_data() {
        let ctx = ctx();
        assert_eq!(ctx.submit_records(json!({ "date": "2024-01-01", "pm25": 3 })), 0);

        let panels = ctx.panels(&["pm25"]);
        assert!(matches!(&panels[0], graphs::Panel::NoData { .. }));
    }

    #[test]
    fn submitted_records_feed_the_charts() {
        let ctx = ctx();
        let count = ctx.submit_records(json!([
            { "date": "2024-01-01", "pm25": 3 },
            { "date": "2024-01-02", "pm25": "4.5" },
        ]));

        assert_eq!(count, 2);
        let html = ctx.render_trends(&["pm25", "no2"]);
        assert!(html.contains("pm25 - Line Chart"));
        assert!(html.contains("no2 Trends"));
        assert!(html.contains("No data available for this pollutant."));
    }

    #[test]
    fn presets_are_listed_in_selector_order() {
        let presets = ctx().filters_view().presets;
        let days: Vec<i32> = presets.iter().map(|p| p.value.as_days()).collect();
        assert_eq!(days, vec![1, 7, 31, 365, 730, -7]);
    }
}
