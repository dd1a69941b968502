pub mod config;
pub mod server;
pub mod trends;

use axum::extract::{Query, State};
use axum::{body::Bytes, extract::Path, http::StatusCode, response::Html, routing::*, Json, Router};

use config::Config;
use server::filters::FilterQuery;
use server::store::{DashboardCtx, FilterUpdate, FiltersView};

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

type CtxState = Arc<DashboardCtx>;

async fn post_records(State(ctx): State<CtxState>, body: Bytes) -> Result<Json<Value>, StatusCode> {
    match serde_json::from_slice::<Value>(&body) {
        Err(err) => {
            warn!(%err, "rejected records body");
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }

        Ok(records) => {
            let count = ctx.submit_records(records);
            info!(count, "records submitted");
            Ok(Json(json!({ "records": count })))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TrendsParams {
    fields: Option<String>,
}

impl TrendsParams {
    fn fields(&self) -> Vec<String> {
        self.fields
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

async fn get_trends(State(ctx): State<CtxState>, Query(params): Query<TrendsParams>) -> Html<String> {
    let fields = params.fields();

    if fields.is_empty() {
        Html(ctx.render_trends(ctx.default_fields()))
    } else {
        Html(ctx.render_trends(fields.as_slice()))
    }
}

async fn get_field_trend(State(ctx): State<CtxState>, Path(field): Path<String>) -> Html<String> {
    Html(ctx.render_trends(&[field]))
}

async fn get_filters(State(ctx): State<CtxState>) -> Json<FiltersView> {
    Json(ctx.filters_view())
}

async fn post_filters(State(ctx): State<CtxState>, Json(update): Json<FilterUpdate>) -> Json<FilterQuery> {
    Json(ctx.apply_filters(update))
}

fn router(ctx: CtxState) -> Router {
    Router::new()
        .route("/records", post(post_records))
        .route("/trends", get(get_trends))
        .route("/trends/:field", get(get_field_trend))
        .route("/filters", get(get_filters).post(post_filters))
        .with_state(ctx)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let ctx = Arc::new(DashboardCtx::new(&config));

    // Stands in for the form's first render: fetch once with the defaults.
    ctx.initialize_filters();

    let app = router(ctx);

    info!(addr = %config.bind, "listening");

    axum_server::Server::bind(config.bind)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use server::filters::TimeRange;

    fn state() -> State<CtxState> {
        State(Arc::new(DashboardCtx::new(&Config::default())))
    }

    #[tokio::test]
    async fn records_endpoint_counts_and_rejects_garbage() {
        let ctx = state();

        let accepted = post_records(ctx.clone(), Bytes::from_static(br#"[{"date":"2024-01-01","pm25":1}]"#))
            .await
            .unwrap();
        assert_eq!(accepted.0, json!({ "records": 1 }));

        let not_a_list = post_records(ctx.clone(), Bytes::from_static(br#"{"date":"2024-01-01"}"#))
            .await
            .unwrap();
        assert_eq!(not_a_list.0, json!({ "records": 0 }));

        let garbage = post_records(ctx, Bytes::from_static(b"not json")).await;
        assert_eq!(garbage.unwrap_err(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn trends_fall_back_to_configured_fields() {
        let ctx = state();

        let Html(page) = get_trends(ctx.clone(), Query(TrendsParams::default())).await;
        for field in Config::default().fields {
            assert!(page.contains(&format!("{field} Trends")));
        }

        let Html(page) = get_trends(ctx, Query(TrendsParams { fields: Some(" no2, ,o3".into()) })).await;
        assert!(page.contains("no2 Trends"));
        assert!(page.contains("o3 Trends"));
        assert!(!page.contains("pm25 Trends"));
    }

    #[tokio::test]
    async fn single_field_page_charts_submitted_records() {
        let ctx = state();
        ctx.0.submit_records(json!([
            { "date": "2024-01-03", "pm25": "12.5" },
            { "date": "2024-01-01", "pm25": "8" },
            { "date": "2024-01-02", "pm25": "bad" },
        ]));

        let Html(page) = get_field_trend(ctx, Path("pm25".to_owned())).await;
        assert!(page.contains("pm25 - Scatter Plot"));
        assert!(page.contains("pm25 - Bar Chart"));
        assert!(!page.contains("No data available"));
    }

    #[tokio::test]
    async fn forecast_filters_reach_the_fetch_callback() {
        let ctx = state();

        let update: FilterUpdate = serde_json::from_value(json!({ "timeRange": -7 })).unwrap();
        let Json(applied) = post_filters(ctx.clone(), Json(update)).await;
        assert_eq!(applied.time_range, TimeRange::days(-7));

        let Json(view) = get_filters(ctx).await;
        assert_eq!(view.last_fetch.map(|q| q.time_range.as_days()), Some(-7));
    }
}
