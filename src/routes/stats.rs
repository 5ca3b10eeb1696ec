//! Metrics dashboard and its machine-readable form.

use axum::{
    Json,
    extract::State,
    response::{Html, IntoResponse},
};
use chrono::Utc;

use crate::AppState;

pub async fn stats_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

pub async fn stats_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.stats.snapshot();

    let uptime_secs = (Utc::now() - snapshot.start_time).num_seconds().max(0);
    let uptime = format_uptime(uptime_secs);

    let html = DASHBOARD_TEMPLATE
        .replace("{hit_rate}", &format!("{:.1}", snapshot.hit_rate()))
        .replace("{hit_rate_bar}", &format!("{:.0}", snapshot.hit_rate()))
        .replace("{cost_saved}", &format!("{:.4}", snapshot.cost_saved()))
        .replace("{total_requests}", &snapshot.total_requests.to_string())
        .replace(
            "{avg_latency}",
            &format!("{:.0}", snapshot.avg_latency_ms()),
        )
        .replace("{cache_hits}", &snapshot.cache_hits.to_string())
        .replace("{cache_misses}", &snapshot.cache_misses.to_string())
        .replace("{errors}", &snapshot.errors.to_string())
        .replace("{uptime}", &uptime);

    Html(html)
}

fn format_uptime(total_secs: i64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

const DASHBOARD_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Semantic Cache Gateway - Stats</title>
    <meta charset="UTF-8">
    <meta http-equiv="refresh" content="5">
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);
            color: #fff;
            min-height: 100vh;
            padding: 40px 20px;
        }
        .container { max-width: 900px; margin: 0 auto; }
        h1 {
            text-align: center;
            margin-bottom: 40px;
            font-size: 2.5em;
            background: linear-gradient(90deg, #00d9ff, #00ff88);
            -webkit-background-clip: text;
            -webkit-text-fill-color: transparent;
        }
        .grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }
        .card {
            background: rgba(255,255,255,0.05);
            border-radius: 16px;
            padding: 24px;
            text-align: center;
            border: 1px solid rgba(255,255,255,0.1);
        }
        .card-value { font-size: 2.5em; font-weight: bold; margin-bottom: 8px; }
        .card-label {
            color: #888;
            font-size: 0.9em;
            text-transform: uppercase;
            letter-spacing: 1px;
        }
        .hit-rate { color: #00ff88; }
        .cost-saved { color: #00d9ff; }
        .requests { color: #ff6b6b; }
        .latency { color: #ffd93d; }
        .bar-container {
            background: rgba(255,255,255,0.1);
            border-radius: 10px;
            height: 20px;
            margin-top: 20px;
            overflow: hidden;
        }
        .bar-fill {
            height: 100%;
            background: linear-gradient(90deg, #00ff88, #00d9ff);
            border-radius: 10px;
        }
        .footer { text-align: center; color: #666; margin-top: 40px; font-size: 0.85em; }
        .footer a { color: #00d9ff; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Semantic Cache Gateway</h1>
        <div class="grid">
            <div class="card">
                <div class="card-value hit-rate">{hit_rate}%</div>
                <div class="card-label">Cache Hit Rate</div>
                <div class="bar-container">
                    <div class="bar-fill" style="width: {hit_rate_bar}%"></div>
                </div>
            </div>
            <div class="card">
                <div class="card-value cost-saved">${cost_saved}</div>
                <div class="card-label">Cost Saved</div>
            </div>
            <div class="card">
                <div class="card-value requests">{total_requests}</div>
                <div class="card-label">Total Requests</div>
            </div>
            <div class="card">
                <div class="card-value latency">{avg_latency}ms</div>
                <div class="card-label">Avg Latency</div>
            </div>
        </div>
        <div class="grid">
            <div class="card">
                <div class="card-value" style="color: #00ff88;">{cache_hits}</div>
                <div class="card-label">Cache Hits</div>
            </div>
            <div class="card">
                <div class="card-value" style="color: #ffd93d;">{cache_misses}</div>
                <div class="card-label">Cache Misses</div>
            </div>
            <div class="card">
                <div class="card-value" style="color: #ff6b6b;">{errors}</div>
                <div class="card-label">Errors</div>
            </div>
            <div class="card">
                <div class="card-value" style="color: #888; font-size: 1.2em;">{uptime}</div>
                <div class="card-label">Uptime</div>
            </div>
        </div>
        <div class="footer">
            Auto-refreshes every 5 seconds &middot;
            <a href="/stats/json">JSON API</a>
        </div>
    </div>
</body>
</html>
"#;
