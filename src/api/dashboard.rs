//! Single-page HTML status view at `/dashboard`.

use std::fmt::Write;

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

use super::artifacts::Artifact;
use crate::cell::{CellCapabilities, CellHealth, CellMonitor};
use crate::federation::EndpointInfo;

pub const DASHBOARD_PATH: &str = "/dashboard";

const STYLE: &str = r#"
    * { margin: 0; padding: 0; box-sizing: border-box; }
    body { font-family: system-ui, -apple-system, sans-serif; background: #0a0a0a; color: #e0e0e0; padding: 2rem; }
    h1 { font-size: 1.5rem; margin-bottom: 1.5rem; color: #fff; }
    h2 { font-size: 1.1rem; margin-bottom: 0.75rem; color: #a0a0a0; text-transform: uppercase; letter-spacing: 0.05em; }
    .grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 1.5rem; }
    .card { background: #1a1a1a; border: 1px solid #2a2a2a; border-radius: 8px; padding: 1.25rem; }
    .status { display: inline-block; padding: 2px 8px; border-radius: 4px; font-size: 0.85rem; font-weight: 600; }
    .status.running, .status.connected { background: #0a3d0a; color: #4ade80; }
    .status.stopped, .status.disconnected { background: #3d0a0a; color: #f87171; }
    .status.error, .status.connecting { background: #3d2a0a; color: #fbbf24; }
    .metric { margin: 0.5rem 0; }
    .metric-label { color: #888; font-size: 0.85rem; }
    .metric-value { color: #fff; font-weight: 500; }
    ul { list-style: none; }
    li { padding: 0.35rem 0; border-bottom: 1px solid #222; font-size: 0.9rem; }
    li:last-child { border-bottom: none; }
    .desc { color: #888; font-size: 0.8rem; }
"#;

/// The dashboard as an artifact, rendered fresh on every request.
pub fn dashboard_artifact(monitor: CellMonitor) -> Artifact {
    Artifact::dynamic(DASHBOARD_PATH, move |_req| {
        let html = render(&monitor.health(), &monitor.capabilities(), &monitor.connections());
        async move { html_response(html) }
    })
}

fn html_response(html: String) -> Response {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

pub fn render(
    health: &CellHealth,
    capabilities: &CellCapabilities,
    endpoints: &[EndpointInfo],
) -> String {
    let name = escape_html(&health.name);
    let status = health.status.as_str();

    let mut html = String::with_capacity(4096);
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{name} - Soma Dashboard</title>
  <style>{STYLE}</style>
</head>
<body>
  <h1>{name}</h1>
  <div class="grid">
    <div class="card">
      <h2>Health</h2>
      <div class="metric"><span class="metric-label">Status:</span> <span class="status {status}">{status}</span></div>
      <div class="metric"><span class="metric-label">Uptime:</span> <span class="metric-value">{uptime}</span></div>
      <div class="metric"><span class="metric-label">Sessions:</span> <span class="metric-value">{sessions}</span></div>
      <div class="metric"><span class="metric-label">Endpoints:</span> <span class="metric-value">{connected}/{total}</span></div>
    </div>
"#,
        uptime = format_uptime(health.uptime),
        sessions = health.active_sessions,
        connected = health.endpoints.connected,
        total = health.endpoints.total,
    );

    card(
        &mut html,
        "Tools",
        capabilities
            .tools
            .iter()
            .map(|t| item(&t.name, t.description.as_deref())),
    );
    card(
        &mut html,
        "Resources",
        capabilities
            .resources
            .iter()
            .map(|r| item(&r.name, Some(r.uri.as_str()))),
    );
    card(
        &mut html,
        "Prompts",
        capabilities
            .prompts
            .iter()
            .map(|p| item(&p.name, p.description.as_deref())),
    );
    if !endpoints.is_empty() {
        card(
            &mut html,
            "Endpoints",
            endpoints.iter().map(|e| {
                format!(
                    r#"<li><strong>{}</strong> <span class="status {status}">{status}</span> <span class="desc">{}</span></li>"#,
                    escape_html(&e.name),
                    escape_html(&e.url),
                    status = e.status.as_str(),
                )
            }),
        );
    }

    html.push_str("  </div>\n</body>\n</html>\n");
    html
}

fn card(html: &mut String, title: &str, items: impl ExactSizeIterator<Item = String>) {
    let _ = write!(
        html,
        "    <div class=\"card\">\n      <h2>{title} ({})</h2>\n      <ul>",
        items.len()
    );
    for li in items {
        html.push_str(&li);
    }
    html.push_str("</ul>\n    </div>\n");
}

fn item(name: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!(
            r#"<li><strong>{}</strong> <span class="desc">{}</span></li>"#,
            escape_html(name),
            escape_html(detail)
        ),
        None => format!("<li><strong>{}</strong></li>", escape_html(name)),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Largest two units only: `2d 3h`, `4h 5m`, `6m 7s`, `8s`.
pub fn format_uptime(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    if days > 0 {
        format!("{days}d {}h", hours % 24)
    } else if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}
