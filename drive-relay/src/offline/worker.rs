//! Service-worker script served at `/sw.js`.

use minijinja::{Environment, Value, context};

const SERVICE_WORKER_TEMPLATE: &str = include_str!("../../templates/sw.js.j2");

/// Render the service worker for `cache_name` and `assets`.
///
/// Both values are embedded as JSON literals, so asset URLs with quotes or ampersands (font
/// stylesheet query strings) survive unchanged.
pub fn render_service_worker(cache_name: &str, assets: &[String]) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("sw.js", SERVICE_WORKER_TEMPLATE)?;

    let rendered = env.get_template("sw.js")?.render(context! {
        cache_name => Value::from_safe_string(serde_json::to_string(cache_name)?),
        assets => Value::from_safe_string(serde_json::to_string(assets)?),
    })?;
    Ok(rendered)
}
