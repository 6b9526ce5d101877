pub mod http;
pub mod stub;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

pub use http::HttpBackend;
pub use stub::{StubBackend, StubReply};

use super::backend::ClassifierBackend;
use super::verdict::Verdict;
use crate::config::ClassifierSettings;

/// Build the backend named by `settings.endpoint`.
///
/// `stub://clear`, `stub://blocked` and `stub://silent` select in-process
/// stubs; `http(s)://` selects the HTTP backend.
pub fn backend_from_settings(
    settings: &ClassifierSettings,
    timeout: Duration,
) -> Result<Arc<dyn ClassifierBackend>> {
    if let Some(kind) = settings.endpoint.strip_prefix("stub://") {
        let stub = match kind {
            "clear" => StubBackend::always(Verdict::Clear),
            "blocked" => StubBackend::always(Verdict::Blocked),
            "silent" => StubBackend::silent(),
            other => return Err(anyhow!("unknown stub classifier '{}'", other)),
        };
        return Ok(Arc::new(stub));
    }
    Ok(Arc::new(HttpBackend::new(
        &settings.endpoint,
        &settings.model,
        timeout,
    )?))
}
