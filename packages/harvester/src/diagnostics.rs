//! Observable harvest events.
//!
//! Every request, retry and ceiling adjustment is logged through `tracing`
//! and, when a hook is installed, handed to it as a [`HarvestEvent`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Something the client did or decided while talking to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestEvent {
    /// A request is about to be sent.
    Request {
        endpoint: String,
        page: u32,
        page_size: usize,
        attempt: u32,
    },
    /// A transient failure; the request is retried after `delay`.
    Retry {
        endpoint: String,
        page: u32,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// The server rejected `rejected` as too large; the ceiling went down.
    CeilingLowered {
        endpoint: String,
        rejected: usize,
        ceiling: usize,
    },
    /// Ceiling discovery settled on a size.
    CeilingDiscovered { endpoint: String, ceiling: usize },
    /// A page was fetched and normalized.
    PageFetched {
        endpoint: String,
        page: u32,
        records: usize,
        total_pages: Option<u32>,
    },
    /// Pagination ended.
    Finished {
        endpoint: String,
        pages: u32,
        records: u64,
    },
}

/// Callback receiving every [`HarvestEvent`].
#[derive(Clone)]
pub struct DiagnosticsHook(Arc<dyn Fn(&HarvestEvent) + Send + Sync>);

impl DiagnosticsHook {
    pub fn new(hook: impl Fn(&HarvestEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }
}

impl fmt::Debug for DiagnosticsHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiagnosticsHook")
    }
}

/// Log `event` and forward it to `hook`.
pub(crate) fn emit(hook: Option<&DiagnosticsHook>, event: HarvestEvent) {
    match &event {
        HarvestEvent::Request {
            endpoint,
            page,
            page_size,
            attempt,
        } => {
            tracing::debug!(%endpoint, page, page_size, attempt, "Requesting page");
        }
        HarvestEvent::Retry {
            endpoint,
            page,
            attempt,
            delay,
            reason,
        } => {
            tracing::warn!(
                %endpoint,
                page,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Transient failure, will retry"
            );
        }
        HarvestEvent::CeilingLowered {
            endpoint,
            rejected,
            ceiling,
        } => {
            tracing::warn!(%endpoint, rejected, ceiling, "Page size rejected, lowering ceiling");
        }
        HarvestEvent::CeilingDiscovered { endpoint, ceiling } => {
            tracing::info!(%endpoint, ceiling, "Discovered page-size ceiling");
        }
        HarvestEvent::PageFetched {
            endpoint,
            page,
            records,
            total_pages,
        } => {
            tracing::info!(%endpoint, page, records, total_pages = ?total_pages, "Fetched page");
        }
        HarvestEvent::Finished {
            endpoint,
            pages,
            records,
        } => {
            tracing::info!(%endpoint, pages, records, "Harvest finished");
        }
    }

    if let Some(hook) = hook {
        (hook.0)(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_hook_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook = DiagnosticsHook::new(move |event| sink.lock().unwrap().push(event.clone()));

        let event = HarvestEvent::CeilingLowered {
            endpoint: "contratacoes/publicacao".to_string(),
            rejected: 50,
            ceiling: 25,
        };
        emit(Some(&hook), event.clone());
        emit(None, event.clone());

        assert_eq!(*seen.lock().unwrap(), vec![event]);
    }
}
