//! Paginated harvest client.
//!
//! [`HarvestClient::harvest`] walks a date-bounded listing one page at a
//! time and hands out records through a lazy iterator. Page sizes the server
//! refuses are halved until accepted, and the accepted ceiling is remembered
//! per endpoint so later pages and later harvests skip the negotiation.

use std::iter::FusedIterator;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use crate::ceiling::CeilingCache;
use crate::config::ClientConfig;
use crate::diagnostics::{emit, DiagnosticsHook, HarvestEvent};
use crate::envelope::normalize_body;
use crate::error::{HarvesterError, Result};
use crate::http::{classify, HttpTransport, Outcome, Transport};
use crate::types::{Api, Endpoint, PageRequest, PageResponse, PageStatus, QuerySpec, Record};

/// Client for the PNCP listing and resource APIs.
#[derive(Debug)]
pub struct HarvestClient<T: Transport = HttpTransport> {
    transport: T,
    config: ClientConfig,
    ceilings: CeilingCache,
    diagnostics: Option<DiagnosticsHook>,
    last_request: Mutex<Option<Instant>>,
}

impl HarvestClient<HttpTransport> {
    /// Create a client talking to the real API.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> HarvestClient<T> {
    /// Create a client on top of an arbitrary transport.
    pub fn with_transport(transport: T, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let ceilings = CeilingCache::new(config.default_ceiling);
        Ok(Self {
            transport,
            config,
            ceilings,
            diagnostics: None,
            last_request: Mutex::new(None),
        })
    }

    /// Use a shared (or pre-seeded) ceiling cache.
    #[must_use]
    pub fn with_ceiling_cache(mut self, ceilings: CeilingCache) -> Self {
        self.ceilings = ceilings;
        self
    }

    /// Forward every [`HarvestEvent`] to `hook`.
    #[must_use]
    pub fn with_diagnostics(mut self, hook: DiagnosticsHook) -> Self {
        self.diagnostics = Some(hook);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn ceilings(&self) -> &CeilingCache {
        &self.ceilings
    }

    /// Harvest every record matching `spec`, starting at page 1.
    ///
    /// `page_size` is clamped to the endpoint's cached ceiling. Nothing is
    /// requested until the returned iterator is polled.
    pub fn harvest(&self, spec: QuerySpec, page_size: usize) -> Result<Harvest<'_, T>> {
        self.resume(spec, page_size, 1)
    }

    /// Like [`harvest`](Self::harvest), but starting at `from_page`.
    ///
    /// Intended for continuing after a
    /// [`TransientFetchFailure`](HarvesterError::TransientFetchFailure).
    pub fn resume(
        &self,
        spec: QuerySpec,
        page_size: usize,
        from_page: u32,
    ) -> Result<Harvest<'_, T>> {
        spec.validate()?;
        if page_size == 0 {
            return Err(HarvesterError::InvalidQuery(
                "page size must be at least 1".into(),
            ));
        }
        if from_page == 0 {
            return Err(HarvesterError::InvalidQuery(
                "page index is 1-based".into(),
            ));
        }

        let page_size = self.ceilings.clamp(&spec.endpoint, page_size);
        Ok(Harvest {
            client: self,
            spec,
            page_size,
            next_page: from_page,
            last_page: None,
            pages_fetched: 0,
            records_yielded: 0,
            buffered: Vec::new().into_iter(),
            finished: false,
        })
    }

    /// Fetch a single page, retrying transient failures.
    ///
    /// A page-size rejection is not an error here: it comes back as a
    /// response with status [`PageStatus::Rejected`].
    pub fn fetch_page(&self, request: &PageRequest) -> Result<PageResponse> {
        let endpoint = &request.spec.endpoint;
        let ctx = RequestContext {
            endpoint,
            query: request.spec.to_string(),
            page: request.page,
            page_size: request.page_size,
        };
        let url = endpoint.url(self.base_url(endpoint.api));
        let params = request.query_params();

        let response = match self.send(&ctx, &url, &params)? {
            Outcome::Success(body) => {
                normalize_body(&body).map_err(|e| self.malformed(&ctx, e.to_string()))?
            }
            Outcome::NoContent => PageResponse::empty(),
            Outcome::SizeRejected { .. } => PageResponse::rejected(),
            Outcome::Rejected { status, message } => {
                return Err(self.rejected(&ctx, status, message))
            }
        };

        if response.status != PageStatus::Rejected {
            emit(
                self.diagnostics.as_ref(),
                HarvestEvent::PageFetched {
                    endpoint: endpoint.to_string(),
                    page: request.page,
                    records: response.records.len(),
                    total_pages: response.total_pages,
                },
            );
        }
        Ok(response)
    }

    /// Find the largest accepted page size among `candidates`.
    ///
    /// Candidates are probed in the given order (usually descending) with
    /// the configured probe query, one request each, until the server
    /// accepts one. The accepted size seeds the ceiling cache.
    pub fn discover_page_size_ceiling(
        &self,
        endpoint: &Endpoint,
        candidates: &[usize],
    ) -> Result<usize> {
        if candidates.contains(&0) {
            return Err(HarvesterError::InvalidQuery(
                "candidate page sizes must be at least 1".into(),
            ));
        }

        let probe = QuerySpec {
            endpoint: endpoint.clone(),
            start: self.config.probe_start,
            end: self.config.probe_end,
            category: self.config.probe_category,
            agency_cnpj: None,
        };

        let mut tried = Vec::new();
        for &size in candidates {
            let request = PageRequest::new(probe.clone(), 1, size)?;
            let response = self.fetch_page(&request)?;
            if response.status == PageStatus::Rejected {
                tracing::debug!(%endpoint, size, "Probe size rejected");
                tried.push(size);
                continue;
            }

            self.ceilings.seed(endpoint, size);
            emit(
                self.diagnostics.as_ref(),
                HarvestEvent::CeilingDiscovered {
                    endpoint: endpoint.to_string(),
                    ceiling: size,
                },
            );
            return Ok(size);
        }

        Err(HarvesterError::NoAcceptableSize {
            endpoint: endpoint.to_string(),
            query: probe.to_string(),
            page: None,
            ceiling: self.ceilings.get(endpoint),
            tried,
        })
    }

    /// Fetch an unpaginated collection, such as the items or files of one
    /// purchase.
    pub fn list_resources(&self, endpoint: &Endpoint) -> Result<Vec<Record>> {
        let ctx = RequestContext {
            endpoint,
            query: "no filters".to_string(),
            page: 1,
            page_size: 0,
        };
        let url = endpoint.url(self.base_url(endpoint.api));

        match self.send(&ctx, &url, &[])? {
            Outcome::Success(body) => normalize_body(&body)
                .map(|page| page.records)
                .map_err(|e| self.malformed(&ctx, e.to_string())),
            Outcome::NoContent => Ok(Vec::new()),
            Outcome::SizeRejected { message } => Err(self.rejected(&ctx, 400, message)),
            Outcome::Rejected { status, message } => Err(self.rejected(&ctx, status, message)),
        }
    }

    /// Fetch `page`, halving the page size while the server rejects it.
    ///
    /// `page_size` is updated in place and never increases.
    fn fetch_negotiated(
        &self,
        spec: &QuerySpec,
        page: u32,
        page_size: &mut usize,
    ) -> Result<PageResponse> {
        let endpoint = &spec.endpoint;
        let mut tried = Vec::new();

        loop {
            // Another harvest on the same endpoint may have lowered it meanwhile.
            *page_size = self.ceilings.clamp(endpoint, *page_size);

            let request = PageRequest::new(spec.clone(), page, *page_size)?;
            let response = self.fetch_page(&request)?;
            if response.status != PageStatus::Rejected {
                return Ok(response);
            }

            tried.push(*page_size);
            if *page_size == 1 {
                return Err(HarvesterError::NoAcceptableSize {
                    endpoint: endpoint.to_string(),
                    query: spec.to_string(),
                    page: Some(page),
                    ceiling: self.ceilings.get(endpoint),
                    tried,
                });
            }

            let rejected = *page_size;
            let ceiling = self.ceilings.lower(endpoint, rejected / 2);
            emit(
                self.diagnostics.as_ref(),
                HarvestEvent::CeilingLowered {
                    endpoint: endpoint.to_string(),
                    rejected,
                    ceiling,
                },
            );
            *page_size = ceiling;
        }
    }

    /// Send one logical request, retrying transient failures with
    /// exponential backoff.
    ///
    /// Returns the first non-transient outcome, or `TransientFetchFailure`
    /// once `max_retries` attempts have failed.
    fn send(
        &self,
        ctx: &RequestContext<'_>,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<Outcome> {
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            if attempt > 1 {
                let delay = self.config.retry_delay(attempt - 1);
                emit(
                    self.diagnostics.as_ref(),
                    HarvestEvent::Retry {
                        endpoint: ctx.endpoint.to_string(),
                        page: ctx.page,
                        attempt,
                        delay,
                        reason: last_error.clone(),
                    },
                );
                thread::sleep(delay);
            }

            self.throttle();
            emit(
                self.diagnostics.as_ref(),
                HarvestEvent::Request {
                    endpoint: ctx.endpoint.to_string(),
                    page: ctx.page,
                    page_size: ctx.page_size,
                    attempt,
                },
            );

            match self.transport.get(url, params) {
                Ok(raw) => match classify(raw) {
                    Ok(outcome) => return Ok(outcome),
                    Err(reason) => last_error = reason,
                },
                Err(e) if e.is_transient() => last_error = e.to_string(),
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarvesterError::TransientFetchFailure {
            endpoint: ctx.endpoint.to_string(),
            query: ctx.query.clone(),
            page: ctx.page,
            page_size: ctx.page_size,
            ceiling: self.ceilings.get(ctx.endpoint),
            attempts: self.config.max_retries,
            message: last_error,
        })
    }

    fn rejected(&self, ctx: &RequestContext<'_>, status: u16, message: String) -> HarvesterError {
        HarvesterError::RequestRejected {
            endpoint: ctx.endpoint.to_string(),
            query: ctx.query.clone(),
            page: ctx.page,
            page_size: ctx.page_size,
            ceiling: self.ceilings.get(ctx.endpoint),
            status,
            message,
        }
    }

    fn malformed(&self, ctx: &RequestContext<'_>, message: String) -> HarvesterError {
        HarvesterError::MalformedResponse {
            endpoint: ctx.endpoint.to_string(),
            query: ctx.query.clone(),
            page: ctx.page,
            ceiling: self.ceilings.get(ctx.endpoint),
            message,
        }
    }

    /// Wait until `min_request_interval` has passed since the last request.
    fn throttle(&self) {
        let interval = self.config.min_request_interval;
        if interval.is_zero() {
            return;
        }

        // Held while sleeping so threads sharing this client queue up.
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn base_url(&self, api: Api) -> &str {
        match api {
            Api::Consulta => &self.config.consulta_base_url,
            Api::Pncp => &self.config.pncp_base_url,
        }
    }
}

/// What a single request was for, carried into diagnostics and errors.
struct RequestContext<'a> {
    endpoint: &'a Endpoint,
    /// `QuerySpec` in display form.
    query: String,
    page: u32,
    page_size: usize,
}

/// Lazy, finite sequence of the records of one harvest.
///
/// Each call to `next` that runs out of buffered records fetches the next
/// page. Iteration ends after the last page the server reported (one page
/// when it reported none), on the first empty page, on HTTP 204, or after
/// the first error, which is yielded once.
#[derive(Debug)]
pub struct Harvest<'a, T: Transport = HttpTransport> {
    client: &'a HarvestClient<T>,
    spec: QuerySpec,
    page_size: usize,
    next_page: u32,
    last_page: Option<u32>,
    pages_fetched: u32,
    records_yielded: u64,
    buffered: std::vec::IntoIter<Record>,
    finished: bool,
}

impl<T: Transport> Harvest<'_, T> {
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Page size used for the next request.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Index of the next page to be requested.
    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// Total page count as reported by the first successful response.
    pub fn total_pages(&self) -> Option<u32> {
        self.last_page
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn records_yielded(&self) -> u64 {
        self.records_yielded
    }

    fn has_more_pages(&self) -> bool {
        if let Some(max_pages) = self.client.config.max_pages {
            if self.pages_fetched >= max_pages {
                return false;
            }
        }
        self.last_page.map_or(true, |last| self.next_page <= last)
    }

    /// Load the next page into the buffer. Returns `false` if it was empty.
    fn load_next_page(&mut self) -> Result<bool> {
        let page = self.next_page;
        let response = self
            .client
            .fetch_negotiated(&self.spec, page, &mut self.page_size)?;
        self.pages_fetched += 1;

        if self.last_page.is_none() {
            // Absent or zero counts still mean the page we just read is real.
            let reported = response.total_pages.unwrap_or(0).max(1);
            self.last_page = Some(reported.max(page));
            if response.total_pages.is_none() {
                tracing::debug!(
                    endpoint = %self.spec.endpoint,
                    page,
                    "No page count in response, treating as last page"
                );
            }
        }

        if response.is_empty() {
            return Ok(false);
        }

        self.next_page = page + 1;
        self.buffered = response.records.into_iter();
        Ok(true)
    }

    fn finish(&mut self) {
        self.finished = true;
        emit(
            self.client.diagnostics.as_ref(),
            HarvestEvent::Finished {
                endpoint: self.spec.endpoint.to_string(),
                pages: self.pages_fetched,
                records: self.records_yielded,
            },
        );
    }
}

impl<T: Transport> Iterator for Harvest<'_, T> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffered.next() {
                self.records_yielded += 1;
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            if !self.has_more_pages() {
                self.finish();
                return None;
            }

            match self.load_next_page() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finish();
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<T: Transport> FusedIterator for Harvest<'_, T> {}
