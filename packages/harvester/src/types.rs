//! Core data types for the harvester.
//!
//! These types describe what is asked of the PNCP API (endpoints, queries,
//! page requests) and what comes back (normalized pages of records).

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{format_api_date, validate_cnpj};
use crate::error::{HarvesterError, Result};

/// A single record as returned by the API, passed through verbatim.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Which of the two PNCP APIs an endpoint lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Api {
    /// Paginated consultation API (`/api/consulta/v1`).
    Consulta,
    /// Resource API with per-purchase items and files (`/api/pncp/v1`).
    Pncp,
}

/// A queryable resource collection on the external service.
///
/// Endpoints are the key of the page-size ceiling cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub api: Api,
    /// Path relative to the API base URL, without leading slash.
    pub path: String,
}

impl Endpoint {
    pub fn new(api: Api, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            api,
            path: path.trim_matches('/').to_string(),
        }
    }

    /// Procurements listed by publication date.
    #[must_use]
    pub fn publications() -> Self {
        Self::new(Api::Consulta, "contratacoes/publicacao")
    }

    /// Procurements with proposals open, listed by closing date.
    #[must_use]
    pub fn open_proposals() -> Self {
        Self::new(Api::Consulta, "contratacoes/proposta")
    }

    /// Items of one purchase, identified by agency CNPJ, year and sequence.
    pub fn purchase_items(cnpj: &str, year: u16, sequence: u32) -> Result<Self> {
        validate_cnpj(cnpj)?;
        Ok(Self::new(
            Api::Pncp,
            format!("orgaos/{cnpj}/compras/{year}/{sequence}/itens"),
        ))
    }

    /// Documents attached to one purchase.
    pub fn purchase_files(cnpj: &str, year: u16, sequence: u32) -> Result<Self> {
        validate_cnpj(cnpj)?;
        Ok(Self::new(
            Api::Pncp,
            format!("orgaos/{cnpj}/compras/{year}/{sequence}/arquivos"),
        ))
    }

    /// Full URL of this endpoint under the given base.
    #[must_use]
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// One harvest request: a date range plus optional filters on an endpoint.
///
/// Both bounds are inclusive. Construct through [`QuerySpec::new`] so the
/// range is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub endpoint: Endpoint,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Modality filter (`codigoModalidadeContratacao`).
    pub category: Option<u32>,
    /// Contracting agency filter (`cnpjOrgao`).
    pub agency_cnpj: Option<String>,
}

impl QuerySpec {
    pub fn new(endpoint: Endpoint, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let spec = Self {
            endpoint,
            start,
            end,
            category: None,
            agency_cnpj: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    #[must_use]
    pub fn with_category(mut self, category: u32) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_agency(mut self, cnpj: impl Into<String>) -> Self {
        self.agency_cnpj = Some(cnpj.into());
        self
    }

    /// Check the invariants. Fields are public, so the client re-checks.
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(HarvesterError::InvalidQuery(format!(
                "start date {} is after end date {}",
                format_api_date(self.start),
                format_api_date(self.end)
            )));
        }
        if let Some(cnpj) = &self.agency_cnpj {
            validate_cnpj(cnpj)?;
        }
        Ok(())
    }

    /// Query parameters shared by every page of this query.
    #[must_use]
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("dataInicial", format_api_date(self.start)),
            ("dataFinal", format_api_date(self.end)),
        ];
        if let Some(category) = self.category {
            params.push(("codigoModalidadeContratacao", category.to_string()));
        }
        if let Some(cnpj) = &self.agency_cnpj {
            params.push(("cnpjOrgao", cnpj.clone()));
        }
        params
    }
}

/// Compact form used in error messages, e.g. `20250108..20250108 modality 8`.
impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            format_api_date(self.start),
            format_api_date(self.end)
        )?;
        if let Some(category) = self.category {
            write!(f, " modality {category}")?;
        }
        if let Some(cnpj) = &self.agency_cnpj {
            write!(f, " agency {cnpj}")?;
        }
        Ok(())
    }
}

/// A request for one page of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub spec: QuerySpec,
    /// 1-based page index.
    pub page: u32,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(spec: QuerySpec, page: u32, page_size: usize) -> Result<Self> {
        if page == 0 {
            return Err(HarvesterError::InvalidQuery(
                "page index is 1-based".into(),
            ));
        }
        if page_size == 0 {
            return Err(HarvesterError::InvalidQuery(
                "page size must be at least 1".into(),
            ));
        }
        Ok(Self {
            spec,
            page,
            page_size,
        })
    }

    /// Full parameter list for this page, in the order they are sent.
    #[must_use]
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = self.spec.query_params();
        params.push(("pagina", self.page.to_string()));
        params.push(("tamanhoPagina", self.page_size.to_string()));
        params
    }
}

/// Outcome class of a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// 200 with at least one record.
    Ok,
    /// 204, or 200 with no records.
    Empty,
    /// 400 because the page size is above the server's ceiling.
    Rejected,
    /// Network failure, 429 or 5xx.
    ///
    /// [`HarvestClient`](crate::client::HarvestClient) retries these itself
    /// and reports exhaustion as `TransientFetchFailure`, so it never returns
    /// a page with this status. Callers driving a
    /// [`Transport`](crate::http::Transport) directly can use it to label such
    /// pages.
    TransientError,
}

/// A normalized page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub status: PageStatus,
    pub records: Vec<Record>,
    /// `totalRegistros`, when the server reported it.
    pub total_records: Option<u64>,
    /// `totalPaginas`, when the server reported it.
    pub total_pages: Option<u32>,
    /// `numeroPagina`, when the server reported it.
    pub page_number: Option<u32>,
    /// `paginasRestantes`, when the server reported it.
    pub pages_remaining: Option<u32>,
}

impl PageResponse {
    /// A page with no records and no metadata.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: PageStatus::Empty,
            records: Vec::new(),
            total_records: None,
            total_pages: None,
            page_number: None,
            pages_remaining: None,
        }
    }

    /// A size rejection, carrying nothing but its status.
    #[must_use]
    pub fn rejected() -> Self {
        Self {
            status: PageStatus::Rejected,
            ..Self::empty()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
