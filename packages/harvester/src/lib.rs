//! PNCP Harvester - Paginated download of Brazilian public procurement records.
//!
//! This crate provides a client for the PNCP (Portal Nacional de Contratações
//! Públicas) API that walks date-bounded listings page by page, copes with the
//! server's undocumented page-size ceiling, and retries transient failures.
//!
//! # Example
//!
//! ```no_run
//! use pncp_harvester::{ClientConfig, Endpoint, HarvestClient, QuerySpec};
//! use pncp_harvester::config::parse_date;
//!
//! let client = HarvestClient::new(ClientConfig::default())?;
//! let day = parse_date("2025-01-08")?;
//! let spec = QuerySpec::new(Endpoint::publications(), day, day)?.with_category(8);
//!
//! for record in client.harvest(spec, 50)? {
//!     let record = record?;
//!     println!("{}", record["numeroControlePNCP"]);
//! }
//! # Ok::<(), pncp_harvester::HarvesterError>(())
//! ```
//!
//! # Architecture
//!
//! - [`config`]: Constants, client settings and date validation
//! - [`types`]: Endpoints, queries, page requests and responses
//! - [`error`]: Error types and Result alias
//! - [`http`]: Transport seam and response classification
//! - [`envelope`]: Normalization of array and envelope bodies
//! - [`ceiling`]: Per-endpoint page-size ceiling cache
//! - [`diagnostics`]: Events emitted on requests, retries and ceiling changes
//! - [`client`]: Harvest client, page-size negotiation and ceiling discovery
//! - [`snapshot`]: JSON snapshot files
//! - [`cli`]: Command-line interface

pub mod ceiling;
pub mod cli;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod http;
pub mod snapshot;
pub mod types;

// Re-export commonly used items
pub use ceiling::CeilingCache;
pub use client::{Harvest, HarvestClient};
pub use config::ClientConfig;
pub use diagnostics::{DiagnosticsHook, HarvestEvent};
pub use error::{HarvesterError, Result};
pub use http::{HttpTransport, RawResponse, Transport, TransportError};
pub use types::{Api, Endpoint, PageRequest, PageResponse, PageStatus, QuerySpec, Record};
