//! HTTP-level tests for the harvest client against a mock PNCP server.
//!
//! The client is blocking, so wiremock scenarios run it inside
//! `spawn_blocking` while the mock serves requests on the test runtime.
//! Connection-level failures use a bare `TcpListener` instead.

use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pncp_harvester::{
    ClientConfig, Endpoint, HarvestClient, HarvesterError, QuerySpec, Record,
};

fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig::default()
        .with_base_url(server.uri())
        .with_retry_base_delay(Duration::from_millis(1))
        .with_min_request_interval(Duration::ZERO)
}

fn day_spec() -> QuerySpec {
    let day = NaiveDate::from_ymd_opt(2025, 1, 8).expect("valid date");
    QuerySpec::new(Endpoint::publications(), day, day)
        .expect("valid spec")
        .with_category(8)
}

fn envelope(ids: &[&str], total_pages: u32, page: u32) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "numeroControlePNCP": id }))
        .collect();
    json!({
        "data": data,
        "totalRegistros": 5,
        "totalPaginas": total_pages,
        "numeroPagina": page,
        "paginasRestantes": total_pages - page,
    })
}

fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["numeroControlePNCP"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_harvest_walks_pages_in_order() {
    let server = MockServer::start().await;

    for (page, batch) in [(1, vec!["a", "b"]), (2, vec!["c", "d"]), (3, vec!["e"])] {
        Mock::given(method("GET"))
            .and(path("/contratacoes/publicacao"))
            .and(query_param("dataInicial", "20250108"))
            .and(query_param("dataFinal", "20250108"))
            .and(query_param("codigoModalidadeContratacao", "8"))
            .and(query_param("pagina", page.to_string()))
            .and(query_param("tamanhoPagina", "2"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(&batch, 3, page)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = test_config(&server);
    let records = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        client
            .harvest(day_spec(), 2)
            .expect("valid harvest")
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .expect("blocking task")
    .expect("harvest should succeed");

    assert_eq!(ids(&records), vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_harvest_negotiates_rejected_page_size() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("tamanhoPagina", "100"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400,
            "message": "Tamanho de página deve ser entre 10 e 50"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("tamanhoPagina", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(&["a", "b"], 1, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (records, ceiling) = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        let records = client
            .harvest(day_spec(), 100)
            .expect("valid harvest")
            .collect::<Result<Vec<_>, _>>();
        let ceiling = client.ceilings().recorded(&Endpoint::publications());
        (records, ceiling)
    })
    .await
    .expect("blocking task");

    assert_eq!(ids(&records.expect("harvest should succeed")), vec!["a", "b"]);
    assert_eq!(ceiling, Some(50));
}

#[tokio::test]
async fn test_harvest_no_content_yields_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let records = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        client
            .harvest(day_spec(), 50)
            .expect("valid harvest")
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .expect("blocking task")
    .expect("harvest should succeed");

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_harvest_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "numeroControlePNCP": "a" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server).with_max_retries(3);
    let records = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        client
            .harvest(day_spec(), 50)
            .expect("valid harvest")
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .expect("blocking task")
    .expect("harvest should succeed after retries");

    assert_eq!(ids(&records), vec!["a"]);
}

#[tokio::test]
async fn test_harvest_reports_exhausted_retries_with_resume_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("pagina", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(&["a", "b"], 2, 1)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("pagina", "2"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(&server).with_max_retries(2);
    let (yielded, error) = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        let mut yielded = Vec::new();
        let mut error = None;
        for record in client.harvest(day_spec(), 2).expect("valid harvest") {
            match record {
                Ok(record) => yielded.push(record),
                Err(e) => error = Some(e),
            }
        }
        (yielded, error)
    })
    .await
    .expect("blocking task");

    assert_eq!(ids(&yielded), vec!["a", "b"]);
    let error = error.expect("page 2 should fail");
    assert!(matches!(
        error,
        HarvesterError::TransientFetchFailure { attempts: 2, .. }
    ));
    assert_eq!(error.resume_page(), Some(2));
}

#[test]
fn test_harvest_retries_dropped_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    // Read the request, then close the socket without answering.
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
        }
    });

    let config = ClientConfig::default()
        .with_base_url(format!("http://{addr}"))
        .with_retry_base_delay(Duration::from_millis(1))
        .with_min_request_interval(Duration::ZERO);
    let client = HarvestClient::new(config).expect("client creation");

    let error = client
        .harvest(day_spec(), 50)
        .expect("valid harvest")
        .next()
        .expect("one item")
        .expect_err("dropped connections should fail the harvest");

    assert!(
        matches!(
            error,
            HarvesterError::TransientFetchFailure {
                attempts: 3,
                page: 1,
                ..
            }
        ),
        "unexpected error: {error:?}"
    );
    assert_eq!(error.resume_page(), Some(1));
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_harvest_surfaces_non_size_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Período informado maior que 365 dias"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let result = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        client
            .harvest(day_spec(), 50)
            .expect("valid harvest")
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .expect("blocking task");

    let err = result.expect_err("should be rejected");
    assert!(matches!(
        err,
        HarvesterError::RequestRejected { status: 422, .. }
    ));
    assert!(err.to_string().contains("365 dias"));
}

#[tokio::test]
async fn test_discover_ceiling_probes_descending() {
    let server = MockServer::start().await;

    for rejected in ["500", "200"] {
        Mock::given(method("GET"))
            .and(path("/contratacoes/publicacao"))
            .and(query_param("tamanhoPagina", rejected))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "tamanhoPagina deve ser no máximo 100"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("tamanhoPagina", "100"))
        .and(query_param("pagina", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/contratacoes/publicacao"))
        .and(query_param("tamanhoPagina", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let (ceiling, recorded) = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        let endpoint = Endpoint::publications();
        let ceiling = client.discover_page_size_ceiling(&endpoint, &[500, 200, 100, 50]);
        (ceiling, client.ceilings().recorded(&endpoint))
    })
    .await
    .expect("blocking task");

    assert_eq!(ceiling.expect("discovery should succeed"), 100);
    assert_eq!(recorded, Some(100));
}

#[tokio::test]
async fn test_list_resources_uses_purchase_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgaos/05995955000140/compras/2024/17/itens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "numeroItem": 1, "descricao": "Papel A4" },
            { "numeroItem": 2, "descricao": "Caneta" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let items = tokio::task::spawn_blocking(move || {
        let client = HarvestClient::new(config).expect("client creation");
        let endpoint =
            Endpoint::purchase_items("05995955000140", 2024, 17).expect("valid endpoint");
        client.list_resources(&endpoint)
    })
    .await
    .expect("blocking task")
    .expect("listing should succeed");

    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["descricao"], "Caneta");
}
