//! Integration tests for the OAI-PMH client against a mock repository.

mod support;

use std::time::Duration;

use oai_harvester::protocol::{OaiClient, OaiError, PageResult, SetDescriptor};
use support::oai::{
    OAI_PATH, Token, base_url, first_page_of, identify, list_sets, metadata_formats, oai_error,
    page_for_token, records_page, xml,
};
use support::socket_guard::start_mock_server_or_skip;
use url::Url;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OaiClient {
    OaiClient::new(
        &Url::parse(&base_url(server)).unwrap(),
        "oai_dc",
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap()
}

// ==================== Identify / ListMetadataFormats ====================

#[tokio::test]
async fn test_identify_reads_repository_fields() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "Identify"))
        .respond_with(xml(identify("Example Repository")))
        .expect(1)
        .mount(&server)
        .await;

    let info = client(&server).identify().await.unwrap();
    assert_eq!(info.repository_name, "Example Repository");
    assert_eq!(info.protocol_version, "2.0");
    assert_eq!(info.admin_emails, vec!["admin@example.org"]);
    assert_eq!(info.granularity, "YYYY-MM-DD");
}

#[tokio::test]
async fn test_identify_protocol_error_is_returned() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "Identify"))
        .respond_with(xml(oai_error("badVerb", "Illegal verb")))
        .mount(&server)
        .await;

    let err = client(&server).identify().await.unwrap_err();
    match err {
        OaiError::Protocol { verb, code, .. } => {
            assert_eq!(verb, "Identify");
            assert_eq!(code, "badVerb");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_metadata_formats() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListMetadataFormats"))
        .respond_with(xml(metadata_formats(&["oai_dc", "marc21"])))
        .mount(&server)
        .await;

    let formats = client(&server).list_metadata_formats().await.unwrap();
    let prefixes: Vec<&str> = formats.iter().map(|f| f.metadata_prefix.as_str()).collect();
    assert_eq!(prefixes, vec!["oai_dc", "marc21"]);
    assert_eq!(formats[1].schema, "http://example.org/marc21.xsd");
}

// ==================== ListSets ====================

#[tokio::test]
async fn test_list_sets_follows_tokens_and_merges_duplicates() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .and(query_param_is_missing("resumptionToken"))
        .respond_with(xml(list_sets(
            &[("S1", "First"), ("S2", "Second")],
            Some(Token::next("sets-2")),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .and(query_param("resumptionToken", "sets-2"))
        .respond_with(xml(list_sets(
            &[("S2", "Second%20renamed"), ("S3", "Third")],
            Some(Token::last()),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let sets = client(&server).list_sets().await.unwrap();
    assert_eq!(
        sets,
        vec![
            SetDescriptor::new("S1", "First"),
            SetDescriptor::new("S2", "Second renamed"),
            SetDescriptor::new("S3", "Third"),
        ]
    );
}

#[tokio::test]
async fn test_list_sets_no_set_hierarchy_is_empty() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .respond_with(xml(oai_error("noSetHierarchy", "This repository has no sets")))
        .mount(&server)
        .await;

    let sets = client(&server).list_sets().await.unwrap();
    assert!(sets.is_empty());
}

#[tokio::test]
async fn test_list_sets_http_error_is_transport_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("Retry-After", "7")
                .set_body_string("busy"),
        )
        .mount(&server)
        .await;

    let err = client(&server).list_sets().await.unwrap_err();
    match err {
        OaiError::HttpStatus {
            status,
            retry_after,
            ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(retry_after.as_deref(), Some("7"));
        }
        other => panic!("expected HTTP status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_sets_repeated_token_is_malformed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .and(query_param_is_missing("resumptionToken"))
        .respond_with(xml(list_sets(&[("S1", "First")], Some(Token::next("again")))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("verb", "ListSets"))
        .and(query_param("resumptionToken", "again"))
        .respond_with(xml(list_sets(&[("S2", "Second")], Some(Token::next("again")))))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).list_sets().await.unwrap_err();
    match err {
        OaiError::Malformed { reason, .. } => assert!(reason.contains("again"), "{reason}"),
        other => panic!("expected malformed error, got {other:?}"),
    }
}

// ==================== ListRecords ====================

#[tokio::test]
async fn test_list_records_first_page_carries_prefix_and_set() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    first_page_of("S1")
        .respond_with(xml(records_page(
            &["r1", "r2"],
            Some(Token::next("S1-2").at(0, 4)),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let set = SetDescriptor::new("S1", "First");
    let result = client(&server).list_records(Some(&set), None).await.unwrap();
    let PageResult::Records(page) = result else {
        panic!("expected records, got {result:?}");
    };
    assert_eq!(page.next_token.as_deref(), Some("S1-2"));
    assert_eq!(page.cursor, Some(0));
    assert_eq!(page.complete_list_size, Some(4));
    assert_eq!(page.record_count, 2);
    assert!(!page.degraded);
    assert!(String::from_utf8(page.raw).unwrap().contains("<identifier>r2</identifier>"));
}

#[tokio::test]
async fn test_list_records_token_request_is_exclusive() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    page_for_token("S1-2")
        .and(query_param_is_missing("metadataPrefix"))
        .and(query_param_is_missing("set"))
        .respond_with(xml(records_page(&["r3"], Some(Token::last()))))
        .expect(1)
        .mount(&server)
        .await;

    let set = SetDescriptor::new("S1", "First");
    let result = client(&server)
        .list_records(Some(&set), Some("S1-2"))
        .await
        .unwrap();
    let PageResult::Records(page) = result else {
        panic!("expected records, got {result:?}");
    };
    assert!(page.next_token.is_none());
}

#[tokio::test]
async fn test_list_records_default_set_omits_set_param() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .and(query_param_is_missing("set"))
        .respond_with(xml(records_page(&["r1"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let set = SetDescriptor::default_set();
    let result = client(&server).list_records(Some(&set), None).await.unwrap();
    assert!(matches!(result, PageResult::Records(_)));
}

#[tokio::test]
async fn test_list_records_no_records_match_is_empty_set() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    first_page_of("S1")
        .respond_with(xml(oai_error("noRecordsMatch", "No records")))
        .mount(&server)
        .await;

    let set = SetDescriptor::new("S1", "First");
    let result = client(&server).list_records(Some(&set), None).await.unwrap();
    assert_eq!(result, PageResult::EmptySet);
}

#[tokio::test]
async fn test_list_records_protocol_error_with_http_400_is_an_answer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    page_for_token("expired")
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(oai_error("badResumptionToken", "Token expired")),
        )
        .mount(&server)
        .await;

    let result = client(&server)
        .list_records(None, Some("expired"))
        .await
        .unwrap();
    assert_eq!(
        result,
        PageResult::ProtocolError {
            code: "badResumptionToken".to_string(),
            message: "Token expired".to_string(),
        }
    );
}

#[tokio::test]
async fn test_list_records_malformed_page_with_token_is_degraded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = r#"<?xml version="1.0"?>
<OAI-PMH><ListRecords><record><metadata>Smith & Jones</metadata></record>
<resumptionToken cursor="0">next&amp;page</resumptionToken></ListRecords></OAI-PMH>"#;
    first_page_of("S1")
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let set = SetDescriptor::new("S1", "First");
    let result = client(&server).list_records(Some(&set), None).await.unwrap();
    let PageResult::Records(page) = result else {
        panic!("expected records, got {result:?}");
    };
    assert!(page.degraded);
    assert_eq!(page.next_token.as_deref(), Some("next&page"));
    assert_eq!(page.raw, body.as_bytes());
}

#[tokio::test]
async fn test_list_records_truncated_page_without_token_is_malformed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    first_page_of("S1")
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<OAI-PMH><ListRecords><record>"),
        )
        .mount(&server)
        .await;

    let set = SetDescriptor::new("S1", "First");
    let err = client(&server)
        .list_records(Some(&set), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::Malformed { .. }), "{err:?}");
}
