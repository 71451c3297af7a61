#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::io::{self, Read, Write};
use std::sync::Barrier;
use std::thread;

use common::{FIXED_TRACEPARENT, MockConnection, MockResponse, capturing_context, context, size_capture};
use netcap::{
    ConnectionState, HttpConnection, HttpMethod, InstrumentedConnection, NetworkCaptureConfig, RequestOutcome,
    SecureHttpConnection, UNKNOWN_STATE_KIND, UNKNOWN_STATE_MESSAGE,
};

const URL: &str = "https://api.example.com/users/42?page=2";

#[test]
fn test_unwrapped_get_reports_one_completed_record() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"hello")), &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 200);
    assert_eq!(conn.state(), ConnectionState::Finalized);
    let mut body = String::new();
    conn.input_stream().unwrap().read_to_string(&mut body).unwrap();
    assert_eq!(body, "hello");
    conn.disconnect();
    drop(conn);

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.url(), URL);
    assert_eq!(record.method(), HttpMethod::Get);
    assert_eq!(record.status_code(), Some(200));
    assert_eq!(record.bytes_sent(), Some(0));
    assert_eq!(record.bytes_received(), Some(5));
    assert!(record.end_time_ms() > record.start_time_ms());
    assert_eq!(record.trace_id(), None);
    assert_eq!(record.w3c_traceparent(), None);
    assert_eq!(record.capture_data(), None);
}

#[test]
fn test_wrapped_streams_report_after_body_is_drained() {
    let t = context(size_capture());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"derpderp")), &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 200);
    let mut stream = conn.input_stream().unwrap();
    assert!(t.sink.is_empty());

    let mut body = Vec::new();
    stream.read_to_end(&mut body).unwrap();
    assert_eq!(t.sink.len(), 1);

    conn.disconnect();
    drop(stream);
    drop(conn);
    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bytes_received(), Some(8));
}

#[test]
fn test_transparent_gzip_hides_encoding_and_counts_decompressed_bytes() {
    let payload = "hello world ".repeat(64);
    let t = context(size_capture());
    let mock = MockConnection::new(URL, MockResponse::gzipped(payload.as_bytes()));
    let conn = InstrumentedConnection::new(mock, &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 200);
    assert_eq!(conn.get_ref().request_property("Accept-Encoding").as_deref(), Some("gzip"));
    assert_eq!(conn.content_encoding(), None);
    assert_eq!(conn.header_field("Content-Encoding"), None);
    assert_eq!(conn.header_field("content-length"), None);
    assert_eq!(conn.content_length().unwrap(), None);
    let headers = conn.header_fields().unwrap();
    assert!(!headers.contains_key("Content-Encoding"));
    assert!(!headers.contains_key("Content-Length"));
    assert_eq!(headers["X-Request-Id"], vec!["abc".to_owned()]);

    let mut body = String::new();
    conn.input_stream().unwrap().read_to_string(&mut body).unwrap();
    assert_eq!(body, payload);

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bytes_received(), Some(payload.len() as u64));
}

#[test]
fn test_header_index_access_skips_hidden_headers() {
    let t = context(size_capture());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::gzipped(b"x")), &t.ctx);
    conn.connect().unwrap();

    assert_eq!(conn.header_field_key(0).as_deref(), Some("Content-Type"));
    assert_eq!(conn.header_field_key(1).as_deref(), Some("X-Request-Id"));
    assert_eq!(conn.header_field_at(1).as_deref(), Some("abc"));
    assert_eq!(conn.header_field_key(2), None);
}

#[test]
fn test_caller_encoding_preference_is_respected() {
    let t = context(size_capture());
    let mock = MockConnection::new(URL, MockResponse::gzipped(b"compressed"));
    let conn = InstrumentedConnection::new(mock, &t.ctx);
    conn.set_request_property("Accept-Encoding", "gzip");

    conn.connect().unwrap();
    assert_eq!(conn.content_encoding().as_deref(), Some("gzip"));
    assert!(conn.content_length().unwrap().is_some());

    let mut raw = Vec::new();
    conn.input_stream().unwrap().read_to_end(&mut raw).unwrap();
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
    assert_eq!(t.sink.records()[0].bytes_received(), Some(raw.len() as u64));
}

#[test]
fn test_encoding_not_injected_without_size_capture() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.connect().unwrap();
    assert_eq!(conn.get_ref().request_property("Accept-Encoding"), None);
}

#[test]
fn test_request_body_is_counted_through_one_shared_wrapper() {
    let t = context(size_capture());
    let mock = MockConnection::new("https://api.example.com/upload", MockResponse::ok(b"ok"));
    let sent = mock.sent.clone();
    let conn = InstrumentedConnection::new(mock, &t.ctx);
    conn.set_request_method(http::Method::POST).unwrap();

    let mut first = conn.output_stream().unwrap();
    let second = conn.output_stream().unwrap();
    assert!(first.ptr_eq(&second));
    first.write_all(b"t").unwrap();
    first.write_all(b"est").unwrap();
    first.flush().unwrap();
    second.close().unwrap();
    assert_eq!(conn.get_ref().calls.lock().output_stream, 1);

    assert_eq!(conn.response_code().unwrap(), 200);
    io::copy(&mut conn.input_stream().unwrap(), &mut io::sink()).unwrap();

    assert_eq!(&*sent.0.lock(), b"test");
    let record = &t.sink.records()[0];
    assert_eq!(record.method(), HttpMethod::Post);
    assert_eq!(record.bytes_sent(), Some(4));
    assert_eq!(record.bytes_received(), Some(2));
}

#[test]
fn test_transport_failure_reports_incomplete_record() {
    let t = context(NetworkCaptureConfig::default());
    let mock = MockConnection::new(URL, MockResponse::failing(io::ErrorKind::ConnectionRefused));
    let conn = InstrumentedConnection::new(mock, &t.ctx);

    let err = conn.connect().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    let err = conn.response_code().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(!record.is_completed());
    assert_eq!(record.error_kind(), Some("ConnectionRefused"));
    assert_eq!(record.error_message(), Some("connection refused by peer"));
    assert_eq!(record.status_code(), None);
}

#[test]
fn test_disconnect_without_connect_reports_unknown_state() {
    let t = context(size_capture());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    let calls = conn.get_ref().calls.clone();

    conn.disconnect();

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].outcome(),
        &RequestOutcome::Incomplete {
            error_kind: UNKNOWN_STATE_KIND.to_owned(),
            error_message: UNKNOWN_STATE_MESSAGE.to_owned(),
        }
    );
    let calls = calls.lock();
    assert_eq!(calls.response_code, 0);
    assert_eq!(calls.input_stream, 0);
    assert_eq!(calls.disconnect, 1);
}

#[test]
fn test_untouched_connection_reports_nothing() {
    let t = context(size_capture());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    drop(conn);
    assert!(t.sink.is_empty());
}

#[test]
fn test_connected_then_dropped_connection_reports_once() {
    let t = context(size_capture());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"abc")), &t.ctx);
    assert_eq!(conn.response_code().unwrap(), 200);
    drop(conn);

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code(), Some(200));
    assert_eq!(records[0].bytes_received(), Some(3));
}

#[test]
fn test_stream_error_takes_precedence_over_known_status() {
    let t = context(size_capture());
    let mut response = MockResponse::ok(b"abc");
    response.stream_error = Some(io::ErrorKind::ConnectionReset);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, response), &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 200);
    assert!(conn.input_stream().is_err());
    conn.disconnect();

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind(), Some("ConnectionReset"));
    assert_eq!(records[0].error_message(), Some("stream reset"));
}

#[test]
fn test_stream_error_wins_over_later_header_error() {
    let t = context(size_capture());
    let mut response = MockResponse::ok(b"abc");
    response.stream_error = Some(io::ErrorKind::ConnectionReset);
    response.header_error = Some(io::ErrorKind::TimedOut);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, response), &t.ctx);

    assert_eq!(conn.input_stream().err().unwrap().kind(), io::ErrorKind::ConnectionReset);
    assert_eq!(conn.response_code().unwrap_err().kind(), io::ErrorKind::TimedOut);
    assert_eq!(conn.header_fields().unwrap_err().kind(), io::ErrorKind::TimedOut);
    conn.disconnect();

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind(), Some("ConnectionReset"));
    assert_eq!(records[0].error_message(), Some("stream reset"));
}

#[test]
fn test_stream_error_wins_over_earlier_header_error() {
    let t = context(size_capture());
    let mut response = MockResponse::ok(b"abc");
    response.stream_error = Some(io::ErrorKind::ConnectionReset);
    response.header_error = Some(io::ErrorKind::TimedOut);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, response), &t.ctx);

    assert!(conn.response_code().is_err());
    assert!(conn.input_stream().is_err());
    conn.disconnect();

    let records = t.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind(), Some("ConnectionReset"));
    assert_eq!(records[0].error_message(), Some("stream reset"));
}

#[test]
fn test_concurrent_disconnect_and_reads_report_once() {
    for config in [size_capture(), NetworkCaptureConfig::default()] {
        for _ in 0..100 {
            let t = context(config.clone());
            let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"payload")), &t.ctx);
            let start = Barrier::new(3);

            thread::scope(|s| {
                s.spawn(|| {
                    start.wait();
                    conn.disconnect();
                });
                s.spawn(|| {
                    start.wait();
                    let _ = conn.response_code();
                    if let Ok(mut stream) = conn.input_stream() {
                        let mut body = Vec::new();
                        let _ = stream.read_to_end(&mut body);
                    }
                });
                s.spawn(|| {
                    start.wait();
                    let _ = conn.header_fields();
                    let _ = conn.content_length();
                });
            });
            drop(conn);

            assert_eq!(t.sink.len(), 1);
        }
    }
}

#[test]
fn test_error_stream_is_counted() {
    let t = context(size_capture());
    let mut response = MockResponse::ok(b"not found");
    response.status = 404;
    let conn = InstrumentedConnection::new(MockConnection::new(URL, response), &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 404);
    let mut body = String::new();
    conn.error_stream().unwrap().read_to_string(&mut body).unwrap();

    let record = &t.sink.records()[0];
    assert_eq!(record.status_code(), Some(404));
    assert_eq!(record.bytes_received(), Some(9));
}

#[test]
fn test_traceparent_is_generated_when_forwarding() {
    let config = NetworkCaptureConfig {
        span_forwarding: true,
        ..NetworkCaptureConfig::default()
    };
    let t = context(config);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);

    conn.response_code().unwrap();
    assert_eq!(conn.get_ref().request_property("traceparent").as_deref(), Some(FIXED_TRACEPARENT));
    assert_eq!(t.sink.records()[0].w3c_traceparent(), Some(FIXED_TRACEPARENT));
}

#[test]
fn test_existing_traceparent_is_kept() {
    let existing = "00-11111111111111111111111111111111-2222222222222222-01";
    let config = NetworkCaptureConfig {
        span_forwarding: true,
        ..NetworkCaptureConfig::default()
    };
    let t = context(config);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.set_request_property("traceparent", existing);

    conn.response_code().unwrap();
    assert_eq!(conn.get_ref().request_property("traceparent").as_deref(), Some(existing));
    assert_eq!(t.sink.records()[0].w3c_traceparent(), Some(existing));
}

#[test]
fn test_trace_id_and_path_override_are_reported() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.set_request_property("x-emb-trace-id", "trace-123");
    conn.set_request_property("x-emb-path", "/users/{id}");

    conn.response_code().unwrap();
    let record = &t.sink.records()[0];
    assert_eq!(record.trace_id(), Some("trace-123"));
    assert_eq!(record.url(), "https://api.example.com/users/{id}");
}

#[test]
fn test_invalid_path_override_is_ignored() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.set_request_property("x-emb-path", "users without slash");

    conn.response_code().unwrap();
    assert_eq!(t.sink.records()[0].url(), URL);
}

#[test]
fn test_capture_data_is_attached_when_approved() {
    let t = capturing_context(size_capture());
    let mock = MockConnection::new("https://api.example.com/search?q=rust", MockResponse::ok(b"results"));
    let conn = InstrumentedConnection::new(mock, &t.ctx);
    conn.set_request_method(http::Method::POST).unwrap();
    conn.set_request_property("Content-Type", "application/json");

    conn.output_stream().unwrap().write_all(b"{\"q\":1}").unwrap();
    assert_eq!(conn.response_code().unwrap(), 200);
    io::copy(&mut conn.input_stream().unwrap(), &mut io::sink()).unwrap();

    let record = &t.sink.records()[0];
    let capture = record.capture_data().unwrap();
    assert!(capture.is_complete());
    assert_eq!(capture.request_query.as_deref(), Some("q=rust"));
    assert_eq!(capture.request_body.as_deref(), Some(&b"{\"q\":1}"[..]));
    assert_eq!(capture.response_body.as_deref(), Some(&b"results"[..]));
    let request_headers = capture.request_headers.as_ref().unwrap();
    assert_eq!(request_headers["Content-Type"], "application/json");
    assert_eq!(request_headers["Accept-Encoding"], "gzip");
    let response_headers = capture.response_headers.as_ref().unwrap();
    assert_eq!(response_headers["Content-Type"], "text/plain");
}

#[test]
fn test_capture_reports_missing_response_headers() {
    let t = capturing_context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.connect().unwrap();
    conn.disconnect();

    let capture = t.sink.records()[0].capture_data().cloned().unwrap();
    assert_eq!(
        capture.error_message.as_deref(),
        Some(
            "There were errors in capturing the following part(s) of the network call: \
             'Response Headers', 'Request Headers', 'Query Parameters', 'Request Body', 'Response Body'"
        )
    );
    assert_eq!(capture.response_headers, None);
}

#[test]
fn test_disabled_context_only_delegates() {
    let t = context(size_capture());
    t.ctx.set_enabled(false);
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::gzipped(b"zip")), &t.ctx);

    assert_eq!(conn.response_code().unwrap(), 200);
    assert_eq!(conn.content_encoding().as_deref(), Some("gzip"));
    assert_eq!(conn.get_ref().request_property("Accept-Encoding"), None);
    io::copy(&mut conn.input_stream().unwrap(), &mut io::sink()).unwrap();
    conn.disconnect();
    drop(conn);

    assert!(t.sink.is_empty());
}

#[test]
fn test_request_configuration_is_delegated() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);

    conn.set_connect_timeout(Some(std::time::Duration::from_secs(3)));
    conn.set_use_caches(false);
    conn.add_request_property("Accept", "text/plain");
    conn.add_request_property("Accept", "application/json");

    let inner = conn.get_ref();
    assert_eq!(inner.connect_timeout(), Some(std::time::Duration::from_secs(3)));
    assert!(!inner.use_caches());
    assert_eq!(inner.request_properties()["Accept"].len(), 2);
    assert!(t.sink.is_empty());
}

#[test]
fn test_secure_accessors_delegate() {
    let t = context(NetworkCaptureConfig::default());
    let mock = MockConnection::new(URL, MockResponse::ok(b""));
    let expected = mock.peer_certs.clone();
    let conn = InstrumentedConnection::new(mock, &t.ctx);

    assert_eq!(conn.cipher_suite().as_deref(), Some("TLS13_AES_128_GCM_SHA256"));
    assert_eq!(conn.peer_certificates().unwrap(), expected);
    assert_eq!(conn.local_certificates(), None);
    assert!(conn.tls_config().is_none());
    assert!(t.sink.is_empty());
}

#[test]
fn test_unsupported_method_is_not_reported() {
    let t = context(NetworkCaptureConfig::default());
    let conn = InstrumentedConnection::new(MockConnection::new(URL, MockResponse::ok(b"")), &t.ctx);
    conn.set_request_method(http::Method::from_bytes(b"PROPFIND").unwrap())
        .unwrap();

    assert_eq!(conn.response_code().unwrap(), 200);
    assert!(t.sink.is_empty());
}
