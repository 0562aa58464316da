//! Tests for the error system.

use eventide::error::*;

#[test]
fn error_api_creation() {
    let err = EventideError::api(404, "Not found");
    assert!(matches!(&err, EventideError::Api { status: 404, .. }));
    assert_eq!(err.to_string(), "API error (status 404): Not found");
}

#[test]
fn error_categories_are_stable_for_major_variants() {
    struct Case {
        error: EventideError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
    }

    let cases = vec![
        Case {
            error: EventideError::Timeout(5000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
        },
        Case {
            error: EventideError::Stream("eof".into()),
            expected_category: ErrorCategory::Stream,
            expected_retryable: true,
        },
        Case {
            error: EventideError::api(502, "bad gateway"),
            expected_category: ErrorCategory::Server,
            expected_retryable: true,
        },
        Case {
            error: EventideError::api(422, "invalid"),
            expected_category: ErrorCategory::Api,
            expected_retryable: false,
        },
        Case {
            error: EventideError::SessionNotFound("abcd1234".into()),
            expected_category: ErrorCategory::Session,
            expected_retryable: false,
        },
        Case {
            error: EventideError::TurnInFlight("abcd1234".into()),
            expected_category: ErrorCategory::Usage,
            expected_retryable: false,
        },
        Case {
            error: EventideError::Configuration("bad".into()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
    }
}

#[test]
fn error_display_messages() {
    assert_eq!(
        EventideError::Timeout(90_000).to_string(),
        "Timeout after 90000ms"
    );
    assert_eq!(
        EventideError::SessionNotFound("abcd1234".into()).to_string(),
        "Session not found: abcd1234"
    );
    assert_eq!(
        EventideError::TurnInFlight("abcd1234".into()).to_string(),
        "A turn is already in flight for session abcd1234"
    );
}

#[test]
fn serde_and_io_errors_convert() {
    let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: EventideError = serde_err.into();
    assert!(matches!(err, EventideError::Serialization(_)));

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: EventideError = io_err.into();
    assert!(matches!(err, EventideError::Io(_)));
    assert_eq!(err.category(), ErrorCategory::Unknown);
}

#[test]
fn status_to_error_reads_detail() {
    let err = status_to_error(404, r#"{"detail":"Session not found"}"#);
    assert!(matches!(&err, EventideError::Api { status: 404, message } if message == "Session not found"));
}
