use meshkv_common::MeshKvError;

#[test]
fn test_parse_error_display() {
    let err = MeshKvError::Parse("unsupported scheme [http]".to_string());
    assert_eq!(err.to_string(), "Parse error: unsupported scheme [http]");
}

#[test]
fn test_closed_display() {
    assert_eq!(MeshKvError::Closed.to_string(), "Connection closed");
}

#[test]
fn test_protocol_error_display() {
    let err = MeshKvError::Protocol("expected bulk string".to_string());
    assert_eq!(err.to_string(), "Protocol error: expected bulk string");
}

#[test]
fn test_short_frame_display() {
    let err = MeshKvError::ShortFrame { needed: 20, got: 3 };
    assert_eq!(err.to_string(), "Container frame too short: need 20 bytes, got 3");
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err: MeshKvError = io.into();
    assert!(matches!(err, MeshKvError::Io(_)));
    assert_eq!(err.to_string(), "I/O error: refused");
}

#[test]
fn test_reconcile_error_display() {
    let err = MeshKvError::Reconcile("unexpected message".to_string());
    assert_eq!(err.to_string(), "Reconciliation failed: unexpected message");
}
