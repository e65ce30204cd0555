use meshkv_common::{Container, MeshKvError};

#[test]
fn test_encode_layout() {
    let container = Container {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
        revision: 7,
        deleted_at: None,
    };

    let bytes = container.encode();
    assert_eq!(bytes.len(), 22);
    assert_eq!(&bytes[..8], &7u64.to_be_bytes());
    assert_eq!(&bytes[8..16], &0u64.to_be_bytes());
    assert_eq!(&bytes[16..18], &1u16.to_be_bytes());
    assert_eq!(&bytes[18..20], &[0, 0]);
    assert_eq!(&bytes[20..21], b"k");
    assert_eq!(&bytes[21..], b"v");
}

#[test]
fn test_roundtrip() {
    let container = Container {
        key: b"some key".to_vec(),
        value: b"some value".to_vec(),
        revision: 42,
        deleted_at: None,
    };

    let decoded = Container::decode(&container.encode()).unwrap();
    assert_eq!(decoded, container);
}

#[test]
fn test_roundtrip_tombstone() {
    let mut container = Container::new(b"key".to_vec(), b"value".to_vec());
    container.delete(1_700_000_000);
    container.revision = 1;

    let decoded = Container::decode(&container.encode()).unwrap();
    assert_eq!(decoded.deleted_at, Some(1_700_000_000));
    assert_eq!(decoded.revision, 1);
    assert!(decoded.value.is_empty());
    assert!(decoded.is_deleted());
}

#[test]
fn test_roundtrip_empty_value() {
    let container = Container::new(b"key".to_vec(), Vec::new());
    let decoded = Container::decode(&container.encode()).unwrap();
    assert_eq!(decoded, container);
}

#[test]
fn test_decode_short_frame() {
    let err = Container::decode(&[0u8; 19]).unwrap_err();
    match err {
        MeshKvError::ShortFrame { needed, got } => {
            assert_eq!(needed, 20);
            assert_eq!(got, 19);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_decode_truncated_key() {
    let container = Container::new(b"a longer key".to_vec(), b"value".to_vec());
    let mut bytes = container.encode();
    bytes.truncate(25);

    let err = Container::decode(&bytes).unwrap_err();
    assert!(matches!(err, MeshKvError::ShortFrame { needed: 32, got: 25 }));
}

#[test]
fn test_delete_and_undelete() {
    let mut container = Container::new(b"key".to_vec(), b"value".to_vec());
    assert!(!container.is_deleted());

    container.delete(100);
    assert!(container.is_deleted());
    assert!(container.value.is_empty());

    container.undelete();
    assert!(!container.is_deleted());
}
