use meshkv_common::resp::{Reply, RespReader, RespWriter};
use meshkv_common::MeshKvError;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_read_command() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n").await.unwrap();
    drop(tx);

    let mut reader = RespReader::new(rx);
    let command = reader.read_command().await.unwrap().unwrap();
    assert_eq!(command, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);

    // Clean end-of-stream after the command.
    assert!(reader.read_command().await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_command_with_binary_payload() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"*2\r\n$4\r\nCGET\r\n$8\r\n").await.unwrap();
    tx.write_all(&[0x00, 0x01, 0xff, 0x0d, 0x0a, 0x02, 0x03, 0x04]).await.unwrap();
    tx.write_all(b"\r\n").await.unwrap();
    drop(tx);

    let mut reader = RespReader::new(rx);
    let command = reader.read_command().await.unwrap().unwrap();
    assert_eq!(command[1], vec![0x00, 0x01, 0xff, 0x0d, 0x0a, 0x02, 0x03, 0x04]);
}

#[tokio::test]
async fn test_read_command_rejects_garbage() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"GET key\r\n").await.unwrap();
    drop(tx);

    let mut reader = RespReader::new(rx);
    let err = reader.read_command().await.unwrap_err();
    assert!(matches!(err, MeshKvError::Protocol(_)));
}

#[tokio::test]
async fn test_truncated_command_is_closed() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    tx.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nke").await.unwrap();
    drop(tx);

    let mut reader = RespReader::new(rx);
    let err = reader.read_command().await.unwrap_err();
    assert!(matches!(err, MeshKvError::Closed));
}

#[tokio::test]
async fn test_reply_roundtrip() {
    let (tx, rx) = tokio::io::duplex(1024);
    let mut writer = RespWriter::new(tx);
    writer.write_simple("OK").await.unwrap();
    writer.write_error("ERR unknown command [nope]").await.unwrap();
    writer.write_bulk(b"value").await.unwrap();
    writer.write_null().await.unwrap();
    writer.write_array_header(2).await.unwrap();
    writer.write_bulk(b"a").await.unwrap();
    writer.write_bulk(b"b").await.unwrap();
    writer.flush().await.unwrap();
    drop(writer);

    let mut reader = RespReader::new(rx);
    assert_eq!(reader.read_reply().await.unwrap(), Reply::Simple("OK".to_string()));
    assert_eq!(
        reader.read_reply().await.unwrap(),
        Reply::Error("ERR unknown command [nope]".to_string())
    );
    assert_eq!(reader.read_reply().await.unwrap(), Reply::Bulk(b"value".to_vec()));
    assert_eq!(reader.read_reply().await.unwrap(), Reply::Null);
    assert_eq!(
        reader.read_reply().await.unwrap(),
        Reply::Array(vec![Reply::Bulk(b"a".to_vec()), Reply::Bulk(b"b".to_vec())])
    );
}

#[tokio::test]
async fn test_empty_bulk_reply() {
    let (tx, rx) = tokio::io::duplex(64);
    let mut writer = RespWriter::new(tx);
    writer.write_bulk(b"").await.unwrap();
    writer.flush().await.unwrap();
    drop(writer);

    let mut reader = RespReader::new(rx);
    assert_eq!(reader.read_reply().await.unwrap(), Reply::Bulk(Vec::new()));
}

#[tokio::test]
async fn test_write_command_matches_reader() {
    let (tx, rx) = tokio::io::duplex(1024);
    let mut writer = RespWriter::new(tx);
    writer.write_command(&[b"SET", b"key", b"value"]).await.unwrap();
    writer.flush().await.unwrap();
    drop(writer);

    let mut reader = RespReader::new(rx);
    let command = reader.read_command().await.unwrap().unwrap();
    assert_eq!(command, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);
}

#[tokio::test]
async fn test_nothing_sent_before_flush() {
    let (tx, mut rx) = tokio::io::duplex(1024);
    let mut writer = RespWriter::new(tx);
    writer.write_simple("OK").await.unwrap();

    // The reply is still sitting in the writer's buffer.
    let mut probe = [0u8; 1];
    let pending = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        tokio::io::AsyncReadExt::read(&mut rx, &mut probe),
    )
    .await;
    assert!(pending.is_err());

    writer.flush().await.unwrap();
    let read = tokio::io::AsyncReadExt::read(&mut rx, &mut probe).await.unwrap();
    assert_eq!(read, 1);
    assert_eq!(probe[0], b'+');
}
