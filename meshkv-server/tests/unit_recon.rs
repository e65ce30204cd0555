use meshkv_common::{key_hash, KeyHash};
use meshkv_server::recon;
use meshkv_server::state::{StateSet, StateToken};

fn token(key: &str, revision: u64) -> StateToken {
    StateToken::new(key_hash(key.as_bytes()), revision)
}

fn set_of(tokens: &[StateToken]) -> StateSet {
    let mut set = StateSet::new();
    for t in tokens {
        set.insert(*t);
    }
    set
}

/// Runs both protocol sides over an in-memory transport and returns the
/// active side's outcome.
async fn reconcile(local: StateSet, remote: StateSet) -> (Vec<KeyHash>, Vec<KeyHash>) {
    let (mut active_end, mut passive_end) = tokio::io::duplex(64 * 1024);

    let passive = tokio::spawn(async move {
        recon::accept(&mut passive_end, &remote).await.unwrap();
    });
    let outcome = recon::initiate(&mut active_end, &local, 100).await.unwrap();
    passive.await.unwrap();
    outcome
}

#[tokio::test]
async fn test_identical_sets_have_no_difference() {
    let tokens: Vec<_> = (0..10u32).map(|index| token(&format!("key-{index}"), 0)).collect();
    let (missing, extra) = reconcile(set_of(&tokens), set_of(&tokens)).await;
    assert!(missing.is_empty());
    assert!(extra.is_empty());
}

#[tokio::test]
async fn test_empty_sets_have_no_difference() {
    let (missing, extra) = reconcile(StateSet::new(), StateSet::new()).await;
    assert!(missing.is_empty());
    assert!(extra.is_empty());
}

#[tokio::test]
async fn test_remote_extra_token_is_missing_locally() {
    let shared: Vec<_> = (0..10u32).map(|index| token(&format!("key-{index}"), 0)).collect();
    let mut remote_tokens = shared.clone();
    remote_tokens.push(token("only-remote", 4));

    let (missing, extra) = reconcile(set_of(&shared), set_of(&remote_tokens)).await;
    assert_eq!(missing, vec![key_hash(b"only-remote")]);
    assert!(extra.is_empty());
}

#[tokio::test]
async fn test_local_extra_token_is_reported() {
    let shared: Vec<_> = (0..10u32).map(|index| token(&format!("key-{index}"), 0)).collect();
    let mut local_tokens = shared.clone();
    local_tokens.push(token("only-local", 2));

    let (missing, extra) = reconcile(set_of(&local_tokens), set_of(&shared)).await;
    assert!(missing.is_empty());
    assert_eq!(extra, vec![key_hash(b"only-local")]);
}

#[tokio::test]
async fn test_differing_revision_appears_on_both_sides() {
    let local = set_of(&[token("key", 1)]);
    let remote = set_of(&[token("key", 2)]);

    let (missing, extra) = reconcile(local, remote).await;
    assert_eq!(missing, vec![key_hash(b"key")]);
    assert_eq!(extra, vec![key_hash(b"key")]);
}

#[tokio::test]
async fn test_bootstrap_from_empty_local() {
    let remote_tokens: Vec<_> = (0..50u32).map(|index| token(&format!("key-{index}"), 0)).collect();
    let (missing, extra) = reconcile(StateSet::new(), set_of(&remote_tokens)).await;

    let mut expected: Vec<_> = remote_tokens.iter().map(|t| t.key_hash()).collect();
    expected.sort_unstable();
    assert_eq!(missing, expected);
    assert!(extra.is_empty());
}

#[tokio::test]
async fn test_large_sets_recurse_to_the_difference() {
    let shared: Vec<_> = (0..500u32).map(|index| token(&format!("key-{index}"), 0)).collect();

    let mut local_tokens = shared.clone();
    local_tokens.push(token("only-local", 0));
    let mut remote_tokens = shared.clone();
    remote_tokens.push(token("only-remote-a", 0));
    remote_tokens.push(token("only-remote-b", 0));

    let (missing, extra) = reconcile(set_of(&local_tokens), set_of(&remote_tokens)).await;

    let mut expected_missing = vec![key_hash(b"only-remote-a"), key_hash(b"only-remote-b")];
    expected_missing.sort_unstable();
    assert_eq!(missing, expected_missing);
    assert_eq!(extra, vec![key_hash(b"only-local")]);
}

#[tokio::test]
async fn test_updated_revision_among_many_shared_tokens() {
    let shared: Vec<_> = (0..300u32).map(|index| token(&format!("key-{index}"), 1)).collect();

    let mut local_tokens = shared.clone();
    local_tokens[7] = token("key-7", 1);
    let mut remote_tokens = shared;
    remote_tokens[7] = token("key-7", 9);

    let (missing, _) = reconcile(set_of(&local_tokens), set_of(&remote_tokens)).await;
    assert_eq!(missing, vec![key_hash(b"key-7")]);
}
