//! Atomic replacement of the shared cookie artifact: a reader polling the
//! file during a burst of rewrites must only ever observe complete
//! bundles — the previous one or the next one, never a torn write.

use std::collections::HashSet;
use std::time::Duration;

use portsight_backend::llm::CookieBundle;

#[tokio::test]
async fn reader_never_observes_partial_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webai_cookies.json");

    let old = CookieBundle::new("a".repeat(120), Some("ts-old".into()));
    let new = old.refreshed("b".repeat(120), Some("ts-new".into()));
    old.save_atomic(&path).unwrap();

    let writer_path = path.clone();
    let writer_new = new.clone();
    let writer_old = old.clone();
    let writer = tokio::spawn(async move {
        // Alternate payloads as fast as the filesystem allows
        for i in 0..200 {
            let bundle = if i % 2 == 0 { &writer_new } else { &writer_old };
            bundle.save_atomic(&writer_path).unwrap();
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
    });

    let mut seen = HashSet::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        // Readers read in full; the writer's rename makes that atomic
        let bundle = CookieBundle::load(&path).expect("artifact must always parse");
        seen.insert(bundle.secure_1psid.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    writer.await.unwrap();

    // Only the two known payloads, in any interleaving
    assert!(!seen.is_empty());
    for psid in &seen {
        assert!(
            *psid == old.secure_1psid || *psid == new.secure_1psid,
            "unexpected payload observed"
        );
    }
    assert!(seen.len() <= 2);
}

#[test]
fn refresh_chain_preserves_counter_monotonicity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webai_cookies.json");

    let mut bundle = CookieBundle::new("initial".into(), None);
    bundle.save_atomic(&path).unwrap();

    for round in 1..=5 {
        let current = CookieBundle::load(&path).unwrap();
        bundle = current.refreshed(format!("psid-{round}"), Some(format!("ts-{round}")));
        bundle.save_atomic(&path).unwrap();

        let reloaded = CookieBundle::load(&path).unwrap();
        assert_eq!(reloaded.refresh_count, round);
        assert_eq!(reloaded.secure_1psid, format!("psid-{round}"));
    }
}

#[test]
fn reader_tolerates_missing_metadata_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webai_cookies.json");

    // A hand-provisioned artifact with only the session cookie
    std::fs::write(&path, r#"{"__Secure-1PSID": "manual-session"}"#).unwrap();

    let bundle = CookieBundle::load(&path).unwrap();
    assert_eq!(bundle.secure_1psid, "manual-session");
    assert!(bundle.secure_1psidts.is_none());
    assert_eq!(bundle.refresh_count, 0);
}
