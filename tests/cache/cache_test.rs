use serde_json::json;
use sqlward::agent::Row;
use sqlward::cache::ResultCache;

fn row(key: &str, value: i64) -> Row {
    let mut row = Row::new();
    row.insert(key.to_string(), json!(value));
    row
}

#[test]
fn test_round_trip() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    let rows = cache.get(42, "SELECT id FROM ticket").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], 1);
}

#[test]
fn test_tenants_are_isolated() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    assert!(cache.get(43, "SELECT id FROM ticket").is_none());
    assert!(cache.get(42, "SELECT id FROM ticket").is_some());
}

#[test]
fn test_whitespace_and_case_normalize_to_same_key() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id  FROM   ticket", vec![row("id", 1)]);
    assert!(cache.get(42, "select id from ticket").is_some());
}

#[test]
fn test_comments_and_trailing_semicolon_normalize_to_same_key() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    assert!(cache
        .get(42, "SELECT id FROM ticket; -- recent lookup")
        .is_some());
    assert!(cache
        .get(42, "SELECT id /* all rows */ FROM ticket")
        .is_some());
}

#[test]
fn test_different_sql_misses() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    assert!(cache.get(42, "SELECT status FROM ticket").is_none());
}

#[test]
fn test_expired_entries_are_dropped() {
    let cache = ResultCache::new(0, 100);
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(cache.get(42, "SELECT id FROM ticket").is_none());
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_eviction_keeps_cache_bounded() {
    let cache = ResultCache::new(300, 3);
    for i in 0..5 {
        cache.set(42, &format!("SELECT {i} FROM ticket"), vec![row("id", i)]);
    }
    assert!(cache.stats().entries <= 3);
}

#[test]
fn test_overwriting_existing_key_does_not_evict() {
    let cache = ResultCache::new(300, 2);
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    cache.set(42, "SELECT status FROM ticket", vec![row("id", 2)]);
    // Refresh an existing entry while the cache is full.
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 3)]);
    assert_eq!(cache.stats().entries, 2);
    assert!(cache.get(42, "SELECT status FROM ticket").is_some());
    assert_eq!(cache.get(42, "SELECT id FROM ticket").unwrap()[0]["id"], 3);
}

#[test]
fn test_clear_for_customer_leaves_other_tenants() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    cache.set(43, "SELECT id FROM ticket", vec![row("id", 2)]);
    cache.clear_for_customer(42);
    assert!(cache.get(42, "SELECT id FROM ticket").is_none());
    assert!(cache.get(43, "SELECT id FROM ticket").is_some());
}

#[test]
fn test_clear_all_resets_stats() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    let _ = cache.get(42, "SELECT id FROM ticket");
    let _ = cache.get(42, "SELECT other FROM ticket");
    cache.clear_all();
    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
}

#[test]
fn test_stats_track_hit_rate() {
    let cache = ResultCache::default();
    cache.set(42, "SELECT id FROM ticket", vec![row("id", 1)]);
    let _ = cache.get(42, "SELECT id FROM ticket");
    let _ = cache.get(42, "SELECT missing FROM ticket");
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}
