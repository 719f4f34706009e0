//! End-to-end aggregation scenarios over decoded payloads.

use chrono::NaiveDate;
use salesflow_core::{
    ingest, CategoryDay, CoreError, Day, FoldOutcome, KeyedAggregator, Month, RetentionPolicy,
    Transaction, ValidationError,
};

fn payload(id: &str, category: &str, amount: f64, date: &str) -> Vec<u8> {
    format!(
        r#"{{"transaction_id":"{id}","product_id":"product_1","product_name":"laptop",
            "product_category":"{category}","product_price":{amount},"product_quantity":1,
            "product_brand":"dell","currency":"USD","customer_id":"c-1",
            "transaction_date":"{date}","payment_method":"credit_card",
            "payment_status":"success","total_amount":{amount}}}"#
    )
    .into_bytes()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Rollups {
    category: KeyedAggregator<CategoryDay>,
    daily: KeyedAggregator<Day>,
    monthly: KeyedAggregator<Month>,
}

impl Rollups {
    fn new(replay_window: usize) -> Self {
        Self {
            category: KeyedAggregator::new().with_replay_window(replay_window),
            daily: KeyedAggregator::new().with_replay_window(replay_window),
            monthly: KeyedAggregator::new().with_replay_window(replay_window),
        }
    }

    fn apply(&mut self, tx: &Transaction) {
        self.category.apply(tx);
        self.daily.apply(tx);
        self.monthly.apply(tx);
    }
}

#[test]
fn test_three_transaction_scenario() {
    let mut rollups = Rollups::new(0);
    for p in [
        payload("a1", "Electronics", 100.0, "2024-01-05T10:00:00Z"),
        payload("a2", "Electronics", 50.0, "2024-01-05T11:00:00Z"),
        payload("a3", "Books", 20.0, "2024-01-05T12:00:00Z"),
    ] {
        rollups.apply(&ingest(&p).unwrap());
    }

    let day = date(2024, 1, 5);
    assert_eq!(
        rollups.category.total(&CategoryDay::new(day, "Electronics")),
        Some(150.0)
    );
    assert_eq!(rollups.category.total(&CategoryDay::new(day, "Books")), Some(20.0));
    assert_eq!(rollups.category.stats().keys, 2);
    assert_eq!(rollups.daily.total(&Day(day)), Some(170.0));
    assert_eq!(
        rollups.monthly.total(&Month { year: 2024, month: 1 }),
        Some(170.0)
    );
}

#[test]
fn test_replay_without_window_double_counts() {
    let mut rollups = Rollups::new(0);
    let tx = ingest(&payload("a1", "Electronics", 100.0, "2024-01-05T10:00:00Z")).unwrap();
    rollups.apply(&tx);
    rollups.apply(&tx);

    let day = date(2024, 1, 5);
    assert_eq!(
        rollups.category.total(&CategoryDay::new(day, "Electronics")),
        Some(200.0)
    );
    assert_eq!(rollups.daily.total(&Day(day)), Some(200.0));
    assert_eq!(
        rollups.monthly.total(&Month { year: 2024, month: 1 }),
        Some(200.0)
    );
}

#[test]
fn test_replay_with_window_is_idempotent() {
    let mut rollups = Rollups::new(1_000);
    let tx = ingest(&payload("a1", "Electronics", 100.0, "2024-01-05T10:00:00Z")).unwrap();
    rollups.apply(&tx);
    assert_eq!(rollups.daily.apply(&tx), FoldOutcome::Duplicate);
    rollups.category.apply(&tx);
    rollups.monthly.apply(&tx);

    let day = date(2024, 1, 5);
    assert_eq!(
        rollups.category.total(&CategoryDay::new(day, "Electronics")),
        Some(100.0)
    );
    assert_eq!(rollups.daily.total(&Day(day)), Some(100.0));
    assert_eq!(
        rollups.monthly.total(&Month { year: 2024, month: 1 }),
        Some(100.0)
    );
}

#[test]
fn test_other_categories_and_days_do_not_leak() {
    let mut rollups = Rollups::new(0);
    for p in [
        payload("a1", "Electronics", 100.0, "2024-01-05T10:00:00Z"),
        payload("b1", "Books", 999.0, "2024-01-05T10:00:00Z"),
        payload("c1", "Electronics", 555.0, "2024-01-06T10:00:00Z"),
    ] {
        rollups.apply(&ingest(&p).unwrap());
    }
    assert_eq!(
        rollups
            .category
            .total(&CategoryDay::new(date(2024, 1, 5), "Electronics")),
        Some(100.0)
    );
}

#[test]
fn test_late_event_lands_in_its_own_day() {
    let mut rollups = Rollups::new(0);
    rollups.apply(&ingest(&payload("n1", "Books", 10.0, "2024-03-10T10:00:00Z")).unwrap());
    rollups.apply(&ingest(&payload("o1", "Books", 4.0, "2024-01-02T10:00:00Z")).unwrap());

    assert_eq!(rollups.daily.total(&Day(date(2024, 3, 10))), Some(10.0));
    assert_eq!(rollups.daily.total(&Day(date(2024, 1, 2))), Some(4.0));
    assert_eq!(
        rollups.monthly.total(&Month { year: 2024, month: 1 }),
        Some(4.0)
    );
}

#[test]
fn test_missing_amount_is_rejected_before_aggregation() {
    let bad = br#"{"transaction_id":"z9","product_category":"Books","transaction_date":"2024-01-05"}"#;
    match ingest(bad) {
        Err(CoreError::Validation(ValidationError::MissingTotalAmount(id))) => {
            assert_eq!(id, "z9")
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_future_dated_event_cannot_freeze_retention() {
    let mut daily = KeyedAggregator::<Day>::new()
        .with_replay_window(100_000)
        .with_retention(RetentionPolicy::days(400));

    // Epoch microseconds where milliseconds were expected.
    let bad = br#"{"transaction_id":"z9","transaction_date":1704448800000000,"total_amount":5.0}"#;
    let err = ingest(bad).unwrap_err();
    assert_eq!(err.reason(), "future_transaction_date");

    let err = ingest(&payload("z8", "Books", 5.0, "2999-01-01T00:00:00Z")).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::FutureTransactionDate { .. })
    ));

    let tx = ingest(&payload("a1", "Electronics", 100.0, "2024-01-05T10:00:00Z")).unwrap();
    assert!(matches!(daily.apply(&tx), FoldOutcome::Updated(_)));
    assert_eq!(daily.total(&Day(date(2024, 1, 5))), Some(100.0));
    assert_eq!(daily.watermark(), Some(date(2024, 1, 5)));
    assert_eq!(daily.evict_expired(), 0);
}
