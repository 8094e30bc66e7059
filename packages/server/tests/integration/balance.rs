use std::sync::Arc;

use chrono::Duration;
use common::SmsStatus;
use server::sms::{BalanceMonitor, SmsService};

use crate::common::*;

mod status {
    use super::*;

    #[tokio::test]
    async fn healthy_account_reports_no_problem() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        gateway.set_credits(250);

        let status = BalanceMonitor::new(gateway.clone())
            .get_balance_status(&db)
            .await
            .unwrap();

        assert!(!status.has_insufficient_balance);
        assert_eq!(status.credits, Some(250));
        assert_eq!(status.balance_check_error, None);
        assert_eq!(status.failed_count, 0);
    }

    #[tokio::test]
    async fn empty_account_is_insufficient_without_stored_failures() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        gateway.set_credits(0);

        let status = BalanceMonitor::new(gateway.clone())
            .get_balance_status(&db)
            .await
            .unwrap();

        assert!(status.has_insufficient_balance);
        assert_eq!(status.credits, Some(0));
        assert_eq!(status.failed_count, 0);
    }

    #[tokio::test]
    async fn stored_failures_are_reported_even_when_the_check_fails() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        gateway.fail_balance_check(&format!("timeout while texting {PHONE}"));
        let household = create_household(&db, "Anna").await;
        insert_balance_failure(&db, &household, now() - Duration::hours(1)).await;

        let status = BalanceMonitor::new(gateway.clone())
            .get_balance_status(&db)
            .await
            .unwrap();

        assert!(status.has_insufficient_balance);
        assert_eq!(status.credits, None);
        assert_eq!(status.failed_count, 1);
        let error = status.balance_check_error.unwrap();
        assert!(!error.contains(PHONE), "phone number leaked: {error}");
    }

    #[tokio::test]
    async fn dismissed_failures_are_not_counted() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        let household = create_household(&db, "Anna").await;
        let failure = insert_balance_failure(&db, &household, now() - Duration::hours(1)).await;
        SmsService::new(&db)
            .dismiss(failure.id, Some(1), now())
            .await
            .unwrap();

        let status = BalanceMonitor::new(gateway.clone())
            .get_balance_status(&db)
            .await
            .unwrap();

        assert!(!status.has_insufficient_balance);
        assert_eq!(status.failed_count, 0);
    }
}

mod requeue {
    use super::*;

    #[tokio::test]
    async fn requeue_resets_balance_failures_once() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        let monitor = BalanceMonitor::new(gateway.clone());
        let anna = create_household(&db, "Anna").await;
        let bo = create_household(&db, "Bo").await;
        let first = insert_balance_failure(&db, &anna, now() - Duration::hours(2)).await;
        let second = insert_balance_failure(&db, &bo, now() - Duration::hours(1)).await;
        let at = now();

        let requeued = monitor.requeue_balance_failures(&db, at).await.unwrap();
        let again = monitor.requeue_balance_failures(&db, at).await.unwrap();

        assert_eq!(requeued, 2);
        assert_eq!(again, 0);
        for id in [first.id, second.id] {
            let stored = get_message(&db, id).await;
            assert_eq!(stored.status, SmsStatus::Queued);
            assert_eq!(stored.attempt_count, 0);
            assert!(!stored.balance_failure);
            assert_eq!(stored.last_error_message, None);
            assert_eq!(stored.next_attempt_at, Some(at));
        }
    }

    #[tokio::test]
    async fn ordinary_failures_stay_failed() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        let household = create_household(&db, "Anna").await;
        let ordinary = insert_message(
            &db,
            &household,
            None,
            common::SmsIntent::FoodParcelsEnded,
            SmsStatus::Failed,
            now() - Duration::hours(1),
        )
        .await;

        let requeued = BalanceMonitor::new(gateway.clone())
            .requeue_balance_failures(&db, now())
            .await
            .unwrap();

        assert_eq!(requeued, 0);
        assert_eq!(get_message(&db, ordinary.id).await.status, SmsStatus::Failed);
    }

    #[tokio::test]
    async fn requeued_messages_go_out_on_the_next_run() {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());
        let household = create_household(&db, "Anna").await;
        let failure = insert_balance_failure(&db, &household, now() - Duration::hours(1)).await;
        let at = now();

        BalanceMonitor::new(gateway.clone())
            .requeue_balance_failures(&db, at)
            .await
            .unwrap();
        let report = processor(&gateway).process_due_queue(&db, at).await.unwrap();

        assert_eq!(report.sent, 1);
        let stored = get_message(&db, failure.id).await;
        assert_eq!(stored.status, SmsStatus::Sent);
        assert_eq!(stored.attempt_count, 1);
    }
}
