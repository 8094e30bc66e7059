use chrono::Duration;
use common::{SmsIntent, SmsStatus};
use serde_json::json;

use crate::common::*;

mod admin_auth {
    use super::*;

    #[tokio::test]
    async fn balance_requires_a_token() {
        let app = TestApp::spawn().await;

        let res = app.get_without_token(routes::BALANCE).await;

        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn balance_rejects_a_forged_token() {
        let app = TestApp::spawn().await;
        let forged = server::utils::jwt::sign("some-other-secret", 1, "admin", "admin", &["sms:manage"])
            .unwrap();

        let res = app.get_with_token(routes::BALANCE, &forged).await;

        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_INVALID");
    }

    #[tokio::test]
    async fn balance_requires_the_sms_permission() {
        let app = TestApp::spawn().await;
        let token = app.token(&["households:read"]);

        let res = app.get_with_token(routes::BALANCE, &token).await;

        assert_eq!(res.status, 403);
        assert_eq!(res.body["code"], "PERMISSION_DENIED");
    }
}

mod balance {
    use super::*;

    #[tokio::test]
    async fn balance_status_reports_credit_and_stored_failures() {
        let app = TestApp::spawn().await;
        app.gateway.set_credits(42);
        let household = create_household(&app.db, "Anna").await;
        insert_balance_failure(&app.db, &household, now() - Duration::hours(1)).await;

        let res = app
            .get_with_token(routes::BALANCE, &app.admin_token())
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["credits"], 42);
        assert_eq!(res.body["failed_count"], 1);
        assert_eq!(res.body["has_insufficient_balance"], true);
        assert!(res.body["balance_check_error"].is_null());
    }

    #[tokio::test]
    async fn requeue_reports_how_many_messages_were_reset() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        insert_balance_failure(&app.db, &household, now() - Duration::hours(1)).await;
        let token = app.admin_token();

        let first = app
            .post_with_token(routes::BALANCE_REQUEUE, &json!({}), &token)
            .await;
        let second = app
            .post_with_token(routes::BALANCE_REQUEUE, &json!({}), &token)
            .await;

        assert_eq!(first.status, 200, "{}", first.text);
        assert_eq!(first.body["requeued"], 1);
        assert_eq!(second.body["requeued"], 0);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn failure_list_hides_contact_details() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let failed = insert_message(
            &app.db,
            &household,
            None,
            SmsIntent::FoodParcelsEnded,
            SmsStatus::Failed,
            now() - Duration::hours(1),
        )
        .await;

        let res = app
            .get_with_token(routes::FAILURES, &app.admin_token())
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["pagination"]["total"], 1);
        let item = &res.body["data"][0];
        assert_eq!(item["id"], failed.id.to_string());
        assert_eq!(item["intent"], "food_parcels_ended");
        assert!(item.get("to_phone").is_none());
        assert!(item.get("text").is_none());
        assert!(!res.text.contains(PHONE), "phone number leaked: {}", res.text);
    }

    #[tokio::test]
    async fn stats_count_by_intent() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        insert_balance_failure(&app.db, &household, now() - Duration::hours(2)).await;
        insert_message(
            &app.db,
            &household,
            None,
            SmsIntent::ConsentEnrolment,
            SmsStatus::Failed,
            now() - Duration::hours(1),
        )
        .await;

        let res = app
            .get_with_token(routes::FAILURE_STATS, &app.admin_token())
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["total_failed"], 2);
        assert_eq!(res.body["balance_failures"], 1);
        assert_eq!(res.body["by_intent"]["food_parcels_ended"], 1);
        assert_eq!(res.body["by_intent"]["consent_enrolment"], 1);
    }

    #[tokio::test]
    async fn dismissed_message_leaves_the_failure_list() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let failed = insert_message(
            &app.db,
            &household,
            None,
            SmsIntent::FoodParcelsEnded,
            SmsStatus::Failed,
            now() - Duration::hours(1),
        )
        .await;
        let token = app.admin_token();

        let dismissed = app
            .post_with_token(&routes::dismiss(failed.id), &json!({}), &token)
            .await;
        let again = app
            .post_with_token(&routes::dismiss(failed.id), &json!({}), &token)
            .await;
        let list = app.get_with_token(routes::FAILURES, &token).await;

        assert_eq!(dismissed.status, 200, "{}", dismissed.text);
        assert_eq!(dismissed.body["dismissed"], true);
        assert_eq!(again.status, 409);
        assert_eq!(again.body["code"], "INVALID_ACTION");
        assert_eq!(list.body["pagination"]["total"], 0);
        assert_eq!(get_message(&app.db, failed.id).await.dismissed_by_user_id, Some(1));
    }

    #[tokio::test]
    async fn dismissing_an_unknown_message_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_token(
                &routes::dismiss(uuid::Uuid::new_v4()),
                &json!({}),
                &app.admin_token(),
            )
            .await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }
}

mod manual_retry {
    use super::*;

    #[tokio::test]
    async fn retry_returns_the_replacement_id() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let location = create_location(&app.db, "Centrum").await;
        let parcel = create_parcel(&app.db, &household, &location, now() + Duration::hours(3)).await;
        let failed = insert_message(
            &app.db,
            &household,
            Some(&parcel),
            SmsIntent::PickupReminder,
            SmsStatus::Failed,
            now() - Duration::minutes(30),
        )
        .await;

        let res = app
            .post_with_token(&routes::retry(failed.id), &json!({}), &app.admin_token())
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["original_id"], failed.id.to_string());
        let replacement_id: uuid::Uuid =
            serde_json::from_value(res.body["replacement_id"].clone()).unwrap();
        assert_eq!(
            get_message(&app.db, replacement_id).await.status,
            SmsStatus::Queued
        );
    }

    #[tokio::test]
    async fn cooldown_answers_429_with_retry_after() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let location = create_location(&app.db, "Centrum").await;
        let parcel = create_parcel(&app.db, &household, &location, now() + Duration::hours(3)).await;
        let failed = insert_message(
            &app.db,
            &household,
            Some(&parcel),
            SmsIntent::PickupReminder,
            SmsStatus::Failed,
            now() - Duration::minutes(30),
        )
        .await;
        insert_message(
            &app.db,
            &household,
            Some(&parcel),
            SmsIntent::PickupUpdated,
            SmsStatus::Sent,
            now() - Duration::minutes(2),
        )
        .await;

        let res = app
            .post_with_token(&routes::retry(failed.id), &json!({}), &app.admin_token())
            .await;

        assert_eq!(res.status, 429, "{}", res.text);
        assert_eq!(res.body["code"], "COOLDOWN_ACTIVE");
        let retry_after: u64 = res
            .headers
            .get("retry-after")
            .expect("Retry-After header missing")
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=180).contains(&retry_after), "retry_after = {retry_after}");
    }

    #[tokio::test]
    async fn too_late_answers_422() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let location = create_location(&app.db, "Centrum").await;
        let parcel = create_parcel(&app.db, &household, &location, now() + Duration::minutes(30)).await;
        let failed = insert_message(
            &app.db,
            &household,
            Some(&parcel),
            SmsIntent::PickupReminder,
            SmsStatus::Failed,
            now() - Duration::minutes(30),
        )
        .await;

        let res = app
            .post_with_token(&routes::retry(failed.id), &json!({}), &app.admin_token())
            .await;

        assert_eq!(res.status, 422);
        assert_eq!(res.body["code"], "TOO_LATE");
    }

    #[tokio::test]
    async fn unknown_message_answers_404() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_token(
                &routes::retry(uuid::Uuid::new_v4()),
                &json!({}),
                &app.admin_token(),
            )
            .await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["code"], "NOT_FOUND");
    }
}

mod enrolment {
    use super::*;

    #[tokio::test]
    async fn enrolment_is_queued_once_per_day() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let token = app.admin_token();

        let first = app
            .post_with_token(&routes::enrolment(household.id), &json!({}), &token)
            .await;
        let second = app
            .post_with_token(&routes::enrolment(household.id), &json!({}), &token)
            .await;

        assert_eq!(first.status, 200, "{}", first.text);
        assert_eq!(first.body["queued"], true);
        assert!(first.body["message_id"].is_string());
        assert_eq!(second.body["queued"], false);
        assert!(second.body["message_id"].is_null());
    }

    #[tokio::test]
    async fn unknown_household_answers_404() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_token(
                &routes::enrolment(uuid::Uuid::new_v4()),
                &json!({}),
                &app.admin_token(),
            )
            .await;

        assert_eq!(res.status, 404);
    }
}

mod jobs {
    use super::*;

    #[tokio::test]
    async fn job_endpoints_require_the_cron_secret() {
        let app = TestApp::spawn().await;

        let missing = app
            .post_with_secret(routes::JOB_ENQUEUE, &json!({}), "X-Cron-Secret", None)
            .await;
        let wrong = app
            .post_with_secret(
                routes::JOB_PROCESS,
                &json!({}),
                "X-Cron-Secret",
                Some("not-the-secret"),
            )
            .await;
        let admin_token = app
            .post_with_secret(
                routes::JOB_PROCESS,
                &json!({}),
                "X-Cron-Secret",
                Some(&app.admin_token()),
            )
            .await;

        assert_eq!(missing.status, 401);
        assert_eq!(missing.body["code"], "TOKEN_MISSING");
        assert_eq!(wrong.status, 401);
        assert_eq!(wrong.body["code"], "TOKEN_INVALID");
        assert_eq!(admin_token.status, 401);
    }

    #[tokio::test]
    async fn enqueue_then_process_delivers_a_reminder() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let location = create_location(&app.db, "Centrum").await;
        let parcel = create_parcel(&app.db, &household, &location, now() + Duration::hours(24)).await;

        let enqueue = app
            .post_with_secret(routes::JOB_ENQUEUE, &json!({}), "X-Cron-Secret", Some(CRON_SECRET))
            .await;
        let process = app
            .post_with_secret(routes::JOB_PROCESS, &json!({}), "X-Cron-Secret", Some(CRON_SECRET))
            .await;

        assert_eq!(enqueue.status, 200, "{}", enqueue.text);
        assert_eq!(enqueue.body["reminders"], 1);
        assert_eq!(process.status, 200, "{}", process.text);
        assert_eq!(process.body["sent"], 1);
        assert_eq!(process.body["paused_for_balance"], false);

        let reminders = messages_for_parcel(&app.db, parcel.id, SmsIntent::PickupReminder).await;
        assert_eq!(reminders[0].status, SmsStatus::Sent);
        assert_eq!(app.gateway.send_calls(), 1);
    }
}

mod callbacks {
    use super::*;

    #[tokio::test]
    async fn delivery_report_updates_provider_status() {
        let app = TestApp::spawn().await;
        let household = create_household(&app.db, "Anna").await;
        let sent = insert_message(
            &app.db,
            &household,
            None,
            SmsIntent::FoodParcelsEnded,
            SmsStatus::Sent,
            now() - Duration::hours(1),
        )
        .await;
        let provider_id = sent.provider_message_id.clone().unwrap();

        let res = app
            .post_with_secret(
                routes::STATUS_CALLBACK,
                &json!({"provider_message_id": provider_id, "status": "delivered"}),
                "X-Callback-Secret",
                Some(CALLBACK_SECRET),
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["updated"], true);
        let stored = get_message(&app.db, sent.id).await;
        assert_eq!(stored.provider_status.as_deref(), Some("delivered"));
        assert!(stored.provider_status_updated_at.is_some());
        assert_eq!(stored.status, SmsStatus::Sent);
    }

    #[tokio::test]
    async fn unknown_provider_id_is_acknowledged_without_update() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_secret(
                routes::STATUS_CALLBACK,
                &json!({"provider_message_id": "nobody-knows", "status": "delivered"}),
                "X-Callback-Secret",
                Some(CALLBACK_SECRET),
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["updated"], false);
    }

    #[tokio::test]
    async fn callback_requires_the_callback_secret() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_secret(
                routes::STATUS_CALLBACK,
                &json!({"provider_message_id": "abc", "status": "delivered"}),
                "X-Callback-Secret",
                Some(CRON_SECRET),
            )
            .await;

        assert_eq!(res.status, 401);
    }

    #[tokio::test]
    async fn callback_with_an_empty_provider_id_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .post_with_secret(
                routes::STATUS_CALLBACK,
                &json!({"provider_message_id": "", "status": "delivered"}),
                "X-Callback-Secret",
                Some(CALLBACK_SECRET),
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }
}
