mod common;

use axum::body::to_bytes;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{create_test_app, json_body, send};

const ANA: (&str, &str) = ("x-user-id", "ana");

#[tokio::test]
async fn health_returns_ok() {
    let app = create_test_app();
    let response = send(&app, "GET", "/health", &[], None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let app = create_test_app();
    let response = send(&app, "GET", "/learning-streaks/current", &[], None).await;
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn review_schedules_word_and_lists_it_as_due_later() {
    let app = create_test_app();
    let word = Uuid::new_v4();

    let uri = format!("/review/{word}?quality=5");
    let (status, body) = json_body(send(&app, "PUT", &uri, &[ANA], None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["wordId"], word.to_string());
    assert_eq!(body["data"]["intervalDays"], 1);
    assert_eq!(body["data"]["reviewCount"], 1);
    assert_eq!(body["data"]["isMemorized"], true);

    // Due tomorrow, so nothing is due today.
    let (status, body) = json_body(send(&app, "GET", "/review/due", &[ANA], None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["wordIds"], json!([]));
}

#[tokio::test]
async fn review_quality_is_validated() {
    let app = create_test_app();
    let word = Uuid::new_v4();

    for query in ["quality=6", "quality=-1", "quality=high", ""] {
        let uri = format!("/review/{word}?{query}");
        let (status, body) = json_body(send(&app, "PUT", &uri, &[ANA], None).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "query {query}");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn recording_twice_on_one_day_counts_once() {
    let app = create_test_app();
    let headers = [ANA, ("x-timezone", "Europe/Berlin")];

    let (status, first) =
        json_body(send(&app, "POST", "/learning-streaks/record", &headers, None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["currentStreak"], 1);
    assert_eq!(first["data"]["updated"], true);
    assert_eq!(first["data"]["newRecord"], true);

    let (_, second) =
        json_body(send(&app, "POST", "/learning-streaks/record", &headers, None).await).await;
    assert_eq!(second["data"]["currentStreak"], 1);
    assert_eq!(second["data"]["updated"], false);

    let response = send(&app, "GET", "/learning-streaks/current", &[ANA], None).await;
    let (_, current) = json_body(response).await;
    assert_eq!(current["data"], 1);
    let response = send(&app, "GET", "/learning-streaks/longest", &[ANA], None).await;
    let (_, longest) = json_body(response).await;
    assert_eq!(longest["data"], 1);

    let (_, status) =
        json_body(send(&app, "GET", "/learning-streaks/status", &headers, None).await).await;
    assert_eq!(status["data"]["studiedToday"], true);
    assert_eq!(status["data"]["needsStudyToday"], false);
}

#[tokio::test]
async fn unknown_timezone_falls_back_to_utc() {
    let app = create_test_app();
    let headers = [ANA, ("x-timezone", "Nowhere/Special")];
    let (status, body) =
        json_body(send(&app, "POST", "/learning-streaks/record", &headers, None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["currentStreak"], 1);
}

#[tokio::test]
async fn streak_of_new_user_is_zero() {
    let app = create_test_app();
    let (status, body) = json_body(
        send(&app, "GET", "/learning-streaks/current", &[("x-user-id", "nobody")], None).await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 0);
}

#[tokio::test]
async fn metrics_unlock_achievements_once() {
    let app = create_test_app();
    let metric = json!({ "criteria": "exercises", "value": 30 });

    let response = send(&app, "POST", "/achievements/metrics", &[ANA], Some(metric.clone())).await;
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let unlocked = body["data"].as_array().unwrap();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0]["code"], "EXERCISES_25");

    let (_, body) =
        json_body(send(&app, "POST", "/achievements/metrics", &[ANA], Some(metric)).await).await;
    assert_eq!(body["data"], json!([]));

    let (status, body) = json_body(send(&app, "GET", "/achievements", &[ANA], None).await).await;
    assert_eq!(status, StatusCode::OK);
    let views = body["data"].as_array().unwrap();
    assert_eq!(views.len(), 8);
    let exercises = views.iter().find(|v| v["code"] == "EXERCISES_25").unwrap();
    assert_eq!(exercises["isUnlocked"], true);
    assert_eq!(exercises["percent"], 100.0);
    assert_eq!(exercises["criteria"], "EXERCISES");
}

#[tokio::test]
async fn metrics_reject_unknown_criteria() {
    let app = create_test_app();
    let metric = json!({ "criteria": "chapters", "value": 3 });
    let (status, body) =
        json_body(send(&app, "POST", "/achievements/metrics", &[ANA], Some(metric)).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_metric_body_uses_error_envelope() {
    let app = create_test_app();
    for body in [
        json!({ "criteria": "exercises", "value": "x" }),
        json!({ "value": 3 }),
    ] {
        let (status, body) =
            json_body(send(&app, "POST", "/achievements/metrics", &[ANA], Some(body)).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn statistics_reflect_reviews() {
    let app = create_test_app();
    for quality in [5, 2] {
        let uri = format!("/review/{}?quality={quality}", Uuid::new_v4());
        let response = send(&app, "PUT", &uri, &[ANA], None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let (status, body) =
        json_body(send(&app, "GET", "/review/statistics", &[ANA], None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reviewed"], 2);
    assert_eq!(body["data"]["memorized"], 1);
    assert_eq!(body["data"]["dueToday"], 0);
}
