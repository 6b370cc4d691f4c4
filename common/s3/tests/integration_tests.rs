use common_s3::{S3Client, S3Config, S3Error, S3Impl};

const TEST_BUCKET: &str = "clickstream-test";

// Needs the MinIO container from the local stack on 127.0.0.1:9000
async fn create_test_s3_client() -> S3Impl {
    let config = S3Config {
        s3_endpoint: "http://127.0.0.1:9000".to_string(),
        s3_region: "us-east-1".to_string(),
        s3_access_key_id: "minioadmin".to_string(),
        s3_secret_access_key: "minioadmin".to_string(),
        s3_force_path_style: true,
    };
    let client = S3Impl::from_config(&config).await;
    client
        .ensure_bucket(TEST_BUCKET)
        .await
        .expect("failed to create test bucket");
    client
}

#[tokio::test]
#[ignore = "requires a running MinIO"]
async fn test_s3_staging_round_trip() {
    let client = create_test_s3_client().await;
    let key = "round-trip/event_click_1700000000000_abcdefghi.json";
    let body = r#"{"user_id":7,"event_type":"click","url":"/a","timestamp":1700000000000}"#;

    client
        .put(TEST_BUCKET, key, body.as_bytes().to_vec())
        .await
        .expect("failed to put object");

    let keys = client.list(TEST_BUCKET, "round-trip/").await.unwrap();
    assert!(keys.iter().any(|k| k == key));

    assert_eq!(client.get_string(TEST_BUCKET, key).await.unwrap(), body);

    client.delete(TEST_BUCKET, key).await.unwrap();
    assert!(matches!(
        client.get(TEST_BUCKET, key).await,
        Err(S3Error::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires a running MinIO"]
async fn test_s3_ensure_bucket_is_idempotent() {
    let client = create_test_s3_client().await;

    client.ensure_bucket(TEST_BUCKET).await.unwrap();
    client.ensure_bucket(TEST_BUCKET).await.unwrap();
}
