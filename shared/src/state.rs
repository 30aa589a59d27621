use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;

use crate::config::AppConfig;

/// Clients shared across invocations of a warm Lambda.
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub s3_client: S3Client,
    pub config: AppConfig,
}

impl AppState {
    pub async fn from_env() -> Self {
        let aws_config = aws_config::load_from_env().await;
        Self {
            dynamo_client: DynamoClient::new(&aws_config),
            s3_client: S3Client::new(&aws_config),
            config: AppConfig::from_env(),
        }
    }
}
