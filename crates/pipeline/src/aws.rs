use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use aws_types::SdkConfig;
use tracing::info;

use votefile_core::config::AwsConfig;

/// Load the shared SDK config used by the S3, Batch and SQS clients.
///
/// Static credentials and an endpoint override are applied only when set;
/// otherwise the default provider chain is used.
pub async fn load_sdk_config(aws: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(aws.region.clone()));

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "votefile-static",
        );
        loader = loader.credentials_provider(creds);
    }

    if let Some(endpoint) = aws.endpoint() {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk = loader.load().await;
    info!(
        region = %aws.region,
        static_credentials = aws.has_static_credentials(),
        endpoint = aws.endpoint_url.as_deref().unwrap_or("default"),
        "AWS SDK config loaded"
    );
    sdk
}
