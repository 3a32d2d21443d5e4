//! Object storage interface (spec.md §6.3): presigned direct-upload URLs
//! for client-side audio upload, bypassing the API process for the bytes
//! themselves.
//!
//! Grounded on the teacher's `protocol::s3::S3Client` (`build_aws_client`'s
//! endpoint/credentials wiring, `presign_get`'s `PresigningConfig` call
//! shape) and `original_source/video_auto_cut/asr/oss_uploader.py`'s
//! object-key layout / `original_source/web_api/services/oss_presign.py`'s
//! settings wiring and fail-closed `get_oss_uploader()`. The teacher
//! presigns GET against AWS S3; Aliyun OSS is S3-compatible, so the same
//! `aws-sdk-s3` presigning call works against a custom `endpoint_url`, just
//! for PUT instead of GET.

use std::time::Duration;

use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum OssError {
    #[error("object storage is not configured (OSS_ENDPOINT/OSS_BUCKET/OSS_ACCESS_KEY_ID/OSS_ACCESS_KEY_SECRET)")]
    NotConfigured,
    #[error("failed to presign upload url: {0}")]
    Presign(String),
    #[error("failed to fetch uploaded object: {0}")]
    Download(String),
}

/// Holds the configured S3-compatible client plus the prefix/ttl defaults;
/// one instance lives in `AppState` for the process lifetime.
pub struct OssUploader {
    client: S3Client,
    bucket: String,
    prefix: String,
    default_ttl_seconds: i64,
}

impl OssUploader {
    /// `get_oss_uploader` (oss_presign.py): fails closed if any of the four
    /// required settings is missing rather than building a half-configured
    /// client that would only fail on first use.
    pub fn from_settings(settings: &Settings) -> Result<Self, OssError> {
        let (endpoint, bucket, key_id, key_secret) = match (
            &settings.oss_endpoint,
            &settings.oss_bucket,
            &settings.oss_access_key_id,
            &settings.oss_access_key_secret,
        ) {
            (Some(e), Some(b), Some(k), Some(s)) => (e.clone(), b.clone(), k.clone(), s.clone()),
            _ => return Err(OssError::NotConfigured),
        };

        let credentials = Credentials::new(key_id, key_secret, None, None, "clapper-oss");
        let s3_config = S3ConfigBuilder::new()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(Region::new("oss"))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .force_path_style(false)
            .build();

        Ok(OssUploader {
            client: S3Client::from_conf(s3_config),
            bucket,
            prefix: settings
                .oss_audio_prefix
                .trim()
                .trim_matches('/')
                .to_string(),
            default_ttl_seconds: settings.oss_signed_url_ttl_seconds.max(60),
        })
    }

    /// `build_object_key_for_job` (§6.3):
    /// `<prefix>/<job_id>/<yyyymmdd>/<hhmmss>/audio_<nonce><suffix>`.
    pub fn build_object_key_for_job(&self, job_id: &str, suffix: &str) -> String {
        let stamp = chrono::Utc::now().format("%Y%m%d/%H%M%S");
        let nonce = &uuid::Uuid::new_v4().simple().to_string()[..10];
        let suffix = if suffix.starts_with('.') {
            suffix.to_string()
        } else {
            format!(".{suffix}")
        };
        format!("{}/{}/{}/audio_{}{}", self.prefix, job_id, stamp, nonce, suffix)
    }

    /// `get_presigned_put_url(object_key, expires_seconds)` (§6.3).
    pub async fn get_presigned_put_url(
        &self,
        object_key: &str,
        expires_seconds: Option<i64>,
    ) -> Result<String, OssError> {
        let ttl = expires_seconds.unwrap_or(self.default_ttl_seconds).max(60) as u64;
        let presign_config =
            PresigningConfig::expires_in(Duration::from_secs(ttl)).map_err(|e| OssError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .presigned(presign_config)
            .await
            .map_err(|e| OssError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Pull a client-uploaded object down into the job's `input/` directory
    /// so the rest of the pipeline (which reads `audio_path` off local disk,
    /// per `StageDriver::transcribe`) doesn't need an OSS-aware code path.
    pub async fn download_object_to_file(&self, object_key: &str, dest: &std::path::Path) -> Result<(), OssError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| OssError::Download(e.to_string()))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| OssError::Download(e.to_string()))?
            .into_bytes();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| OssError::Download(e.to_string()))?;
        }
        tokio::fs::write(dest, &bytes).await.map_err(|e| OssError::Download(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_oss() -> Settings {
        let mut settings = Settings::from_env();
        settings.oss_endpoint = Some("https://oss-cn-hangzhou.aliyuncs.com".to_string());
        settings.oss_bucket = Some("my-bucket".to_string());
        settings.oss_access_key_id = Some("id".to_string());
        settings.oss_access_key_secret = Some("secret".to_string());
        settings.oss_audio_prefix = "video-auto-cut/asr".to_string();
        settings
    }

    #[test]
    fn missing_config_fails_closed() {
        let mut settings = Settings::from_env();
        settings.oss_endpoint = None;
        assert!(matches!(OssUploader::from_settings(&settings), Err(OssError::NotConfigured)));
    }

    #[test]
    fn object_key_is_namespaced_by_job_and_prefix() {
        let settings = settings_with_oss();
        let uploader = OssUploader::from_settings(&settings).unwrap();
        let key = uploader.build_object_key_for_job("job_abc123", ".wav");
        assert!(key.starts_with("video-auto-cut/asr/job_abc123/"));
        assert!(key.ends_with(".wav"));
    }

    #[test]
    fn object_key_suffix_is_normalized_with_a_leading_dot() {
        let settings = settings_with_oss();
        let uploader = OssUploader::from_settings(&settings).unwrap();
        let key = uploader.build_object_key_for_job("job_abc123", "wav");
        assert!(key.ends_with(".wav"));
    }
}
