//! Cloud ASR via DashScope's file-transcription API (spec.md §9 Open
//! Question "ASR backend", resolved to cloud-only). Grounded on
//! `original_source/video_auto_cut/asr/dashscope_temp_uploader.py`'s
//! getPolicy/temp-OSS-upload flow and the async submit/poll shape implied
//! by `PipelineOptions`'s `asr_dashscope_poll_seconds`/`timeout_seconds`
//! fields in `original_source/video_auto_cut/orchestration/
//! pipeline_service.py`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clapper_pipeline::srt::{compose_srt, SrtCue};
use serde::Deserialize;
use serde_json::json;

use super::{DriverError, DriverResult, ProgressCallback};

#[derive(Debug, Clone)]
pub struct DashscopeOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

pub struct DashscopeAsrDriver {
    http: reqwest::Client,
    options: DashscopeOptions,
}

#[derive(Deserialize)]
struct UploadPolicyResponse {
    data: UploadPolicyData,
}

#[derive(Deserialize)]
struct UploadPolicyData {
    upload_host: String,
    upload_dir: String,
    oss_access_key_id: String,
    signature: String,
    policy: String,
}

#[derive(Deserialize)]
struct SubmitTaskResponse {
    output: SubmitTaskOutput,
}

#[derive(Deserialize)]
struct SubmitTaskOutput {
    task_id: String,
}

#[derive(Deserialize)]
struct TaskStatusResponse {
    output: TaskStatusOutput,
}

#[derive(Deserialize)]
struct TaskStatusOutput {
    task_status: String,
    #[serde(default)]
    results: Vec<TaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TaskResult {
    #[serde(default)]
    sentences: Vec<TaskSentence>,
}

#[derive(Deserialize)]
struct TaskSentence {
    text: String,
    begin_time: f64,
    end_time: f64,
}

impl DashscopeAsrDriver {
    pub fn new(options: DashscopeOptions) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("reqwest client builds");
        DashscopeAsrDriver { http, options }
    }

    fn api_key(&self) -> DriverResult<&str> {
        self.options
            .api_key
            .as_deref()
            .ok_or_else(|| DriverError::AsrFailed("ASR_DASHSCOPE_API_KEY is not configured".into()))
    }

    pub async fn transcribe(&self, audio_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf> {
        progress("transcribe", Some(0.0));
        let oss_url = self.upload_to_temp_oss(audio_path).await?;
        progress("transcribe", Some(0.2));

        let task_id = self.submit_task(&oss_url).await?;
        progress("transcribe", Some(0.3));

        let sentences = self.poll_until_done(&task_id, progress).await?;

        let cues: Vec<SrtCue> = sentences
            .into_iter()
            .enumerate()
            .map(|(i, s)| SrtCue {
                index: (i + 1) as i64,
                start_sec: s.begin_time / 1000.0,
                end_sec: s.end_time / 1000.0,
                content: s.text,
            })
            .collect();

        let srt_path = audio_path.with_extension("srt");
        tokio::fs::write(&srt_path, compose_srt(&cues)).await?;
        progress("transcribe", Some(1.0));
        Ok(srt_path)
    }

    async fn upload_to_temp_oss(&self, audio_path: &Path) -> DriverResult<String> {
        let api_key = self.api_key()?.to_string();
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let policy_url = format!(
            "{}/api/v1/uploads?action=getPolicy&model={}",
            self.options.base_url.trim_end_matches('/'),
            self.options.model
        );
        let policy: UploadPolicyResponse = self
            .http
            .get(&policy_url)
            .bearer_auth(&api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let policy = policy.data;

        let upload_dir = policy.upload_dir.trim_matches('/');
        let key = if upload_dir.is_empty() {
            file_name.clone()
        } else {
            format!("{upload_dir}/{file_name}")
        };

        let bytes = tokio::fs::read(audio_path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.clone());
        let form = reqwest::multipart::Form::new()
            .text("OSSAccessKeyId", policy.oss_access_key_id)
            .text("Signature", policy.signature)
            .text("policy", policy.policy)
            .text("key", key.clone())
            .text("success_action_status", "200")
            .part("file", part);

        self.http
            .post(policy.upload_host.trim_end_matches('/'))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        Ok(format!("oss://{key}"))
    }

    async fn submit_task(&self, oss_url: &str) -> DriverResult<String> {
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/api/v1/services/audio/asr/transcription", self.options.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.options.model,
            "input": { "file_urls": [oss_url] },
        });
        let response: SubmitTaskResponse = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .header("X-DashScope-Async", "enable")
            .header("X-DashScope-OssResourceResolve", "enable")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.output.task_id)
    }

    async fn poll_until_done(&self, task_id: &str, progress: &ProgressCallback) -> DriverResult<Vec<TaskSentence>> {
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/api/v1/tasks/{}", self.options.base_url.trim_end_matches('/'), task_id);
        let deadline = Instant::now() + self.options.timeout;

        loop {
            if Instant::now() > deadline {
                return Err(DriverError::Timeout(self.options.timeout));
            }

            let status: TaskStatusResponse = self
                .http
                .get(&url)
                .bearer_auth(&api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match status.output.task_status.as_str() {
                "SUCCEEDED" => {
                    progress("transcribe", Some(0.9));
                    let sentences = status
                        .output
                        .results
                        .into_iter()
                        .flat_map(|r| r.sentences)
                        .collect();
                    return Ok(sentences);
                }
                "FAILED" => {
                    return Err(DriverError::AsrFailed(
                        status.output.message.unwrap_or_else(|| "transcription task failed".into()),
                    ));
                }
                _ => {
                    progress("transcribe", Some(0.5));
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        }
    }
}
