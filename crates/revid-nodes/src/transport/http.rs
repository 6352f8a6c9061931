// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stateless HTTP clip transport: serialises a clip as a pin-labelled
//! multipart form and submits it to the external netsender endpoint.

use async_trait::async_trait;
use revid_core::{MtsMetadata, RevidError};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use super::ClipTransport;

/// Pin label and MIME type for the video form part.
const VIDEO_PIN: &str = "V0";
const VIDEO_MIME: &str = "video/mp2t";
/// Pin label and MIME type for the audio form part.
const AUDIO_PIN: &str = "S0";
const AUDIO_MIME: &str = "audio/x-wav";

#[derive(Debug, Deserialize)]
struct NetsenderResponse {
    /// Unix seconds, used to seed stream real time.
    ts: Option<i64>,
    /// `"lat,lng"` location metadata.
    ll: Option<String>,
}

pub struct HttpTransport {
    url: String,
    is_audio: bool,
    metadata: Option<MtsMetadata>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(url: impl Into<String>, is_audio: bool, metadata: Option<MtsMetadata>) -> Self {
        Self { url: url.into(), is_audio, metadata }
    }

    fn shared_client() -> Result<&'static reqwest::Client, RevidError> {
        static CLIENT: OnceLock<Result<reqwest::Client, reqwest::Error>> = OnceLock::new();
        CLIENT
            .get_or_init(|| {
                reqwest::Client::builder()
                    .redirect(reqwest::redirect::Policy::none())
                    .connect_timeout(Duration::from_secs(5))
                    .build()
            })
            .as_ref()
            .map_err(|e| RevidError::Network(format!("failed to initialise HTTP client: {e}")))
    }
}

#[async_trait]
impl ClipTransport for HttpTransport {
    async fn send(&mut self, clip: &[u8]) -> Result<(), RevidError> {
        let client = Self::shared_client()?;
        let (pin, mime) = if self.is_audio { (AUDIO_PIN, AUDIO_MIME) } else { (VIDEO_PIN, VIDEO_MIME) };

        let part = reqwest::multipart::Part::bytes(clip.to_vec())
            .mime_str(mime)
            .map_err(|e| RevidError::Network(format!("invalid clip MIME type: {e}")))?;
        let form = reqwest::multipart::Form::new().part(pin, part);

        let response = client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RevidError::Network(format!("clip upload failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RevidError::Network(format!("clip upload rejected: {}", response.status())));
        }

        if let Some(metadata) = &self.metadata {
            if let Ok(parsed) = response.json::<NetsenderResponse>().await {
                if parsed.ts.is_some() || parsed.ll.is_some() {
                    metadata.update(|fields| {
                        if let Some(ts) = parsed.ts {
                            fields.timestamp = Some(ts.to_string());
                        }
                        if let Some(ll) = parsed.ll {
                            fields.location = Some(ll);
                        }
                    });
                }
            }
        }

        Ok(())
    }

    async fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_labels_match_codec_kind() {
        assert_eq!(VIDEO_PIN, "V0");
        assert_eq!(AUDIO_PIN, "S0");
        assert_eq!(VIDEO_MIME, "video/mp2t");
        assert_eq!(AUDIO_MIME, "audio/x-wav");
    }
}
