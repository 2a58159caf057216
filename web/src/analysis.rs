//! Client for the external analysis/voice service.
//!
//! The collaborator is a stateless request/response service: given a
//! position and candidate lines it returns commentary, and given a position
//! and free text it returns the spoken move in UCI notation. Failures get
//! their own taxonomy and never touch session state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis service request failed: {0}")]
    Request(String),
    #[error("analysis service returned a malformed response: {0}")]
    Malformed(String),
}

/// A candidate line forwarded to the analysis service.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateLine {
    pub uci_move: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate_in: Option<i32>,
}

#[derive(Serialize)]
struct CommentaryRequest<'a> {
    fen: &'a str,
    lines: &'a [CandidateLine],
}

#[derive(Deserialize)]
struct CommentaryResponse {
    commentary: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    fen: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SpeechResponse {
    uci_move: String,
}

pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Request(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Natural-language commentary for a position and its candidate lines.
    pub async fn commentary(
        &self,
        fen: &str,
        lines: &[CandidateLine],
    ) -> Result<String, AnalysisError> {
        let url = format!("{}/commentary", self.base_url);
        let response: CommentaryResponse = self
            .post_json(&url, &CommentaryRequest { fen, lines })
            .await?;
        Ok(response.commentary)
    }

    /// Convert free text ("knight takes e5") into a move in UCI notation
    /// for the given position.
    pub async fn move_from_speech(&self, fen: &str, text: &str) -> Result<String, AnalysisError> {
        let url = format!("{}/transcribe-move", self.base_url);
        let response: SpeechResponse = self.post_json(&url, &SpeechRequest { fen, text }).await?;
        Ok(response.uci_move)
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, AnalysisError>
    where
        B: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| AnalysisError::Request(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_line_serializes_without_empty_fields() {
        let line = CandidateLine {
            uci_move: "e2e4".into(),
            score_cp: Some(35),
            mate_in: None,
        };
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.contains("\"score_cp\":35"));
        assert!(!json.contains("mate_in"));
    }
}
