//! Gemini adapter (chat, image analysis, image generation).
//!
//! Talks to the `generateContent` endpoint. Chat and analysis use the
//! configured text model; generation asks an image-capable model for a PNG
//! part and returns its decoded bytes.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use hayasaka_core::{
    ai::GenerativeBackend,
    domain::{Role, Turn},
    Error, Result,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const IMAGE_MODEL: &str = "gemini-2.0-flash-exp-image-generation";

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client build");
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http,
        }
    }

    async fn generate(&self, model: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/{model}:generateContent");

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("gemini request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "gemini call failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("gemini json error: {e}")))
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn chat(&self, history: &[Turn]) -> Result<String> {
        let body = serde_json::json!({ "contents": contents_from_history(history) });
        let v = self.generate(&self.model, body).await?;
        extract_text(&v)
    }

    async fn describe_image(&self, prompt: &str, image: &[u8], mime: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": mime, "data": BASE64.encode(image) } },
                ],
            }],
        });
        let v = self.generate(&self.model, body).await?;
        extract_text(&v)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
        });
        let v = self.generate(IMAGE_MODEL, body).await?;
        extract_inline_png(&v)
    }
}

/// Map the dialogue history onto Gemini's `contents` array. Assistant turns
/// become `model` role entries.
fn contents_from_history(history: &[Turn]) -> serde_json::Value {
    let contents = history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            serde_json::json!({ "role": role, "parts": [{ "text": turn.text }] })
        })
        .collect::<Vec<_>>();
    serde_json::Value::Array(contents)
}

fn first_candidate_parts(v: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    v.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()
}

fn extract_text(v: &serde_json::Value) -> Result<String> {
    let text = first_candidate_parts(v)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::External("gemini returned no text".to_string()));
    }
    Ok(text)
}

fn extract_inline_png(v: &serde_json::Value) -> Result<Vec<u8>> {
    let data = first_candidate_parts(v)
        .and_then(|parts| {
            parts.iter().find_map(|p| {
                let inline = p.get("inlineData").or_else(|| p.get("inline_data"))?;
                inline.get("data")?.as_str()
            })
        })
        .ok_or_else(|| Error::External("gemini returned no image data".to_string()))?;

    BASE64
        .decode(data)
        .map_err(|e| Error::External(format!("gemini image data is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_roles_map_to_user_and_model() {
        let history = vec![
            Turn::user("kamu siapa?"),
            Turn::assistant("Saya Hayasaka AI."),
            Turn::user("oke"),
        ];
        let contents = contents_from_history(&history);
        let roles = contents
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(contents[1]["parts"][0]["text"], "Saya Hayasaka AI.");
    }

    #[test]
    fn extracts_and_joins_text_parts() {
        let v = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Halo" }, { "text": ", dunia" }] },
            }],
        });
        assert_eq!(extract_text(&v).unwrap(), "Halo, dunia");
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let v = serde_json::json!({ "candidates": [] });
        assert!(extract_text(&v).is_err());
    }

    #[test]
    fn extracts_inline_image_in_either_casing() {
        let png = [0x89u8, 0x50, 0x4e, 0x47];
        for key in ["inlineData", "inline_data"] {
            let v = serde_json::json!({
                "candidates": [{
                    "content": {
                        "parts": [
                            { "text": "here you go" },
                            { key: { "mimeType": "image/png", "data": BASE64.encode(png) } },
                        ],
                    },
                }],
            });
            assert_eq!(extract_inline_png(&v).unwrap(), png.to_vec());
        }
    }

    #[test]
    fn text_only_response_has_no_image() {
        let v = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "cannot draw that" }] } }],
        });
        assert!(extract_inline_png(&v).is_err());
    }
}
