//! HTTP classifier backend.
//!
//! Speaks the Ollama-style `/api/generate` contract: one JSON POST carrying
//! the model name, the prompt and the frame as a base64 grayscale PNG; the
//! reply's `response` text is run through `interpret_verdict`.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use url::Url;

use crate::classify::backend::{ClassifierBackend, ClassifierRequest};
use crate::classify::verdict::{interpret_verdict, ClassifierFailure, Verdict};
use crate::frame::Frame;

pub struct HttpBackend {
    agent: ureq::Agent,
    endpoint: Url,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [String; 1],
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpBackend {
    /// `timeout` bounds both connect and the whole exchange, so abandoned
    /// queries release their worker thread shortly after the caller gave up.
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse classifier endpoint")?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported classifier scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Ok(Self {
            agent,
            endpoint,
            model: model.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

impl ClassifierBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn classify(&self, request: &ClassifierRequest) -> Result<Verdict, ClassifierFailure> {
        let png = encode_grayscale_png(&request.frame)
            .map_err(|e| ClassifierFailure::Unavailable(format!("encode frame: {:#}", e)))?;
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            images: [STANDARD.encode(png)],
            stream: false,
        };

        let response = match self.agent.post(self.endpoint.as_str()).send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(ClassifierFailure::Unavailable(format!(
                    "classifier returned HTTP {}",
                    code
                )))
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ClassifierFailure::Unavailable(transport.to_string()))
            }
        };

        let reply: GenerateResponse = response
            .into_json()
            .map_err(|e| ClassifierFailure::InvalidResponse(format!("reply body: {}", e)))?;
        interpret_verdict(&reply.response)
    }
}

/// Min-max normalise finite pixels into an 8-bit grayscale PNG.
/// Non-finite pixels (missing depth readings) become black.
pub(crate) fn encode_grayscale_png(frame: &Frame) -> Result<Vec<u8>> {
    let (min, max) = frame
        .pixels()
        .iter()
        .filter(|p| p.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &p| {
            (lo.min(p), hi.max(p))
        });
    let range = if max > min { max - min } else { 1.0 };

    let bytes: Vec<u8> = frame
        .pixels()
        .iter()
        .map(|&p| {
            if p.is_finite() {
                (((p - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect();

    let image = GrayImage::from_raw(frame.width(), frame.height(), bytes)
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("encode PNG")?;
    Ok(out.into_inner())
}
