//! Captcha resolution.
//!
//! Two operating modes keyed off the scraped login form: classic text
//! captchas are decoded by an [`OcrBackend`] collaborator, slider puzzles are
//! measured by a [`SlideSolver`] collaborator and verified against the portal
//! before the login POST. The engine performs exactly one fetch/solve cycle
//! per login attempt; repetition is the orchestrator's retry loop.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::form::FormSchema;

/// Canvas width the portal renders the slider puzzle at.
const SLIDER_CANVAS_WIDTH: u32 = 280;

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("captcha endpoint url invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("captcha image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("no OCR backend configured for a text captcha")]
    OcrBackendMissing,
    #[error("no slide solver configured for a slider captcha")]
    SlideSolverMissing,
    #[error("OCR backend failed: {0}")]
    Backend(String),
    #[error("slide solver reported a zero-width canvas")]
    DegenerateSolution,
    #[error("captcha backend {0} not implemented")]
    NotImplemented(&'static str),
}

/// Offset solution for a slider puzzle, in source-image pixels.
#[derive(Debug, Clone, Copy)]
pub struct SlideSolution {
    /// Horizontal offset of the gap.
    pub offset: u32,
    /// Width of the background image the offset was measured on.
    pub canvas_width: u32,
}

/// Decodes a distorted-text challenge image.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn recognize(&self, image: &[u8]) -> Result<String, CaptchaError>;
}

/// Measures the gap offset of a slider puzzle from its image pair.
#[async_trait]
pub trait SlideSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, small_image: &[u8], big_image: &[u8])
    -> Result<SlideSolution, CaptchaError>;
}

/// Placeholder adapter for a ddddocr-style sidecar service.
#[derive(Debug, Clone)]
pub struct DdddOcrBackend {
    pub endpoint: String,
}

impl DdddOcrBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OcrBackend for DdddOcrBackend {
    fn name(&self) -> &'static str {
        "ddddocr"
    }

    async fn recognize(&self, _image: &[u8]) -> Result<String, CaptchaError> {
        Err(CaptchaError::NotImplemented(self.name()))
    }
}

#[derive(Debug, Deserialize)]
struct SliderImages {
    #[serde(rename = "smallImage")]
    small_image: String,
    #[serde(rename = "bigImage")]
    big_image: String,
}

/// Orchestrates the two captcha modes over an authenticating session.
#[derive(Default, Clone)]
pub struct CaptchaResolver {
    ocr: Option<Arc<dyn OcrBackend>>,
    slider: Option<Arc<dyn SlideSolver>>,
}

impl CaptchaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ocr_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.ocr = Some(backend);
        self
    }

    pub fn with_slide_solver(mut self, solver: Arc<dyn SlideSolver>) -> Self {
        self.slider = Some(solver);
        self
    }

    /// Fetch and decode a text captcha.
    ///
    /// Returns the form field name/value pair to merge into the credential
    /// set; both the challenge endpoint and the field name differ by schema.
    pub async fn solve_text(
        &self,
        client: &reqwest::Client,
        host: &Url,
        schema: FormSchema,
    ) -> Result<(&'static str, String), CaptchaError> {
        let backend = self.ocr.as_ref().ok_or(CaptchaError::OcrBackendMissing)?;

        let (path, field) = match schema {
            FormSchema::CasLoginForm => ("authserver/captcha.html", "captchaResponse"),
            _ => ("authserver/getCaptcha.htl", "captcha"),
        };
        let image = client
            .get(host.join(path)?)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let code = backend.recognize(&image).await?;
        log::debug!("text captcha decoded by {} -> '{}'", backend.name(), code);
        Ok((field, code))
    }

    /// Fetch, solve, and verify a slider captcha before the login POST.
    pub async fn solve_slider(
        &self,
        client: &reqwest::Client,
        host: &Url,
    ) -> Result<(), CaptchaError> {
        let solver = self
            .slider
            .as_ref()
            .ok_or(CaptchaError::SlideSolverMissing)?;

        let images: SliderImages = client
            .get(host.join("authserver/common/openSliderCaptcha.htl")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let small = BASE64.decode(images.small_image.as_bytes())?;
        let big = BASE64.decode(images.big_image.as_bytes())?;
        let solution = solver.solve(&small, &big).await?;
        if solution.canvas_width == 0 {
            return Err(CaptchaError::DegenerateSolution);
        }

        // Normalise from the source image width to the rendered canvas.
        let move_length = SLIDER_CANVAS_WIDTH * solution.offset / solution.canvas_width;
        log::debug!(
            "slider captcha solved by {}: offset {}/{} -> {}px",
            solver.name(),
            solution.offset,
            solution.canvas_width,
            move_length
        );

        client
            .post(host.join("authserver/common/verifySliderCaptcha.htl")?)
            .form(&[
                ("canvasLength", SLIDER_CANVAS_WIDTH.to_string()),
                ("moveLength", move_length.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
