//! Tiered text extraction.
//!
//! Extraction escalates through tiers until one produces acceptable
//! quality: the document's native text layer first, then the OCR sidecar,
//! then a vision model reading rendered page images. Later tiers get a
//! slightly relaxed bar, and the last tier's output is taken as-is rather
//! than failing the document outright.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use clauselens_core::{Error, OcrConfig, Result};

use crate::quality::{clean_text, quality_score};

/// Confidence reported for vision-model transcription.
const VISION_CONFIDENCE: f32 = 0.85;

/// Output of one extraction tier, after cleaning and scoring.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: Option<i64>,
    /// Name of the tier that produced this text.
    pub tier: &'static str,
    /// The tier's own confidence in its output.
    pub confidence: f32,
    /// Heuristic quality score in [0, 1].
    pub quality: f32,
}

/// One rung of the extraction ladder.
#[async_trait]
pub trait TierExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt extraction. `Ok(None)` means this tier cannot handle the
    /// file (e.g., no text layer); errors are logged and skipped.
    async fn extract(&self, path: &Path) -> Result<Option<(String, Option<i64>, f32)>>;
}

/// Quality-gated escalation over an ordered list of tiers.
pub struct OcrPipeline {
    tiers: Vec<Box<dyn TierExtractor>>,
    quality_threshold: f32,
}

impl OcrPipeline {
    pub fn new(tiers: Vec<Box<dyn TierExtractor>>, quality_threshold: f32) -> Self {
        Self {
            tiers,
            quality_threshold,
        }
    }

    /// Build the standard ladder from configuration: native text layer,
    /// sidecar OCR, vision model.
    pub fn from_config(config: &OcrConfig, ollama_url: &str) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let tiers: Vec<Box<dyn TierExtractor>> = vec![
            Box::new(SidecarTier::native(&config.sidecar_url, timeout)),
            Box::new(SidecarTier::ocr(&config.sidecar_url, timeout)),
            Box::new(VisionTier::new(
                &config.sidecar_url,
                ollama_url,
                &config.vision_model,
                timeout,
            )),
        ];
        Self::new(tiers, config.confidence_threshold)
    }

    /// Extract text from a file, escalating until a tier clears its bar.
    ///
    /// Returns the best output seen if no tier clears it, and an error only
    /// when every tier produced nothing at all.
    pub async fn extract(&self, path: &Path) -> Result<ExtractedText> {
        let mut best: Option<ExtractedText> = None;
        let last = self.tiers.len().saturating_sub(1);

        for (i, tier) in self.tiers.iter().enumerate() {
            // The first tier must fully clear the threshold; OCR tiers get
            // a small discount since their output is noisier by nature.
            let bar = if i == 0 {
                self.quality_threshold
            } else {
                self.quality_threshold * 0.9
            };

            let (raw, page_count, confidence) = match tier.extract(path).await {
                Ok(Some(out)) => out,
                Ok(None) => {
                    debug!("Tier {} produced no text", tier.name());
                    continue;
                }
                Err(e) => {
                    warn!("Tier {} failed: {}", tier.name(), e);
                    continue;
                }
            };

            let text = clean_text(&raw);
            let quality = quality_score(&text, page_count);
            let result = ExtractedText {
                text,
                page_count,
                tier: tier.name(),
                confidence,
                quality,
            };

            if quality >= bar || i == last {
                info!(
                    "Extraction accepted at tier {} (quality {:.2})",
                    tier.name(),
                    quality
                );
                return Ok(result);
            }

            debug!(
                "Tier {} quality {:.2} below {:.2}, escalating",
                tier.name(),
                quality,
                bar
            );
            if best.as_ref().map_or(true, |b| quality > b.quality) {
                best = Some(result);
            }
        }

        best.ok_or_else(|| {
            Error::Extraction(format!("no tier extracted text from {}", path.display()))
        })
    }
}

#[derive(Deserialize)]
struct SidecarExtractResponse {
    text: String,
    page_count: Option<i64>,
    confidence: Option<f32>,
}

#[derive(Deserialize)]
struct SidecarRenderResponse {
    /// Base64-encoded PNGs, one per page.
    pages: Vec<String>,
}

/// Tier backed by the OCR sidecar service (native text layer or tesseract).
pub struct SidecarTier {
    client: reqwest::Client,
    url: String,
    name: &'static str,
    timeout: Duration,
}

impl SidecarTier {
    pub fn native(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/extract/native", base_url.trim_end_matches('/')),
            name: "native",
            timeout,
        }
    }

    pub fn ocr(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/extract/ocr", base_url.trim_end_matches('/')),
            name: "ocr",
            timeout,
        }
    }
}

#[async_trait]
impl TierExtractor for SidecarTier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn extract(&self, path: &Path) -> Result<Option<(String, Option<i64>, f32)>> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(filename));

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("sidecar request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Extraction(format!(
                "sidecar returned {}",
                response.status()
            )));
        }

        let parsed: SidecarExtractResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("malformed sidecar response: {}", e)))?;

        if parsed.text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some((
            parsed.text,
            parsed.page_count,
            parsed.confidence.unwrap_or(1.0),
        )))
    }
}

/// Last-resort tier: render pages via the sidecar and transcribe each with
/// a vision model.
pub struct VisionTier {
    client: reqwest::Client,
    render_url: String,
    generate_url: String,
    model: String,
    timeout: Duration,
}

impl VisionTier {
    pub fn new(sidecar_url: &str, ollama_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_url: format!("{}/render", sidecar_url.trim_end_matches('/')),
            generate_url: format!("{}/api/generate", ollama_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        }
    }

    async fn render_pages(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(filename));

        let response = self
            .client
            .post(&self.render_url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("page render failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Extraction(format!(
                "page render returned {}",
                response.status()
            )));
        }

        let parsed: SidecarRenderResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("malformed render response: {}", e)))?;
        Ok(parsed.pages)
    }

    async fn transcribe_page(&self, image_b64: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": "Transcribe all text in this document page exactly as written. \
                       Output only the transcribed text.",
            "images": [image_b64],
            "stream": false,
        });

        let response = self
            .client
            .post(&self.generate_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("vision model request failed: {}", e)))?;

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("malformed vision response: {}", e)))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl TierExtractor for VisionTier {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn extract(&self, path: &Path) -> Result<Option<(String, Option<i64>, f32)>> {
        let pages = self.render_pages(path).await?;
        if pages.is_empty() {
            return Ok(None);
        }

        let page_count = pages.len() as i64;
        let mut text = String::new();
        for (i, image) in pages.iter().enumerate() {
            let page_text = self.transcribe_page(image).await?;
            text.push_str(&format!("--- Page {} ---\n", i + 1));
            text.push_str(page_text.trim());
            text.push_str("\n\n");
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some((text, Some(page_count), VISION_CONFIDENCE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn readable_contract_page() -> String {
        "This Master Services Agreement is entered into between the parties \
         named below. Each party agrees to perform its obligations with \
         reasonable skill and care. Either party may terminate this agreement \
         for material breach upon thirty days written notice if the breach \
         remains uncured at the end of the notice period. The limitation of \
         liability in this section applies to all claims in the aggregate."
            .to_string()
    }

    struct FakeTier {
        name: &'static str,
        output: Result<Option<(String, Option<i64>, f32)>>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeTier {
        fn new(
            name: &'static str,
            output: Result<Option<(String, Option<i64>, f32)>>,
        ) -> (Box<dyn TierExtractor>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name,
                    output,
                    calls: calls.clone(),
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl TierExtractor for FakeTier {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, _path: &Path) -> Result<Option<(String, Option<i64>, f32)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.output {
                Ok(o) => Ok(o.clone()),
                Err(_) => Err(Error::Extraction("tier down".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_first_tier_acceptance_stops_escalation() {
        let (good, _) = FakeTier::new("native", Ok(Some((readable_contract_page(), Some(1), 1.0))));
        let (never, never_calls) = FakeTier::new("ocr", Ok(None));

        let pipeline = OcrPipeline::new(vec![good, never], 0.8);
        let result = pipeline.extract(&PathBuf::from("a.pdf")).await.unwrap();

        assert_eq!(result.tier, "native");
        assert!(result.quality >= 0.8);
        assert_eq!(never_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poor_quality_escalates() {
        let (bad, _) = FakeTier::new("native", Ok(Some(("a b".into(), Some(5), 1.0))));
        let (good, good_calls) =
            FakeTier::new("ocr", Ok(Some((readable_contract_page(), Some(1), 0.9))));

        let pipeline = OcrPipeline::new(vec![bad, good], 0.8);
        let result = pipeline.extract(&PathBuf::from("a.pdf")).await.unwrap();

        assert_eq!(result.tier, "ocr");
        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_tier_output_taken_as_is() {
        let (bad1, _) = FakeTier::new("native", Ok(Some(("x".into(), Some(3), 1.0))));
        let (bad2, _) = FakeTier::new("ocr", Ok(Some(("y y".into(), Some(3), 0.9))));
        let (vision, _) = FakeTier::new(
            "vision",
            Ok(Some(("short vision transcript".into(), Some(3), 0.85))),
        );

        let pipeline = OcrPipeline::new(vec![bad1, bad2, vision], 0.8);
        let result = pipeline.extract(&PathBuf::from("a.pdf")).await.unwrap();
        assert_eq!(result.tier, "vision");
        assert_eq!(result.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_failing_tiers_are_skipped() {
        let (down, _) = FakeTier::new("native", Err(Error::Extraction("down".into())));
        let (good, _) = FakeTier::new("ocr", Ok(Some((readable_contract_page(), Some(1), 0.9))));

        let pipeline = OcrPipeline::new(vec![down, good], 0.8);
        let result = pipeline.extract(&PathBuf::from("a.pdf")).await.unwrap();
        assert_eq!(result.tier, "ocr");
    }

    #[tokio::test]
    async fn test_all_tiers_empty_is_an_error() {
        let (none1, _) = FakeTier::new("native", Ok(None));
        let (none2, _) = FakeTier::new("ocr", Err(Error::Extraction("down".into())));

        let pipeline = OcrPipeline::new(vec![none1, none2], 0.8);
        let err = pipeline.extract(&PathBuf::from("a.pdf")).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
