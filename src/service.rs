//! Request gateway: quota admission, upstream calls, and per-call spending records.

use crate::error::GatewayError;
use crate::ledger::today_utc;
use crate::models::{CostDelta, UsageBatch, VoiceTier};
use crate::quota::{Admission, QuotaGate};
use crate::recorder::SpendingRecorder;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VoiceGender {
    #[default]
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    pub original: String,
    pub translated: String,
}

#[derive(Debug, Clone, Default)]
pub struct SentenceRequest {
    pub word: String,
    pub word_language: String,
    pub translation_language: String,
    pub translation_hint: String,
    pub include_audio: bool,
    pub voice_gender: VoiceGender,
}

#[derive(Debug, Clone)]
pub struct SentenceResponse {
    pub original_sentence: String,
    pub translated_sentence: String,
    pub audio: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    pub word: String,
    pub from_language: String,
    pub to_language: String,
    pub translation_hint: String,
    pub include_audio: bool,
    pub voice_gender: VoiceGender,
}

#[derive(Debug, Clone)]
pub struct TranslateResponse {
    pub translation: String,
    pub audio: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct DefinitionRequest {
    pub word: String,
    pub language: String,
    pub definition_hint: String,
    pub include_audio: bool,
    pub voice_gender: VoiceGender,
}

#[derive(Debug, Clone)]
pub struct DefinitionResponse {
    pub definition: String,
    pub audio: Option<Vec<u8>>,
}

/// Generative text backend. Every successful call reports the units it consumed.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate_sentence(
        &self,
        req: &SentenceRequest,
    ) -> Result<(SentencePair, TokenUsage), GatewayError>;

    async fn translate(&self, req: &TranslateRequest) -> Result<(String, TokenUsage), GatewayError>;

    async fn define(&self, req: &DefinitionRequest) -> Result<(String, TokenUsage), GatewayError>;
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no voice matches the requested language and gender")]
    NoSuchVoice,

    #[error("speech synthesis failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        gender: VoiceGender,
        tier: VoiceTier,
    ) -> Result<Vec<u8>, SynthesisError>;
}

pub struct GatewayService {
    model: Arc<dyn TextModel>,
    speech: Arc<dyn SpeechSynthesizer>,
    gate: QuotaGate,
    recorder: SpendingRecorder,
    voice_tier: VoiceTier,
    today: fn() -> NaiveDate,
}

impl GatewayService {
    pub fn new(
        model: Arc<dyn TextModel>,
        speech: Arc<dyn SpeechSynthesizer>,
        gate: QuotaGate,
        recorder: SpendingRecorder,
        voice_tier: VoiceTier,
    ) -> Self {
        Self {
            model,
            speech,
            gate,
            recorder,
            voice_tier,
            today: today_utc,
        }
    }

    /// Replaces the clock used to pick the daily bucket.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Runs the quota gate once for an inbound request.
    pub async fn admit(&self) -> Result<(), GatewayError> {
        match self
            .gate
            .check((self.today)())
            .await
            .map_err(GatewayError::Admission)?
        {
            Admission::Admitted { .. } => Ok(()),
            Admission::OverQuota {
                spent_micros,
                quota_micros,
            } => Err(GatewayError::QuotaExceeded {
                spent_micros,
                quota_micros,
            }),
        }
    }

    #[instrument(skip(self, req), fields(word = %req.word, audio = req.include_audio))]
    pub async fn generate_sentence(
        &self,
        req: &SentenceRequest,
    ) -> Result<SentenceResponse, GatewayError> {
        self.admit().await?;

        let (pair, tokens) = self.model.generate_sentence(req).await?;
        self.record_model(tokens).await?;

        let audio = if req.include_audio {
            self.speak(&pair.original, &req.word_language, req.voice_gender, false)
                .await?
        } else {
            None
        };

        Ok(SentenceResponse {
            original_sentence: pair.original,
            translated_sentence: pair.translated,
            audio,
        })
    }

    #[instrument(skip(self, req), fields(word = %req.word, audio = req.include_audio))]
    pub async fn translate(
        &self,
        req: &TranslateRequest,
    ) -> Result<TranslateResponse, GatewayError> {
        self.admit().await?;

        let (translation, tokens) = self.model.translate(req).await?;
        self.record_model(tokens).await?;

        let audio = if req.include_audio {
            self.speak(&req.word, &req.from_language, req.voice_gender, false)
                .await?
        } else {
            None
        };

        Ok(TranslateResponse { translation, audio })
    }

    #[instrument(skip(self, req), fields(word = %req.word, audio = req.include_audio))]
    pub async fn generate_definition(
        &self,
        req: &DefinitionRequest,
    ) -> Result<DefinitionResponse, GatewayError> {
        self.admit().await?;

        let (definition, tokens) = self.model.define(req).await?;
        self.record_model(tokens).await?;

        let audio = if req.include_audio {
            self.speak(&req.word, &req.language, req.voice_gender, true)
                .await?
        } else {
            None
        };

        Ok(DefinitionResponse { definition, audio })
    }

    async fn record_model(&self, tokens: TokenUsage) -> Result<CostDelta, GatewayError> {
        self.recorder
            .record(
                (self.today)(),
                &UsageBatch::model(tokens.input_units, tokens.output_units),
            )
            .await
            .map_err(GatewayError::Billing)
    }

    /// Synthesizes `text` and records its characters only once audio was produced.
    async fn speak(
        &self,
        text: &str,
        language: &str,
        gender: VoiceGender,
        missing_voice_ok: bool,
    ) -> Result<Option<Vec<u8>>, GatewayError> {
        let audio = match self
            .speech
            .synthesize(text, language, gender, self.voice_tier)
            .await
        {
            Ok(audio) => audio,
            Err(SynthesisError::NoSuchVoice) if missing_voice_ok => {
                info!(%language, "no matching voice, returning text only");
                return Ok(None);
            }
            Err(e) => return Err(GatewayError::Upstream(e.to_string())),
        };

        let characters = text.chars().count() as u64;
        self.recorder
            .record(
                (self.today)(),
                &UsageBatch::speech(self.voice_tier, characters),
            )
            .await
            .map_err(GatewayError::Billing)?;
        Ok(Some(audio))
    }
}
