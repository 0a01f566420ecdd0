// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Offline speech recognition over the RIVA gRPC API.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{InferenceContext, InferenceHandler, uploaded_audio};
use crate::error::{GatewayError, GatewayResult};
use crate::grpc::riva_asr::riva_speech_recognition_client::RivaSpeechRecognitionClient;
use crate::grpc::riva_asr::{AudioEncoding, RecognitionConfig, RecognizeRequest, RecognizeResponse};
use crate::grpc::{GrpcError, GrpcTarget, RIVA_ASR_FUNCTION_ID, RIVA_ASR_PORT};
use crate::ledger::InferenceRecord;

pub struct SpeechRecognition;

#[async_trait]
impl InferenceHandler for SpeechRecognition {
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value> {
        let audio_path = uploaded_audio(ctx, payload, &ctx.state.media().asr_upload_dir()).await?;
        let audio = tokio::fs::read(&audio_path)
            .await
            .map_err(|err| GatewayError::internal(format!("Failed to read audio file: {err}")))?;
        inspect_wav(&audio);

        let target = match ctx.api_key().await? {
            Some(key) => GrpcTarget::cloud(RIVA_ASR_FUNCTION_ID, key),
            None => GrpcTarget::local(&ctx.nim.config.host, RIVA_ASR_PORT),
        };
        tracing::info!(
            nim_id = %ctx.nim_id(),
            request_id = %record.request_id,
            url = %target.url,
            bytes = audio.len(),
            "recognizing speech"
        );

        match recognize(&target, audio).await {
            Ok(response) => {
                let output = transcript(&response);
                ctx.state.ledger().complete(record, &output).await?;
                Ok(output)
            }
            Err(err) => {
                tracing::error!(nim_id = %ctx.nim_id(), request_id = %record.request_id, %err, "ASR inference failed");
                let detail = format!("ASR inference failed: {}", err.details());
                Err(ctx
                    .fail(record, err.ledger_error(), GatewayError::Upstream(detail))
                    .await)
            }
        }
    }
}

fn recognition_config() -> RecognitionConfig {
    RecognitionConfig {
        encoding: AudioEncoding::EncodingUnspecified as i32,
        language_code: "en-US".to_string(),
        max_alternatives: 1,
        profanity_filter: false,
        enable_word_time_offsets: true,
        enable_automatic_punctuation: true,
        verbatim_transcripts: true,
        ..Default::default()
    }
}

async fn recognize(target: &GrpcTarget, audio: Vec<u8>) -> Result<RecognizeResponse, GrpcError> {
    let channel = target.connect().await?;
    let mut client = RivaSpeechRecognitionClient::new(channel);
    let request = target.request(RecognizeRequest {
        config: Some(recognition_config()),
        audio,
        id: None,
    })?;
    Ok(client.recognize(request).await?.into_inner())
}

/// `{text, words, confidence}` from the first alternative of each result
fn transcript(response: &RecognizeResponse) -> Value {
    let mut text = String::new();
    let mut words = Vec::new();
    let mut confidence = 0.0f32;

    for alternative in response.results.iter().filter_map(|r| r.alternatives.first()) {
        text.push_str(&alternative.transcript);
        confidence = alternative.confidence;
        words.extend(alternative.words.iter().map(|w| {
            json!({
                "word": w.word,
                "start_time": w.start_time,
                "end_time": w.end_time,
                "confidence": w.confidence,
            })
        }));
    }
    if response.results.is_empty() {
        tracing::warn!("no results in RIVA response");
    }
    json!({"text": text, "words": words, "confidence": confidence})
}

/// Logs the WAV header fields RIVA cares about
fn inspect_wav(audio: &[u8]) {
    if audio.len() < 44 || &audio[0..4] != b"RIFF" || &audio[8..12] != b"WAVE" {
        tracing::warn!("audio file does not appear to be a valid WAV file");
        return;
    }
    let channels = u16::from_le_bytes([audio[22], audio[23]]);
    let sample_rate = u32::from_le_bytes([audio[24], audio[25], audio[26], audio[27]]);
    let bits = u16::from_le_bytes([audio[34], audio[35]]);
    if bits != 16 || channels != 1 {
        tracing::warn!(bits, channels, "audio format may not be optimal for RIVA, expected 16-bit mono");
    } else {
        tracing::debug!(sample_rate, "audio is 16-bit mono");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::riva_asr::{SpeechRecognitionAlternative, SpeechRecognitionResult, WordInfo};

    fn alternative(transcript: &str, confidence: f32, words: Vec<WordInfo>) -> SpeechRecognitionAlternative {
        SpeechRecognitionAlternative {
            transcript: transcript.to_string(),
            confidence,
            words,
            ..Default::default()
        }
    }

    #[test]
    fn test_transcript_joins_first_alternatives() {
        let response = RecognizeResponse {
            results: vec![
                SpeechRecognitionResult {
                    alternatives: vec![
                        alternative(
                            "Hello there. ",
                            0.5,
                            vec![WordInfo {
                                start_time: 0,
                                end_time: 400,
                                word: "Hello".into(),
                                confidence: 0.75,
                                speaker_tag: 0,
                            }],
                        ),
                        alternative("Ignored", 0.1, vec![]),
                    ],
                    ..Default::default()
                },
                SpeechRecognitionResult::default(),
                SpeechRecognitionResult {
                    alternatives: vec![alternative("General Kenobi.", 0.25, vec![])],
                    ..Default::default()
                },
            ],
            id: None,
        };
        let output = transcript(&response);
        assert_eq!(output["text"], "Hello there. General Kenobi.");
        assert_eq!(output["confidence"], 0.25);
        assert_eq!(
            output["words"],
            json!([{"word": "Hello", "start_time": 0, "end_time": 400, "confidence": 0.75}])
        );
    }

    #[test]
    fn test_empty_response() {
        let output = transcript(&RecognizeResponse::default());
        assert_eq!(output, json!({"text": "", "words": [], "confidence": 0.0}));
    }

    #[test]
    fn test_recognition_config() {
        let config = recognition_config();
        assert_eq!(config.language_code, "en-US");
        assert_eq!(config.max_alternatives, 1);
        assert!(config.enable_automatic_punctuation);
        assert!(config.enable_word_time_offsets);
        assert!(config.verbatim_transcripts);
        assert!(!config.profanity_filter);
    }
}
