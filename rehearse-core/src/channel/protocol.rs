//! Wire messages of the Live bidirectional endpoint.

use serde::{Deserialize, Serialize};

use crate::{channel::ChannelEvent, codec::TransportPayload, setup::SessionSetup};

// ── Client → server ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

/// Serializes as `{}`; presence alone enables transcription.
#[derive(Debug, Default, Serialize)]
struct TranscriptionConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RealtimeInput {
    media_chunks: Vec<TransportPayload>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<TransportPayload>,
}

impl ClientMessage {
    pub(crate) fn setup(setup: &SessionSetup) -> Self {
        let transcription = setup.transcribe.then(TranscriptionConfig::default);
        ClientMessage::Setup(Setup {
            model: qualified_model(&setup.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(setup.instruction.clone()),
                    inline_data: None,
                }],
            },
            input_audio_transcription: transcription.as_ref().map(|_| TranscriptionConfig {}),
            output_audio_transcription: transcription,
        })
    }

    pub(crate) fn audio(payload: TransportPayload) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![payload],
        })
    }
}

/// The endpoint expects `models/<name>`.
fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// ── Server → client ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    output_transcription: Option<Transcription>,
    #[serde(default)]
    input_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub(crate) fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub(crate) fn go_away(&self) -> Option<&GoAway> {
        self.go_away.as_ref()
    }

    pub(crate) fn turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    /// Split one server message into channel events, in the order
    /// respondent text, caller text, audio, interruption.
    pub(crate) fn into_events(self) -> Vec<ChannelEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };
        let mut events = Vec::new();

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(ChannelEvent::RespondentText(text));
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(ChannelEvent::CallerText(text));
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|d| !d.data.is_empty())
                    .map(ChannelEvent::Audio),
            );
        }
        if content.interrupted {
            events.push(ChannelEvent::Interrupted);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{InterviewBrief, Language};
    use serde_json::json;

    #[test]
    fn setup_message_shape() {
        let brief = InterviewBrief {
            candidate_context: "cv".into(),
            job_context: "jd".into(),
            language: Language::En,
        };
        let setup = SessionSetup::for_interview(&brief, "gemini-live", "Kore");
        let value = serde_json::to_value(ClientMessage::setup(&setup)).unwrap();

        let body = &value["setup"];
        assert_eq!(body["model"], "models/gemini-live");
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("English"));
        assert_eq!(body["inputAudioTranscription"], json!({}));
        assert_eq!(body["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn setup_without_transcription_omits_the_fields() {
        let mut setup = SessionSetup::for_interview(&InterviewBrief::default(), "m", "Kore");
        setup.transcribe = false;
        let value = serde_json::to_value(ClientMessage::setup(&setup)).unwrap();
        assert!(value["setup"].get("inputAudioTranscription").is_none());
    }

    #[test]
    fn audio_message_shape() {
        let payload = TransportPayload::new("AAA=".into(), "audio/pcm;rate=16000".into());
        let value = serde_json::to_value(ClientMessage::audio(payload)).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"data": "AAA=", "mimeType": "audio/pcm;rate=16000"}]}})
        );
    }

    #[test]
    fn server_content_fans_out_in_fixed_order() {
        let raw = json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}]},
                "inputTranscription": {"text": "I think"},
                "outputTranscription": {"text": "Go on"}
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let events = msg.into_events();

        assert_eq!(
            events,
            vec![
                ChannelEvent::RespondentText("Go on".into()),
                ChannelEvent::CallerText("I think".into()),
                ChannelEvent::Audio(TransportPayload::new(
                    "AAA=".into(),
                    "audio/pcm;rate=24000".into()
                )),
                ChannelEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn setup_complete_and_unknown_fields() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"setupComplete":{},"usageMetadata":{"totalTokenCount":3}}"#)
                .unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());

        let go: ServerMessage = serde_json::from_str(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(go.go_away().and_then(|g| g.time_left.as_deref()), Some("10s"));
    }
}
