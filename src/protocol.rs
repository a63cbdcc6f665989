//! JSON frames of the realtime endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::TransportChunk;

// ------------------------- client → server -------------------------

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input: Option<RealtimeInput>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Session setup: audio responses, one prebuilt voice, a system instruction.
    pub fn setup(model: &str, voice: &str, system_instruction: &str) -> Self {
        let system_instruction = if system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                    inline_data: None,
                }],
            })
        };
        Self {
            setup: Some(Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoice {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction,
            }),
            realtime_input: None,
        }
    }

    pub fn audio(chunk: TransportChunk) -> Self {
        Self {
            setup: None,
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: chunk.mime_type,
                    data: chunk.data,
                }],
            }),
        }
    }
}

// ------------------------- server → client -------------------------

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.turn_complete)
            .unwrap_or(false)
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|t| t.parts.iter())
    }

    /// Inline audio payloads, in the order they appear.
    pub fn audio_payloads(&self) -> Vec<&InlineData> {
        self.parts()
            .filter_map(|p| p.inline_data.as_ref())
            .filter(|d| d.mime_type.as_deref().is_none_or(|m| m.starts_with("audio/")))
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }
}

impl InlineData {
    /// `rate=` parameter of the mime type, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .as_deref()?
            .split(';')
            .filter_map(|p| p.trim().strip_prefix("rate="))
            .find_map(|r| r.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_frame_shape() {
        let msg = ClientMessage::setup("models/live", "Puck", "be brief");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["setup"]["model"], "models/live");
        assert_eq!(value["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(value["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(value.get("realtimeInput").is_none());
    }

    #[test]
    fn audio_frame_shape() {
        let msg = ClientMessage::audio(TransportChunk::pcm("AAAA".into(), 16000));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn parses_audio_and_interrupt_together() {
        let raw = r#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
            {"text":"hi"},
            {"inlineData":{"mimeType":"image/png","data":"xx"}}]}}}"#;
        let msg = ServerMessage::parse(raw).unwrap();
        assert!(msg.is_interrupted());
        assert!(!msg.is_turn_complete());
        let audio = msg.audio_payloads();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].sample_rate(), Some(24000));
        assert_eq!(msg.texts(), vec!["hi"]);
    }

    #[test]
    fn setup_complete_and_unknown_fields() {
        let msg = ServerMessage::parse(r#"{"setupComplete":{},"somethingNew":1}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.audio_payloads().is_empty());
        assert!(!msg.is_interrupted());
    }

    #[test]
    fn go_away_is_parsed() {
        let msg = ServerMessage::parse(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left.as_deref(), Some("10s"));
    }
}
