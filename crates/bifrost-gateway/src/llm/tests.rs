//! Cross-adapter scenario tests (spec.md §8).

use crate::schema;

use super::openai::{self, ChatAdapter};
use super::Adapter;

#[test]
fn s1_openai_non_stream_round_trip() {
    let native = openai::Request {
        model: Some("gpt-x".to_string()),
        messages: vec![openai::Message {
            role: "user".to_string(),
            content: Some(openai::MessageContent::Text("hi".to_string())),
            ..Default::default()
        }],
        ..Default::default()
    };
    let internal = ChatAdapter::to_internal(native).unwrap();
    assert_eq!(internal.provider, schema::Provider::OpenAI);
    assert_eq!(internal.model, "gpt-x");
    let schema::Input::Chat { messages } = &internal.input else {
        panic!("expected chat input")
    };
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content.as_str(), Some("hi"));

    let upstream = schema::Response {
        id: "r1".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: "gpt-x".to_string(),
        choices: vec![schema::Choice {
            index: 0,
            content: schema::ChoiceContent::Message {
                message: schema::Message::assistant("hello"),
            },
            finish_reason: Some("stop".to_string()),
            stop_string: None,
        }],
        usage: Some(schema::Usage {
            prompt_tokens: Some(1),
            completion_tokens: Some(1),
            total_tokens: Some(2),
            ..Default::default()
        }),
        extra: schema::Extra::default(),
        audio: None,
    };
    let native_resp = ChatAdapter::from_internal(&upstream).unwrap();
    assert_eq!(native_resp.id, "r1");
    let choice = &native_resp.choices[0];
    let message = choice.message.as_ref().unwrap();
    assert_eq!(message.role, "assistant");
    assert_eq!(
        message.content,
        Some(openai::MessageContent::Text("hello".to_string()))
    );
    assert_eq!(native_resp.usage.as_ref().unwrap().total_tokens, 2);
}

#[test]
fn azure_deployment_id_overrides_body_model_unconditionally() {
    let mut native = openai::Request {
        model: Some("gpt-4o".to_string()),
        messages: vec![openai::Message {
            role: "user".to_string(),
            content: Some(openai::MessageContent::Text("hi".to_string())),
            ..Default::default()
        }],
        ..Default::default()
    };
    openai::apply_deployment_id(&mut native, "prod-deployment");
    assert_eq!(native.model.as_deref(), Some("azure/prod-deployment"));

    let internal = super::openai::AzureChatAdapter::to_internal(native).unwrap();
    assert_eq!(internal.provider, schema::Provider::Azure);
    assert_eq!(internal.model, "azure/prod-deployment");
}

#[test]
fn openai_embeddings_round_trip_single_vector() {
    use openai::embeddings::{EmbeddingsAdapter, Request as EmbedRequest};

    let native = EmbedRequest {
        model: Some("text-embedding-3-small".to_string()),
        input: schema::EmbeddingInput::Single("hello world".to_string()),
        ..Default::default()
    };
    let internal = EmbeddingsAdapter::to_internal(native).unwrap();
    assert_eq!(internal.provider, schema::Provider::OpenAI);

    let upstream = schema::Response {
        id: "e1".to_string(),
        object: "list".to_string(),
        created: 0,
        model: "text-embedding-3-small".to_string(),
        choices: vec![schema::Choice {
            index: 0,
            content: schema::ChoiceContent::Embedding {
                embedding: vec![0.1, 0.2, 0.3],
            },
            finish_reason: None,
            stop_string: None,
        }],
        usage: Some(schema::Usage {
            prompt_tokens: Some(3),
            total_tokens: Some(3),
            ..Default::default()
        }),
        extra: schema::Extra::default(),
        audio: None,
    };
    let native_resp = EmbeddingsAdapter::from_internal(&upstream).unwrap();
    assert_eq!(native_resp.data.len(), 1);
    assert_eq!(native_resp.data[0].embedding, vec![0.1, 0.2, 0.3]);
}

#[test]
fn openai_speech_round_trip_carries_raw_audio_bytes() {
    use openai::speech::{Request as SpeechRequest, SpeechAdapter};

    let native = SpeechRequest {
        model: Some("tts-1".to_string()),
        input: "hello there".to_string(),
        voice: "alloy".to_string(),
        response_format: Some("mp3".to_string()),
    };
    let internal = SpeechAdapter::to_internal(native).unwrap();
    assert_eq!(internal.provider, schema::Provider::OpenAI);
    let schema::Input::Speech { input } = &internal.input else {
        panic!("expected speech input")
    };
    assert_eq!(input.text, "hello there");
    assert_eq!(input.voice, "alloy");

    let upstream = schema::Response {
        id: "sp1".to_string(),
        object: "audio.speech".to_string(),
        created: 0,
        model: "tts-1".to_string(),
        choices: vec![],
        usage: None,
        extra: schema::Extra::default(),
        audio: Some(vec![1, 2, 3, 4]),
    };
    let audio = SpeechAdapter::from_internal(&upstream).unwrap();
    assert_eq!(audio, vec![1, 2, 3, 4]);
}

#[test]
fn openai_speech_missing_audio_is_response_parse_error() {
    use openai::speech::SpeechAdapter;

    let upstream = schema::Response {
        id: "sp1".to_string(),
        object: "audio.speech".to_string(),
        created: 0,
        model: "tts-1".to_string(),
        choices: vec![],
        usage: None,
        extra: schema::Extra::default(),
        audio: None,
    };
    assert!(SpeechAdapter::from_internal(&upstream).is_err());
}

#[test]
fn openai_transcription_round_trip_extracts_text_and_duration() {
    use openai::transcription::{Request as TranscriptionRequest, TranscriptionAdapter};

    let native = TranscriptionRequest {
        model: Some("whisper-1".to_string()),
        input: schema::TranscriptionInput {
            file: vec![0, 1, 2],
            filename: "clip.wav".to_string(),
            ..Default::default()
        },
    };
    let internal = TranscriptionAdapter::to_internal(native).unwrap();
    assert_eq!(internal.provider, schema::Provider::OpenAI);
    let schema::Input::Transcription { input } = &internal.input else {
        panic!("expected transcription input")
    };
    assert_eq!(input.filename, "clip.wav");

    let upstream = schema::Response {
        id: "tr1".to_string(),
        object: "audio.transcription".to_string(),
        created: 0,
        model: "whisper-1".to_string(),
        choices: vec![schema::Choice {
            index: 0,
            content: schema::ChoiceContent::Message {
                message: schema::Message::assistant("hello world"),
            },
            finish_reason: None,
            stop_string: None,
        }],
        usage: Some(schema::Usage {
            audio_seconds: Some(4.2),
            ..Default::default()
        }),
        extra: schema::Extra::default(),
        audio: None,
    };
    let native_resp = TranscriptionAdapter::from_internal(&upstream).unwrap();
    assert_eq!(native_resp.text, "hello world");
    assert_eq!(native_resp.duration, Some(4.2));
}
