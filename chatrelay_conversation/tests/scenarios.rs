//! End-to-end conversation scenarios against in-memory collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use chatrelay_conversation::{
    Collaborators, ConversationError, Orchestrator, OrchestratorConfig, SessionDefaults,
    SystemPrompt, TimerState, TurnKind,
};
use chatrelay_core::{
    ChatMessage, CompletionParams, CompletionProvider, Contact, ContactRegistry, ImageGenerator,
    InboundMessage, LLMResponse, Media, OutboundMessenger, Role, SenderLimits, Transcriber,
};

/// Replies from a script, then echoes; counts every call.
#[derive(Default)]
struct CountingCompletion {
    calls: AtomicUsize,
    script: Mutex<VecDeque<String>>,
    models: Vec<String>,
    fail: bool,
}

impl CountingCompletion {
    fn scripted(replies: &[&str]) -> Self {
        Self {
            script: Mutex::new(replies.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for CountingCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> anyhow::Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("upstream unavailable");
        }
        let scripted = self.script.lock().unwrap().pop_front();
        let content = scripted.unwrap_or_else(|| {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            format!("echo: {last}")
        });
        Ok(LLMResponse {
            content,
            usage: None,
        })
    }

    async fn available_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.models.clone())
    }
}

#[derive(Default)]
struct RecordingImages {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageGenerator for RecordingImages {
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<String> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        Ok(format!("https://img.test/{}.png", prompts.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sent {
    text: Option<String>,
    recipient: String,
    media_url: Option<String>,
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingMessenger {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundMessenger for RecordingMessenger {
    async fn send(
        &self,
        text: Option<&str>,
        recipient: &str,
        media_url: Option<&str>,
    ) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("provider down");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(Sent {
            text: text.map(ToString::to_string),
            recipient: recipient.to_string(),
            media_url: media_url.map(ToString::to_string),
        });
        Ok(format!("SM{}", sent.len()))
    }
}

struct FixedTranscriber(Option<&'static str>);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(
        &self,
        _media_url: &str,
        _language_hint: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        match self.0 {
            Some(text) => Ok(Some(text.to_string())),
            None => anyhow::bail!("transcription service timed out"),
        }
    }
}

#[derive(Default)]
struct Contacts(HashMap<String, Contact>);

impl Contacts {
    fn with(contact: Contact) -> Self {
        Self(HashMap::from([(contact.phone_number.clone(), contact)]))
    }
}

impl ContactRegistry for Contacts {
    fn lookup(&self, sender_id: &str) -> Option<Contact> {
        self.0.get(sender_id).cloned()
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    completion: Arc<CountingCompletion>,
    images: Arc<RecordingImages>,
    messenger: Arc<RecordingMessenger>,
}

struct HarnessBuilder {
    completion: CountingCompletion,
    messenger: RecordingMessenger,
    transcriber: Option<FixedTranscriber>,
    contacts: Contacts,
    config: OrchestratorConfig,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            completion: CountingCompletion::default(),
            messenger: RecordingMessenger::default(),
            transcriber: None,
            contacts: Contacts::default(),
            config: OrchestratorConfig {
                defaults: SessionDefaults {
                    system_prompt: SystemPrompt::Template("You are chatting with {user}.".into()),
                    ..SessionDefaults::default()
                },
                ..OrchestratorConfig::default()
            },
        }
    }

    fn completion(mut self, completion: CountingCompletion) -> Self {
        self.completion = completion;
        self
    }

    fn messenger(mut self, messenger: RecordingMessenger) -> Self {
        self.messenger = messenger;
        self
    }

    fn transcriber(mut self, transcriber: FixedTranscriber) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    fn contacts(mut self, contacts: Contacts) -> Self {
        self.contacts = contacts;
        self
    }

    fn limits(mut self, limits: SenderLimits) -> Self {
        self.config.defaults.limits = limits;
        self
    }

    fn expire_after(mut self, interval: Duration) -> Self {
        self.config.expire_after = interval;
        self
    }

    fn build(self) -> Harness {
        let completion = Arc::new(self.completion);
        let images = Arc::new(RecordingImages::default());
        let messenger = Arc::new(self.messenger);
        let collab = Collaborators {
            completion: completion.clone(),
            images: images.clone(),
            transcriber: self
                .transcriber
                .map(|t| Arc::new(t) as Arc<dyn Transcriber>),
            messenger: messenger.clone(),
            contacts: Arc::new(self.contacts),
        };
        let (orchestrator, expired) = Orchestrator::new(collab, self.config).unwrap();
        let orchestrator = Arc::new(orchestrator);
        orchestrator.spawn_expiry_loop(expired);
        Harness {
            orchestrator,
            completion,
            images,
            messenger,
        }
    }
}

fn from_ana(text: &str) -> InboundMessage {
    InboundMessage::text("+15550001", text).with_name("Ana")
}

#[tokio::test]
async fn third_message_hits_the_message_limit() {
    let h = HarnessBuilder::new()
        .limits(SenderLimits {
            max_messages: Some(2),
            ..SenderLimits::default()
        })
        .build();

    let first = h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    let second = h.orchestrator.handle(&from_ana("how are you")).await.unwrap();
    assert_eq!(first.kind, TurnKind::Completion);
    assert_eq!(second.reply, "echo: how are you");

    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    assert_eq!(handle.lock().await.message_count(), 2);

    let third = h.orchestrator.handle(&from_ana("one more")).await.unwrap();
    assert_eq!(third.kind, TurnKind::LimitReached);
    assert_eq!(
        third.reply,
        "Sorry, you have reached your maximum number of messages for this conversation."
    );
    assert_eq!(h.completion.calls(), 2);
}

#[tokio::test]
async fn contact_limits_override_defaults() {
    let contact = Contact {
        phone_number: "+15550001".to_string(),
        name: Some("Ana María".to_string()),
        max_messages: Some(1),
        ..Contact::default()
    };
    let h = HarnessBuilder::new().contacts(Contacts::with(contact)).build();

    h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    let refused = h.orchestrator.handle(&from_ana("again")).await.unwrap();
    assert_eq!(refused.kind, TurnKind::LimitReached);

    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    let session = handle.lock().await;
    assert_eq!(session.sender().name, "Ana María");
    assert_eq!(
        session.system_message().unwrap().content,
        "You are chatting with Ana María."
    );
}

#[tokio::test]
async fn bye_restarts_the_session_and_says_goodbye() {
    let h = HarnessBuilder::new().build();
    h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    assert_eq!(handle.lock().await.messages().len(), 3);

    let outcome = h.orchestrator.handle(&from_ana("  Bye ")).await.unwrap();

    assert_eq!(outcome.kind, TurnKind::Ended);
    assert_eq!(outcome.reply, "Goodbye Ana! I'll be here if you need me.");
    let messages = handle.lock().await.messages().to_vec();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert!(h.orchestrator.sessions().get("+15550001").await.is_none());
    assert_eq!(h.orchestrator.timers().state("+15550001"), TimerState::Idle);
    assert!(h.orchestrator.timers().is_empty());
    assert_eq!(h.completion.calls(), 1);
}

#[tokio::test]
async fn end_phrase_must_be_the_whole_message() {
    let h = HarnessBuilder::new().build();
    let outcome = h
        .orchestrator
        .handle(&from_ana("I have to say bye now"))
        .await
        .unwrap();
    assert_eq!(outcome.kind, TurnKind::Completion);
    assert_eq!(h.completion.calls(), 1);
}

#[tokio::test]
async fn parameter_change_sets_numeric_temperature() {
    let h = HarnessBuilder::new().build();
    let outcome = h
        .orchestrator
        .handle(&from_ana("set temperature to 0.5."))
        .await
        .unwrap();

    assert_eq!(outcome.kind, TurnKind::Command);
    assert_eq!(outcome.reply, "[parameter changed correctly]");
    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    assert_eq!(handle.lock().await.params.get("temperature"), Some(json!(0.5)));
    assert_eq!(h.completion.calls(), 0);
}

#[tokio::test]
async fn length_synonym_maps_to_max_tokens() {
    let h = HarnessBuilder::new().build();
    h.orchestrator
        .handle(&from_ana("change length to 200."))
        .await
        .unwrap();

    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    let session = handle.lock().await;
    assert_eq!(session.params.max_tokens, 200);
    assert_eq!(session.params.get("max_tokens"), Some(json!(200)));
}

#[tokio::test]
async fn wrongly_typed_parameter_is_rejected() {
    let h = HarnessBuilder::new().build();
    let outcome = h
        .orchestrator
        .handle(&from_ana("set temperature to warm."))
        .await
        .unwrap();
    assert_eq!(outcome.reply, "[could not set parameter temperature]");
    assert_eq!(h.completion.calls(), 0);
}

#[tokio::test]
async fn model_switch_requires_a_known_model() {
    let completion = CountingCompletion {
        models: vec!["gpt-3.5-turbo".to_string(), "gpt-4".to_string()],
        ..CountingCompletion::default()
    };
    let h = HarnessBuilder::new().completion(completion).build();

    let switched = h
        .orchestrator
        .handle(&from_ana("I want to speak with GPT-4 please"))
        .await
        .unwrap();
    assert_eq!(switched.reply, "[you are now speaking with gpt-4]");
    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    {
        let session = handle.lock().await;
        assert_eq!(session.params.model, "gpt-4");
        let tail: Vec<_> = session.messages()[1..]
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            tail,
            [
                (Role::User, "I want to speak with GPT-4 please"),
                (Role::Assistant, "[you are now speaking with gpt-4]"),
            ]
        );
        assert_eq!(session.message_count(), 0);
    }

    let unknown = h
        .orchestrator
        .handle(&from_ana("let me speak with hal9000"))
        .await
        .unwrap();
    assert_eq!(unknown.kind, TurnKind::Completion);
    assert_eq!(h.completion.calls(), 1);
}

#[tokio::test]
async fn image_directive_is_stripped_and_generated_in_background() {
    let completion = CountingCompletion::scripted(&["Here you go! [img: \"a red fox\"]"]);
    let h = HarnessBuilder::new().completion(completion).build();

    let outcome = h
        .orchestrator
        .handle(&from_ana("draw me a fox"))
        .await
        .unwrap();
    assert_eq!(outcome.reply, "Here you go!");
    assert_eq!(outcome.image_prompt.as_deref(), Some("a red fox"));
    assert!(outcome.image_dispatched);

    h.orchestrator.drain_background().await;
    assert_eq!(*h.images.prompts.lock().unwrap(), vec!["a red fox".to_string()]);
    assert_eq!(
        h.messenger.sent(),
        vec![Sent {
            text: Some("a red fox".to_string()),
            recipient: "+15550001".to_string(),
            media_url: Some("https://img.test/1.png".to_string()),
        }]
    );

    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    let session = handle.lock().await;
    assert_eq!(session.images_generated(), 1);
    assert_eq!(session.messages().last().unwrap().content, "Here you go!");
}

#[tokio::test]
async fn images_past_the_limit_are_never_generated() {
    let completion = CountingCompletion::scripted(&[
        "One [img: \"first\"]",
        "Two [IMG:   \"second\"]",
        "Three [img: \"third\"]",
    ]);
    let h = HarnessBuilder::new()
        .completion(completion)
        .limits(SenderLimits {
            max_image_generations: 1,
            ..SenderLimits::default()
        })
        .build();

    for text in ["a", "b", "c"] {
        h.orchestrator.handle(&from_ana(text)).await.unwrap();
    }
    h.orchestrator.drain_background().await;

    assert_eq!(*h.images.prompts.lock().unwrap(), vec!["first".to_string()]);
    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();
    let session = handle.lock().await;
    let notes = session
        .messages()
        .iter()
        .skip(1)
        .filter(|m| m.role == Role::System)
        .count();
    assert_eq!(notes, 2);
    assert_eq!(session.images_generated(), 1);
}

#[tokio::test]
async fn captioning_off_sends_images_without_caption() {
    let completion = CountingCompletion::scripted(&["Sure [img: \"a boat\"]"]);
    let h = HarnessBuilder::new().completion(completion).build();

    let toggled = h
        .orchestrator
        .handle(&from_ana("[captioning: OFF]"))
        .await
        .unwrap();
    assert_eq!(toggled.reply, "Image captioning is now off");

    h.orchestrator.handle(&from_ana("a boat please")).await.unwrap();
    h.orchestrator.drain_background().await;
    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, None);
}

#[tokio::test]
async fn audio_is_transcribed_before_processing() {
    let h = HarnessBuilder::new()
        .transcriber(FixedTranscriber(Some("what time is it")))
        .build();
    let voice = InboundMessage {
        body: None,
        sender_id: "+15550001".to_string(),
        sender_name: Some("Ana".to_string()),
        media: Some(Media {
            url: "https://media.test/voice.ogg".to_string(),
            content_type: "audio/ogg".to_string(),
        }),
    };

    let outcome = h.orchestrator.handle(&voice).await.unwrap();
    assert_eq!(outcome.reply, "echo: what time is it");
}

#[tokio::test]
async fn failed_transcription_is_not_understood() {
    let h = HarnessBuilder::new().transcriber(FixedTranscriber(None)).build();
    let voice = InboundMessage::text("+15550001", "").with_media(Media {
        url: "https://media.test/voice.ogg".to_string(),
        content_type: "audio/ogg".to_string(),
    });

    let outcome = h.orchestrator.handle(&voice).await.unwrap();
    assert_eq!(outcome.kind, TurnKind::NotUnderstood);
    assert_eq!(outcome.reply, "Sorry, I didn't understand that. Please try again.");
    assert_eq!(h.completion.calls(), 0);
}

#[tokio::test]
async fn completion_failure_is_surfaced() {
    let completion = CountingCompletion {
        fail: true,
        ..CountingCompletion::default()
    };
    let h = HarnessBuilder::new().completion(completion).build();
    let err = h.orchestrator.handle(&from_ana("hello")).await.unwrap_err();
    assert!(matches!(err, ConversationError::Completion(_)));
}

#[tokio::test]
async fn reset_drops_the_session() {
    let h = HarnessBuilder::new().build();
    h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    assert!(h.orchestrator.reset("+15550001").await);
    assert!(h.orchestrator.sessions().is_empty().await);
    assert!(h.orchestrator.timers().is_empty());
    assert!(!h.orchestrator.reset("+15550001").await);
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_exactly_once() {
    let h = HarnessBuilder::new()
        .expire_after(Duration::from_secs(1))
        .build();
    h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    let handle = h.orchestrator.sessions().get("+15550001").await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let notice = "It's been a while since our last conversation. I've forgotten all about it already.";
    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text.as_deref(), Some(notice));
    assert_eq!(handle.lock().await.messages().len(), 1);
    assert!(h.orchestrator.sessions().get("+15550001").await.is_none());
    assert_eq!(h.orchestrator.timers().state("+15550001"), TimerState::Idle);
    assert!(h.orchestrator.timers().is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.messenger.sent().len(), 1);

    h.orchestrator.handle(&from_ana("I'm back")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.messenger.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_expiry_callback_cancels_the_timer() {
    let messenger = RecordingMessenger {
        fail: true,
        ..RecordingMessenger::default()
    };
    let h = HarnessBuilder::new()
        .messenger(messenger)
        .expire_after(Duration::from_secs(1))
        .build();
    h.orchestrator.handle(&from_ana("hello")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.orchestrator.timers().state("+15550001"), TimerState::Idle);

    // The loop survives and keeps serving other senders.
    h.orchestrator
        .handle(&InboundMessage::text("+15550002", "hi"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.orchestrator.timers().state("+15550002"), TimerState::Idle);
    assert!(h.orchestrator.timers().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_timers() {
    let h = HarnessBuilder::new().build();
    h.orchestrator.handle(&from_ana("hello")).await.unwrap();
    h.orchestrator.shutdown();
    assert_eq!(h.orchestrator.timers().state("+15550001"), TimerState::Cancelled);
}
