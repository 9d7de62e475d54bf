//! Per-message control flow.
//!
//! The orchestrator owns the session store, the command parser and the
//! expiry scheduler, and talks to the outside world only through the
//! collaborator traits from `chatrelay_core`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chatrelay_core::{
    CompletionProvider, ContactRegistry, ImageGenerator, InboundMessage, MediaKind,
    OutboundMessenger, Role, Sender, Transcriber, scrub_url,
};

use crate::commands::{Command, CommandParser, END_CONVERSATION_PHRASES, ParsedCommand};
use crate::session::SessionDefaults;
use crate::store::{SessionHandle, SessionStore, SessionUpdate};
use crate::timer::{ExpiryScheduler, SessionExpired};

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Completion provider error: {0}")]
    Completion(#[from] anyhow::Error),

    #[error("Empty response from completion provider")]
    EmptyResponse,

    #[error("Invalid command pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub completion: Arc<dyn CompletionProvider>,
    pub images: Arc<dyn ImageGenerator>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub messenger: Arc<dyn OutboundMessenger>,
    pub contacts: Arc<dyn ContactRegistry>,
}

/// Fixed user-facing texts.
#[derive(Debug, Clone)]
pub struct CannedReplies {
    pub limit_reached: String,
    pub not_understood: String,
    pub expired: String,
    /// `{model}` is replaced.
    pub model_switched: String,
    pub parameter_changed: String,
    /// `{name}` is replaced.
    pub parameter_rejected: String,
    pub captioning_on: String,
    pub captioning_off: String,
    pub captioning_unknown: String,
    /// System note appended when an image is requested past the limit.
    pub images_disabled: String,
}

impl Default for CannedReplies {
    fn default() -> Self {
        Self {
            limit_reached:
                "Sorry, you have reached your maximum number of messages for this conversation."
                    .to_string(),
            not_understood: "Sorry, I didn't understand that. Please try again.".to_string(),
            expired: "It's been a while since our last conversation. I've forgotten all about it already."
                .to_string(),
            model_switched: "[you are now speaking with {model}]".to_string(),
            parameter_changed: "[parameter changed correctly]".to_string(),
            parameter_rejected: "[could not set parameter {name}]".to_string(),
            captioning_on: "Image captioning is now on".to_string(),
            captioning_off: "Image captioning is now off".to_string(),
            captioning_unknown: "Sorry, I didn't understand that.".to_string(),
            images_disabled: "This user has surpassed their maximum number of images generated. \
                              Images will no longer be sent."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub defaults: SessionDefaults,
    pub replies: CannedReplies,
    pub expire_after: Duration,
    pub end_phrases: Vec<String>,
    /// Overrides the provider's model list when set.
    pub available_models: Option<Vec<String>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            defaults: SessionDefaults::default(),
            replies: CannedReplies::default(),
            expire_after: Duration::from_secs(3 * 60 * 60),
            end_phrases: END_CONVERSATION_PHRASES
                .iter()
                .map(ToString::to_string)
                .collect(),
            available_models: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Completion,
    Command,
    Ended,
    LimitReached,
    NotUnderstood,
}

/// What the shell should deliver for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    pub kind: TurnKind,
    /// Prompt extracted from the reply's image directive, if any.
    pub image_prompt: Option<String>,
    /// Whether a background image task was started for `image_prompt`.
    pub image_dispatched: bool,
}

impl TurnOutcome {
    fn canned(reply: impl Into<String>, kind: TurnKind) -> Self {
        Self {
            reply: reply.into(),
            kind,
            image_prompt: None,
            image_dispatched: false,
        }
    }
}

pub struct Orchestrator {
    store: SessionStore,
    parser: CommandParser,
    timers: ExpiryScheduler,
    collab: Collaborators,
    config: OrchestratorConfig,
    models: OnceCell<Vec<String>>,
    images: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Build the orchestrator and the expiry events its timers will emit.
    /// Feed the receiver to [`Orchestrator::run_expiry_loop`].
    pub fn new(
        collab: Collaborators,
        config: OrchestratorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionExpired>), ConversationError> {
        let parser = CommandParser::with_end_phrases(config.end_phrases.as_slice())?;
        let (timers, expired) = ExpiryScheduler::new(config.expire_after);
        info!(
            "Orchestrator ready, sessions expire after {}s",
            config.expire_after.as_secs()
        );
        let orchestrator = Self {
            store: SessionStore::new(),
            parser,
            timers,
            collab,
            config,
            models: OnceCell::new(),
            images: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        };
        Ok((orchestrator, expired))
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub const fn timers(&self) -> &ExpiryScheduler {
        &self.timers
    }

    #[must_use]
    pub const fn replies(&self) -> &CannedReplies {
        &self.config.replies
    }

    /// Process one inbound message and return the reply to deliver.
    ///
    /// Completion failures are returned as errors; every other outcome is a
    /// reply.
    pub async fn handle(&self, inbound: &InboundMessage) -> Result<TurnOutcome, ConversationError> {
        let sender = self.resolve_sender(inbound);
        let handle = self.store.get_or_create(&sender, &self.config.defaults).await;
        self.store
            .update_fields(
                &sender.id,
                SessionUpdate {
                    limits: Some(sender.limits.clone()),
                    ..SessionUpdate::default()
                },
            )
            .await;

        let voice_transcription = {
            let session = handle.lock().await;
            if sender.limits.messages_exhausted(session.message_count()) {
                warn!(
                    "Sender {} reached the message limit ({} messages)",
                    sender.id,
                    session.message_count()
                );
                return Ok(TurnOutcome::canned(
                    &self.config.replies.limit_reached,
                    TurnKind::LimitReached,
                ));
            }
            session.flags.voice_transcription && sender.limits.voice_transcription
        };

        self.timers.touch(&sender.id);

        let Some(text) = self.inbound_text(inbound, &sender, voice_transcription).await else {
            info!("Nothing to process from {}", sender.id);
            return Ok(TurnOutcome::canned(
                &self.config.replies.not_understood,
                TurnKind::NotUnderstood,
            ));
        };

        let no_models: &[String] = &[];
        let models = if self.parser.mentions_model_switch(&text) {
            self.available_models().await
        } else {
            no_models
        };
        if let Some(parsed) = self.parser.parse(&text, models) {
            return Ok(self.apply_command(&sender, &handle, &text, parsed).await);
        }

        self.complete_turn(&sender, &handle, text).await
    }

    async fn complete_turn(
        &self,
        sender: &Sender,
        handle: &SessionHandle,
        text: String,
    ) -> Result<TurnOutcome, ConversationError> {
        let (messages, params) = {
            let mut session = handle.lock().await;
            session.add_message(Role::User, text);
            (session.messages().to_vec(), session.params.clone())
        };

        info!(
            "Forwarding {} messages from {} to {}",
            messages.len(),
            sender.id,
            params.model
        );
        let response = self.collab.completion.complete(&messages, &params).await?;
        if response.content.trim().is_empty() {
            return Err(ConversationError::EmptyResponse);
        }
        if let Some(usage) = &response.usage {
            debug!(
                "Token usage for {}: prompt={}, completion={}, total={}",
                sender.id, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        let directive = self.parser.extract_image_directive(&response.content);
        let mut session = handle.lock().await;
        let mut image_dispatched = false;
        if let Some(prompt) = &directive.prompt {
            let exhausted = sender.limits.images_exhausted(session.images_generated());
            if session.flags.allow_images && !exhausted {
                session.record_image();
                let caption = session.flags.caption_images.then(|| prompt.clone());
                self.dispatch_image(sender.id.clone(), prompt.clone(), caption);
                image_dispatched = true;
            } else {
                warn!("Image generation disabled for {}", sender.id);
                session.add_message(Role::System, self.config.replies.images_disabled.clone());
            }
        }
        session.add_message(Role::Assistant, directive.reply.clone());
        debug!("Transcript for {}:\n{}", sender.id, session.render_transcript());

        Ok(TurnOutcome {
            reply: directive.reply,
            kind: TurnKind::Completion,
            image_prompt: directive.prompt,
            image_dispatched,
        })
    }

    async fn apply_command(
        &self,
        sender: &Sender,
        handle: &SessionHandle,
        request: &str,
        parsed: ParsedCommand,
    ) -> TurnOutcome {
        let replies = &self.config.replies;
        let reply = match parsed.command {
            Command::EndConversation => {
                return TurnOutcome::canned(self.end_conversation(sender).await, TurnKind::Ended);
            }
            Command::SwitchModel(model) => {
                let reply = replies.model_switched.replace("{model}", &model);
                let mut session = handle.lock().await;
                session.params.model = model;
                session.record_command(request, reply.clone());
                reply
            }
            Command::SetParameter { name, value } => {
                let mut session = handle.lock().await;
                match session.params.set(&name, value) {
                    Ok(()) => replies.parameter_changed.clone(),
                    Err(e) => {
                        warn!("Rejected parameter change from {}: {e}", sender.id);
                        replies.parameter_rejected.replace("{name}", &name)
                    }
                }
            }
            Command::Captioning(Some(on)) => {
                handle.lock().await.flags.caption_images = on;
                if on {
                    replies.captioning_on.clone()
                } else {
                    replies.captioning_off.clone()
                }
            }
            Command::Captioning(None) => replies.captioning_unknown.clone(),
        };
        TurnOutcome::canned(reply, TurnKind::Command)
    }

    /// Restart the sender's conversation and return the goodbye text.
    pub async fn end_conversation(&self, sender: &Sender) -> String {
        self.timers.cancel(&sender.id);
        self.store.restart(&sender.id).await;
        info!("Conversation with {} ended", sender.id);
        self.config
            .defaults
            .goodbye_message
            .replace("{user}", &sender.name)
    }

    /// Drop the sender's session and stop its timer. Returns whether a
    /// session existed.
    pub async fn reset(&self, sender_id: &str) -> bool {
        self.timers.cancel(sender_id);
        self.store.delete(sender_id).await
    }

    /// Restart an idle session and tell the sender. A sender without a live
    /// session is ignored.
    pub async fn on_session_expired(&self, event: &SessionExpired) -> anyhow::Result<()> {
        if self.store.restart(&event.sender_id).await.is_none() {
            debug!("Expiry for {} without a live session, ignoring", event.sender_id);
            return Ok(());
        }
        let id = self
            .collab
            .messenger
            .send(Some(&self.config.replies.expired), &event.sender_id, None)
            .await?;
        info!("Sent expiry notice to {} ({id})", event.sender_id);
        Ok(())
    }

    /// Consume expiry events until shutdown. A failing callback is logged and
    /// its timer cancelled; the loop keeps going.
    pub async fn run_expiry_loop(self: Arc<Self>, mut expired: mpsc::UnboundedReceiver<SessionExpired>) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Expiry loop stopping");
                    break;
                }
                event = expired.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if let Err(e) = self.on_session_expired(&event).await {
                        error!("Expiry handling for {} failed: {e}", event.sender_id);
                        self.timers.cancel(&event.sender_id);
                    }
                }
            }
        }
    }

    pub fn spawn_expiry_loop(
        self: &Arc<Self>,
        expired: mpsc::UnboundedReceiver<SessionExpired>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_expiry_loop(expired))
    }

    /// Wait for every in-flight image task.
    pub async fn drain_background(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_images());
        while tasks.join_next().await.is_some() {}
    }

    /// Stop the expiry loop, cancel all timers and abort image tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.timers.shutdown();
        let mut tasks = self.lock_images();
        while tasks.try_join_next().is_some() {}
        if !tasks.is_empty() {
            warn!("Aborting {} unfinished image task(s)", tasks.len());
        }
        tasks.abort_all();
    }

    fn resolve_sender(&self, inbound: &InboundMessage) -> Sender {
        let defaults = &self.config.defaults.limits;
        match self.collab.contacts.lookup(&inbound.sender_id) {
            Some(contact) => Sender {
                id: inbound.sender_id.clone(),
                name: contact
                    .name
                    .clone()
                    .unwrap_or_else(|| inbound.display_name().to_string()),
                country: contact.country.clone(),
                limits: contact.limits(defaults),
            },
            None => Sender::new(&inbound.sender_id, inbound.display_name())
                .with_limits(defaults.clone()),
        }
    }

    /// Text to process: the body, or the transcript of an audio message.
    async fn inbound_text(
        &self,
        inbound: &InboundMessage,
        sender: &Sender,
        voice_transcription: bool,
    ) -> Option<String> {
        let body = inbound
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(ToString::to_string);

        let Some(media) = &inbound.media else {
            return body;
        };
        match media.kind() {
            MediaKind::Audio if voice_transcription => {
                let Some(transcriber) = &self.collab.transcriber else {
                    debug!("No transcriber configured, ignoring audio from {}", sender.id);
                    return body;
                };
                let language = sender.limits.transcription_language.as_deref();
                info!("Transcribing audio from {} (language={language:?})", sender.id);
                match transcriber.transcribe(&media.url, language).await {
                    Ok(Some(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
                    Ok(_) => {
                        warn!("Transcription of audio from {} returned nothing", sender.id);
                        None
                    }
                    Err(e) => {
                        error!(
                            "Transcription of audio from {} failed: {}",
                            sender.id,
                            scrub_url(&e.to_string(), &media.url)
                        );
                        None
                    }
                }
            }
            kind => {
                debug!("Received {kind:?} media from {}", sender.id);
                body
            }
        }
    }

    async fn available_models(&self) -> &[String] {
        self.models
            .get_or_init(|| async {
                if let Some(models) = &self.config.available_models {
                    return models.clone();
                }
                match self.collab.completion.available_models().await {
                    Ok(models) => {
                        info!("Loaded {} available models", models.len());
                        models
                    }
                    Err(e) => {
                        error!("Could not list models: {e}");
                        Vec::new()
                    }
                }
            })
            .await
    }

    fn dispatch_image(&self, recipient: String, prompt: String, caption: Option<String>) {
        let images = Arc::clone(&self.collab.images);
        let messenger = Arc::clone(&self.collab.messenger);
        let mut tasks = self.lock_images();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            info!("Generating image for {recipient}: {prompt}");
            let url = match images.generate_image(&prompt).await {
                Ok(url) => url,
                Err(e) => {
                    error!("Image generation for {recipient} failed: {e}");
                    return;
                }
            };
            match messenger
                .send(caption.as_deref(), &recipient, Some(&url))
                .await
            {
                Ok(id) => info!("Image sent to {recipient} ({id})"),
                Err(e) => error!("Sending image to {recipient} failed: {e}"),
            }
        });
    }

    fn lock_images(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
