//! Session management for per-sender conversations.
//!
//! A session holds everything about one ongoing exchange: the message
//! history (system preamble always first), completion parameters, usage
//! counters and feature flags.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use uuid::Uuid;

use chatrelay_core::{ChatMessage, CompletionParams, Role, Sender, SenderLimits};

/// Source of the system preamble. Rendered with `{user}` and `{today}`.
#[derive(Clone)]
pub enum SystemPrompt {
    Template(String),
    /// Produces a fresh template each time the session (re)starts.
    Generator(Arc<dyn Fn() -> String + Send + Sync>),
}

impl SystemPrompt {
    #[must_use]
    pub fn render(&self, sender: &Sender, today: NaiveDate) -> String {
        let template = match self {
            Self::Template(t) => t.clone(),
            Self::Generator(generate) => generate(),
        };
        template
            .replace("{user}", &sender.name)
            .replace("{today}", &today.format("%Y-%m-%d").to_string())
    }
}

impl fmt::Debug for SystemPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(t) => f.debug_tuple("Template").field(t).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::Template(
            "You are a helpful and friendly assistant chatting with {user} over WhatsApp. \
             Today is {today}. When the user asks for a picture, end your reply with \
             [img: \"<image description>\"]."
                .to_string(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    pub caption_images: bool,
    pub voice_transcription: bool,
    pub allow_images: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            caption_images: true,
            voice_transcription: true,
            allow_images: true,
        }
    }
}

/// Seed values for new sessions.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub params: CompletionParams,
    pub system_prompt: SystemPrompt,
    pub flags: SessionFlags,
    pub limits: SenderLimits,
    /// Sent when a sender ends the conversation; `{user}` is replaced.
    pub goodbye_message: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            params: CompletionParams::default(),
            system_prompt: SystemPrompt::default(),
            flags: SessionFlags::default(),
            limits: SenderLimits::default(),
            goodbye_message: "Goodbye {user}! I'll be here if you need me.".to_string(),
        }
    }
}

/// A conversation session with full message history.
///
/// Identity, start time and the active flag are fixed at construction;
/// [`ConversationSession::restart`] replaces them with a fresh value.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: Uuid,
    sender: Sender,
    started_at: DateTime<Utc>,
    active: bool,
    system_prompt: SystemPrompt,
    messages: Vec<ChatMessage>,
    images_generated: u32,
    message_count: u32,
    pub params: CompletionParams,
    pub flags: SessionFlags,
}

impl ConversationSession {
    /// Create a session seeded with the rendered system preamble.
    #[must_use]
    pub fn new(sender: Sender, defaults: &SessionDefaults) -> Self {
        Self::fresh(
            sender,
            defaults.system_prompt.clone(),
            defaults.params.clone(),
            defaults.flags,
        )
    }

    fn fresh(
        sender: Sender,
        system_prompt: SystemPrompt,
        params: CompletionParams,
        flags: SessionFlags,
    ) -> Self {
        let preamble = system_prompt.render(&sender, Local::now().date_naive());
        Self {
            id: Uuid::now_v7(),
            sender,
            started_at: Utc::now(),
            active: true,
            system_prompt,
            messages: vec![ChatMessage::system(preamble)],
            images_generated: 0,
            message_count: 0,
            params,
            flags,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn sender(&self) -> &Sender {
        &self.sender
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The system preamble at position zero.
    #[must_use]
    pub fn system_message(&self) -> Option<&ChatMessage> {
        self.messages.first()
    }

    #[must_use]
    pub const fn images_generated(&self) -> u32 {
        self.images_generated
    }

    /// User messages forwarded to the completion provider so far.
    #[must_use]
    pub const fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Append a message. User messages count towards the message limit.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        if role == Role::User {
            self.message_count = self.message_count.saturating_add(1);
        }
        self.messages.push(ChatMessage::new(role, content));
    }

    /// Record a handled in-band command and its acknowledgement. Commands do
    /// not count towards the message limit.
    pub fn record_command(&mut self, request: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(ChatMessage::new(Role::User, request));
        self.messages.push(ChatMessage::new(Role::Assistant, reply));
    }

    pub const fn record_image(&mut self) {
        self.images_generated = self.images_generated.saturating_add(1);
    }

    /// Limits are the only part of the sender that may change mid-session.
    pub fn update_limits(&mut self, limits: SenderLimits) {
        self.sender.limits = limits;
    }

    /// Start over: only a freshly rendered system preamble remains and the
    /// counters are reset. Parameters and flags carry over.
    pub fn restart(&mut self) {
        let sender = self.sender.clone();
        let system_prompt = self.system_prompt.clone();
        let params = self.params.clone();
        *self = Self::fresh(sender, system_prompt, params, self.flags);
    }

    /// `ROLE: content` lines in insertion order, for logs.
    #[must_use]
    pub fn render_transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn defaults_with_template(template: &str) -> SessionDefaults {
        SessionDefaults {
            system_prompt: SystemPrompt::Template(template.to_string()),
            ..SessionDefaults::default()
        }
    }

    #[test]
    fn new_session_starts_with_rendered_system_message() {
        let session = ConversationSession::new(
            Sender::new("+1555", "Ana"),
            &defaults_with_template("Talking to {user}."),
        );
        assert_eq!(session.messages().len(), 1);
        let first = session.system_message().unwrap();
        assert_eq!(first.role, Role::System);
        assert_eq!(first.content, "Talking to Ana.");
        assert!(session.is_active());
    }

    #[test]
    fn template_renders_today() {
        let sender = Sender::new("+1", "Bo");
        let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let rendered = SystemPrompt::Template("{user} on {today}".to_string()).render(&sender, today);
        assert_eq!(rendered, "Bo on 2024-03-09");
    }

    #[test]
    fn user_messages_are_counted() {
        let mut session = ConversationSession::new(Sender::new("+1", "A"), &SessionDefaults::default());
        session.add_message(Role::User, "hello");
        session.add_message(Role::Assistant, "hi there");
        session.add_message(Role::System, "note");
        assert_eq!(session.message_count(), 1);
        assert_eq!(session.messages().len(), 4);
    }

    #[test]
    fn restart_keeps_only_fresh_system_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let defaults = SessionDefaults {
            system_prompt: SystemPrompt::Generator(Arc::new(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("preamble #{n} for {{user}}")
            })),
            ..SessionDefaults::default()
        };
        let mut session = ConversationSession::new(Sender::new("+1", "Cy"), &defaults);
        let first_id = session.id();
        session.params.temperature = 0.2;
        session.add_message(Role::User, "hello");
        session.add_message(Role::Assistant, "hi");
        session.record_image();

        session.restart();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].content, "preamble #2 for Cy");
        assert_eq!(session.images_generated(), 0);
        assert_eq!(session.message_count(), 0);
        assert_ne!(session.id(), first_id);
        assert!((session.params.temperature - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn transcript_preserves_order() {
        let mut session =
            ConversationSession::new(Sender::new("+1", "A"), &defaults_with_template("sys"));
        session.add_message(Role::User, "one");
        session.add_message(Role::Assistant, "two");
        assert_eq!(session.render_transcript(), "SYSTEM: sys\nUSER: one\nASSISTANT: two");
    }

    #[test]
    fn commands_are_recorded_without_counting() {
        let mut session = ConversationSession::new(Sender::new("+1", "Ana"), &SessionDefaults::default());
        session.record_command("talk to gpt-4", "[you are now speaking with gpt-4]");
        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
        assert_eq!(session.message_count(), 0);
    }
}
