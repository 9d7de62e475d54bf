use chatrelay_config::{Config, mask_key};

/// Strategy for displaying the loaded configuration with secrets masked.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let agent = &config.agents.defaults;

        println!("=== chatrelay Configuration ===\n");

        println!("API Keys:");
        println!("  OpenAI: {}", mask_key(&config.providers.openai.api_key));
        println!("  OpenAI Base URL: {}", config.providers.openai.base_url);
        match &config.providers.assemblyai {
            Some(assemblyai) => println!("  AssemblyAI: {}", mask_key(&assemblyai.api_key)),
            None => println!("  AssemblyAI: (not set - voice notes disabled)"),
        }
        println!();

        println!("Agent Defaults:");
        println!("  Model: {}", agent.model);
        println!("  Max Tokens: {}", agent.max_tokens);
        println!("  Temperature: {}", agent.temperature);
        println!("  Top P: {}", agent.top_p);
        if let Some(path) = &agent.system_prompt_file {
            println!("  System Prompt File: {}", path.display());
        } else if let Some(prompt) = &agent.system_prompt {
            println!("  System Prompt: {}", truncate(prompt, 60));
        }
        println!("  Expire After: {}s", agent.conversation_expire_secs);
        println!(
            "  Captions: {}, Voice: {}, Images: {}",
            agent.caption_images, agent.voice_transcription, agent.allow_images
        );
        println!();

        println!("Limits:");
        match config.limits.max_messages {
            Some(max) => println!("  Max Messages: {max}"),
            None => println!("  Max Messages: unlimited"),
        }
        println!(
            "  Max Image Generations: {}",
            config.limits.max_image_generations
        );
        println!();

        println!("WhatsApp:");
        println!("  Enabled: {}", config.whatsapp.enabled);
        println!("  Listen: {}", config.whatsapp.listen);
        println!("  Account SID: {}", mask_key(&config.whatsapp.account_sid));
        println!("  Auth Token: {}", mask_key(&config.whatsapp.auth_token));
        println!("  From: {}", config.whatsapp.from_number);
        print_allow_from(&config.whatsapp.allow_from);
        if let Some(path) = &config.whatsapp.contacts_path {
            println!("  Contacts: {}", path.display());
        }
        println!();

        println!("Telegram:");
        println!("  Enabled: {}", config.telegram.enabled);
        if config.telegram.token.is_empty() {
            println!("  Token: (not set)");
        } else {
            println!("  Token: {}", mask_key(&config.telegram.token));
        }
        print_allow_from(&config.telegram.allow_from);

        Ok(())
    }
}

fn print_allow_from(allow_from: &[String]) {
    if allow_from.is_empty() {
        println!("  Allow From: (empty - all users allowed)");
    } else {
        println!("  Allow From: {}", allow_from.join(", "));
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars - 3).collect();
        format!("{head}...")
    }
}
