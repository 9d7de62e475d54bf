use chatrelay_config::Config;

/// Strategy for creating `~/chatrelay/config.json` from the template.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let path = Config::create_config()?;
        println!("Created config at {}", path.display());
        println!();
        println!("Next steps:");
        println!("  1. Add your OpenAI key under providers.openai.api_key");
        println!("  2. Add your Twilio account_sid, auth_token and from_number under whatsapp");
        println!("  3. Optionally add an AssemblyAI key to transcribe voice notes");
        println!("  4. Run 'chatrelay serve' and point the Twilio webhook at /whatsapp/reply");
        Ok(())
    }
}
