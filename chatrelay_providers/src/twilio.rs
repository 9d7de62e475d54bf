use async_trait::async_trait;
use chatrelay_core::OutboundMessenger;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const SCHEME: &str = "whatsapp:";

/// Twilio WhatsApp delivery through the Messages REST resource.
pub struct TwilioMessenger {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

/// Prefix `number` with the WhatsApp transport scheme unless it already has it.
fn with_scheme(number: &str) -> String {
    if number.starts_with(SCHEME) {
        number.to_string()
    } else {
        format!("{SCHEME}{number}")
    }
}

impl TwilioMessenger {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        info!("Creating TwilioMessenger for {from_number}");
        Self {
            client: Client::new(),
            account_sid,
            auth_token,
            from_number,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl OutboundMessenger for TwilioMessenger {
    async fn send(
        &self,
        text: Option<&str>,
        recipient: &str,
        media_url: Option<&str>,
    ) -> anyhow::Result<String> {
        if text.is_none() && media_url.is_none() {
            anyhow::bail!("Nothing to send to {recipient}");
        }

        let mut form = vec![
            ("From", with_scheme(&self.from_number)),
            ("To", with_scheme(recipient)),
        ];
        if let Some(text) = text {
            form.push(("Body", text.to_string()));
        }
        if let Some(url) = media_url {
            form.push(("MediaUrl", url.to_string()));
        }

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url, self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let sid = response["sid"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing message sid"))?
            .to_string();
        info!("Message {sid} queued for {recipient}");
        Ok(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messenger(server: &MockServer) -> TwilioMessenger {
        TwilioMessenger::new(
            "AC123".to_string(),
            "secret".to_string(),
            "+14155238886".to_string(),
        )
        .with_base_url(server.uri())
    }

    #[test]
    fn scheme_is_added_once() {
        assert_eq!(with_scheme("+1555"), "whatsapp:+1555");
        assert_eq!(with_scheme("whatsapp:+1555"), "whatsapp:+1555");
    }

    #[tokio::test]
    async fn sends_text_and_returns_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=whatsapp%3A%2B15550001"))
            .and(body_string_contains("Body=hello"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM42"})))
            .expect(1)
            .mount(&server)
            .await;

        let sid = messenger(&server)
            .send(Some("hello"), "+15550001", None)
            .await
            .unwrap();
        assert_eq!(sid, "SM42");
    }

    #[tokio::test]
    async fn sends_media_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("MediaUrl=https%3A%2F%2Fimg.test%2Fa.png"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM43"})))
            .mount(&server)
            .await;

        let sid = messenger(&server)
            .send(None, "whatsapp:+15550001", Some("https://img.test/a.png"))
            .await
            .unwrap();
        assert_eq!(sid, "SM43");
    }

    #[tokio::test]
    async fn provider_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"code": 21211})))
            .mount(&server)
            .await;

        assert!(messenger(&server).send(Some("hi"), "bogus", None).await.is_err());
    }

    #[tokio::test]
    async fn empty_message_is_refused() {
        let server = MockServer::start().await;
        assert!(messenger(&server).send(None, "+1", None).await.is_err());
    }
}
