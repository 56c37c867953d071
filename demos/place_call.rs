//! Place one call through Twilio without starting the gateway.
use dial_core::{CallRequest, CommsClient, PhoneNormalizer};
use dial_twilio::TwilioClient;

use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let account_sid = require("TWILIO_ACCOUNT_SID");
    let auth_token = require("TWILIO_AUTH_TOKEN");
    let from = require("TWILIO_PHONE_NUMBER");
    let to = PhoneNormalizer::default().normalize(&require("CALL_TO"));
    let url = env::var("CALL_INSTRUCTIONS_URL")
        .unwrap_or_else(|_| "http://demo.twilio.com/docs/voice.xml".to_string());

    let client = TwilioClient::new(account_sid, auth_token);
    let res = client
        .place_call(CallRequest {
            to: &to,
            from: &from,
            instructions_url: &url,
        })
        .await?;
    println!("Call queued via {} with sid {}", res.provider, res.id);
    Ok(())
}

fn require(env_key: &str) -> String {
    env::var(env_key).unwrap_or_else(|_| panic!("missing env {}", env_key))
}
