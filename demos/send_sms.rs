//! Send one SMS through Twilio without starting the gateway.
use dial_core::{CommsClient, MessageRequest, PhoneNormalizer};
use dial_twilio::TwilioClient;

use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let account_sid = arg_or_env("--account-sid", "TWILIO_ACCOUNT_SID");
    let auth_token = arg_or_env("--auth-token", "TWILIO_AUTH_TOKEN");
    let from = arg_or_env("--from", "TWILIO_PHONE_NUMBER");
    let to = PhoneNormalizer::default().normalize(&arg_or_env("--to", "SMS_TO"));
    let text = arg_or_env("--text", "SMS_TEXT");

    let client = TwilioClient::new(account_sid, auth_token);
    let res = client
        .send_message(MessageRequest {
            to: &to,
            from: &from,
            body: &text,
        })
        .await?;
    println!(
        "Sent via {} with sid {}\nRaw: {}",
        res.provider,
        res.id,
        serde_json::to_string_pretty(&res.raw)?
    );
    Ok(())
}

fn arg_or_env(flag: &str, env_key: &str) -> String {
    let args: Vec<String> = std::env::args().collect();
    if let Some(idx) = args.iter().position(|a| a == flag) {
        if idx + 1 < args.len() {
            return args[idx + 1].clone();
        }
    }
    env::var(env_key)
        .unwrap_or_else(|_| panic!("missing {} (arg {} or env {})", flag, flag, env_key))
}
