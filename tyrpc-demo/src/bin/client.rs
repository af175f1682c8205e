use clap::Parser;
use reqwest::multipart::Form;
use serde_json::json;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Name sent as the authorization header.
    #[arg(short, long, default_value = "alice")]
    pub user: String,

    /// Message to send. Only the history is fetched when absent.
    #[arg(short, long)]
    pub text: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut endpoints = json!({"history": {"cursor": null}});
    if let Some(text) = &args.text {
        endpoints["send"] = json!({"text": text});
    }

    let form = Form::new().text("endpoints", endpoints.to_string());
    let rsp = reqwest::Client::new()
        .post(format!("http://{}/", args.addr))
        .header("authorization", &args.user)
        .multipart(form)
        .send()
        .await;
    let body = match rsp {
        Ok(rsp) => rsp.json::<serde_json::Value>().await,
        Err(e) => Err(e),
    };
    match body {
        Ok(body) => match serde_json::to_string_pretty(&body) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::error!("format response failed: {e}"),
        },
        Err(e) => tracing::error!("batch request failed: {e}"),
    }
}
