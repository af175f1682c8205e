use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tyrpc::{
    ContextManager, Error, RequestArgs, RequestEndpoint, Router, Schema, SubscriptionArgs,
    SubscriptionEndpoint, Type, Value,
};

const PAGE_SIZE: usize = 20;

pub fn message_type() -> Type {
    Type::document(
        "Message",
        Schema::new()
            .field("id", Type::id())
            .field("author", Type::string())
            .field("text", Type::string()),
    )
}

#[derive(Default)]
struct Room {
    messages: Mutex<Vec<serde_json::Value>>,
}

/// A chat room: `send` and `history` requests plus a `chat` subscription.
///
/// Callers identify themselves with an `authorization` header (or query
/// parameter on the WebSocket URL).
pub fn chat_router() -> Router {
    let context = ContextManager::default().handler("user", |args| async move {
        match args.metadata.header("authorization") {
            Some(user) if !user.is_empty() => Ok(user.to_string()),
            _ => Err(Error::with_code(401, "Unauthorized.")),
        }
    });
    let mut router = Router::default().with_context(context);
    let room = Arc::new(Room::default());

    let chat = router.add_subscription(
        "chat",
        SubscriptionEndpoint::new(|args: SubscriptionArgs| async move {
            let user = args.context.get::<String>("user").cloned().unwrap_or_default();
            tracing::info!("{user} joined");
            let subscription = args.subscription;
            subscription.subscribe_one("lobby");
            tokio::spawn(async move {
                subscription.closed().await;
                tracing::info!("{user} left");
            });
            Ok(())
        })
        .result(message_type()),
    );

    router.add_request("send", {
        let room = room.clone();
        RequestEndpoint::new(move |args: RequestArgs| {
            let room = room.clone();
            let chat = chat.clone();
            async move {
                let author = args.context.get::<String>("user").cloned().unwrap_or_default();
                let message = {
                    let mut messages = room.messages.lock().unwrap_or_else(PoisonError::into_inner);
                    let message = json!({
                        "id": messages.len().to_string(),
                        "author": author,
                        "text": args.params.field("text").to_json(),
                    });
                    messages.push(message.clone());
                    message
                };
                chat.publish("lobby", message.clone());
                Ok(message)
            }
        })
        .params(Schema::new().field("text", Type::string()))
        .result(message_type())
    });

    router.add_request("history", {
        let room = room.clone();
        RequestEndpoint::new(move |args: RequestArgs| {
            let room = room.clone();
            async move {
                let start = match args.params.field("cursor").as_str().map(str::parse::<usize>) {
                    Some(Ok(start)) => start,
                    Some(Err(_)) => return Err(Error::with_code(400, "Invalid cursor.")),
                    None => 0,
                };
                let messages = room.messages.lock().unwrap_or_else(PoisonError::into_inner);
                let end = messages.len().min(start.saturating_add(PAGE_SIZE));
                let nodes = messages.get(start..end).unwrap_or_default().to_vec();
                let has_next_page = end < messages.len();
                Ok(Value::from(json!({
                    "nodes": nodes,
                    "hasNextPage": has_next_page,
                    "nextPageCursor": has_next_page.then(|| end.to_string()),
                })))
            }
        })
        .params(Schema::new().field("cursor", Type::string().optional()))
        .result(message_type().pagination())
    });

    router
}
