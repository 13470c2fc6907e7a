use std::sync::Arc;
use std::time::Duration;

use reel_sync::feed::{add_comment, publish_post, FeedAggregate};
use reel_sync::messaging::{get_or_create_room, ChatThread, Inbox};
use reel_sync::models::NewPost;
use reel_sync::viewport::Layout;
use reel_sync::{sign_in, AuthIdentity, Config, MemoryStore, ProfileCache, SubscriptionManager};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::main]
async fn main() -> reel_sync::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_sync=info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "{} sync demo starting", reel_shared::constants::APP_NAME);

    let store = Arc::new(
        MemoryStore::new()
            .with_latency(config.store_latency())
            .with_failure_rate(config.store_failure_rate),
    );
    let subs = SubscriptionManager::new(store.clone());

    let alice = sign_in(
        store.as_ref(),
        AuthIdentity {
            uid: "alice".into(),
            display_name: Some("Alice".into()),
            ..Default::default()
        },
    )
    .await?;
    let bob = sign_in(
        store.as_ref(),
        AuthIdentity {
            uid: "bob".into(),
            ..Default::default()
        },
    )
    .await?;

    for (i, title) in ["Sourdough basics", "Beach day", "Garden update"].iter().enumerate() {
        publish_post(
            store.as_ref(),
            &bob,
            NewPost {
                media_url: format!("https://media.example.com/videos/{i}.mp4"),
                title: title.to_string(),
                tags: vec!["family".into()],
                ..Default::default()
            },
        )
        .await?;
    }

    let mut feed = FeedAggregate::mount(&subs, alice.clone(), &config);
    settle().await;
    feed.set_layout(Layout::full_screen(800.0));
    for command in feed.scroll_to(800.0) {
        tracing::info!(?command, "playback");
    }

    if let Some(active) = feed.active_post_id() {
        let applied = feed.toggle_like(&active)?;
        tracing::info!(post = %active, liked = applied.value.liked, count = applied.value.count, "like shown");
        if let Err(e) = applied.remote.outcome().await {
            tracing::warn!(error = %e, "like rolled back");
        }
        add_comment(store.as_ref(), &alice, &active, "Looks great!").await?;
    }
    settle().await;
    for item in feed.view().items {
        tracing::info!(
            post = %item.post.title,
            liked = item.liked,
            likes = item.like_count,
            comments = item.post.comment_count,
            active = item.active,
            "feed item"
        );
    }

    let room = get_or_create_room(store.as_ref(), &alice.uid, &bob.uid).await?;
    let profiles = ProfileCache::new(store.clone());
    let inbox = Inbox::open(&subs, &bob, profiles);
    let mut thread = ChatThread::new(subs.clone(), alice.clone(), &config);
    thread.switch_room(&room.id);
    thread.set_input("hello");
    if let Some(pending) = thread.send()? {
        tracing::info!(input = %thread.input(), "input cleared");
        if let Err(e) = pending.outcome().await {
            tracing::warn!(error = %e, input = %thread.input(), "send failed, input restored");
        }
    }
    settle().await;

    for message in thread.messages() {
        tracing::info!(from = %message.sender_id, text = %message.text, "message");
    }
    for entry in inbox.entries() {
        tracing::info!(
            room = %entry.room.id,
            with = %entry.display_name(),
            last = ?entry.room.last_message.as_ref().map(|m| m.text.as_str()),
            "inbox"
        );
    }

    feed.unmount();
    thread.close();
    drop(inbox);
    tracing::info!(listeners = store.listener_count(), "demo finished");
    Ok(())
}
