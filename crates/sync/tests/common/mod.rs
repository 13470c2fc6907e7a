#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use reel_sync::feed::publish_post;
use reel_sync::models::{fields, paths, NewPost, Post};
use reel_sync::store::{DocumentStore, FieldOp};
use reel_sync::{sign_in, AuthIdentity, Config, MemoryStore, Session, SubscriptionManager};

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub subs: SubscriptionManager,
    pub config: Config,
}

pub fn setup() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let subs = SubscriptionManager::new(store.clone());
    TestEnv {
        store,
        subs,
        config: Config::default(),
    }
}

/// Signs a user in, creating the profile on first use.
pub async fn create_user(store: &MemoryStore, uid: &str, name: &str) -> Session {
    sign_in(
        store,
        AuthIdentity {
            uid: uid.into(),
            email: Some(format!("{uid}@example.com")),
            display_name: Some(name.into()),
            photo_url: None,
        },
    )
    .await
    .unwrap()
}

pub async fn create_admin(store: &MemoryStore, uid: &str, name: &str) -> Session {
    create_user(store, uid, name).await;
    store
        .update(
            &paths::user(uid),
            vec![FieldOp::Set("role".into(), json!("admin"))],
        )
        .await
        .unwrap();
    create_user(store, uid, name).await
}

pub async fn seed_post(store: &MemoryStore, owner: &Session, title: &str) -> String {
    publish_post(
        store,
        owner,
        NewPost {
            media_url: format!("https://media.example.com/{}.mp4", title.replace(' ', "-")),
            title: title.into(),
            summary: format!("About {title}"),
            tags: vec!["family".into()],
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

/// Publishes a post that already has the given likers.
pub async fn seed_liked_post(store: &MemoryStore, owner: &Session, title: &str, likers: &[&str]) -> String {
    let id = seed_post(store, owner, title).await;
    if !likers.is_empty() {
        let members = likers.iter().map(|uid| json!(uid)).collect();
        store
            .update(
                &paths::post(&id),
                vec![FieldOp::ArrayUnion(fields::LIKES.into(), members)],
            )
            .await
            .unwrap();
    }
    id
}

pub async fn fetch_post(store: &MemoryStore, id: &str) -> Post {
    store
        .get(&paths::post(id))
        .await
        .unwrap()
        .expect("post exists")
        .decode()
        .unwrap()
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Lets spawned tasks drain without waiting on any condition.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
