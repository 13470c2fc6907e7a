mod common;

use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::seq::SliceRandom;
use serde_json::json;

use common::{create_user, eventually, fetch_post, seed_liked_post, seed_post, settle, setup};
use reel_sync::feed::{add_comment, publish_post, CommentThread, FeedAggregate};
use reel_sync::models::{fields, paths, NewPost};
use reel_sync::optimistic::LikeState;
use reel_sync::store::{DocumentStore, FieldOp};
use reel_sync::viewport::{Layout, PlaybackCommand};
use reel_sync::{ErrorKind, SyncError};

fn like(liked: bool, count: u64) -> LikeState {
    LikeState { liked, count }
}

#[tokio::test]
async fn feed_lists_visible_posts_newest_first() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let viewer = create_user(&env.store, "viewer", "Viewer").await;
    let oldest = seed_post(&env.store, &owner, "first").await;
    let hidden = seed_post(&env.store, &owner, "second").await;
    let newest = seed_post(&env.store, &owner, "third").await;
    env.store
        .update(
            &paths::post(&hidden),
            vec![FieldOp::Set(fields::VISIBLE.into(), json!(false))],
        )
        .await
        .unwrap();

    let feed = FeedAggregate::mount(&env.subs, viewer, &env.config);
    eventually("feed loaded", || feed.view().loaded).await;

    let view = feed.view();
    let ids: Vec<&str> = view.items.iter().map(|i| i.post.id.as_str()).collect();
    assert_eq!(ids, vec![newest.as_str(), oldest.as_str()]);
    assert!(view.items.iter().all(|i| !i.liked && i.like_count == 0));
}

#[tokio::test]
async fn like_shows_immediately_and_stays_after_confirmation() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_liked_post(&env.store, &owner, "popular", &["u1", "u2", "u3"]).await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;
    assert_eq!(feed.like_state(&post), Some(like(false, 3)));

    let applied = feed.toggle_like(&post).unwrap();
    assert_eq!(applied.value, like(true, 4));
    assert_eq!(feed.like_state(&post), Some(like(true, 4)));

    applied.remote.outcome().await.unwrap();
    assert_eq!(feed.like_state(&post), Some(like(true, 4)));

    eventually("confirmed snapshot", || {
        feed.view().items[0].post.is_liked_by("alice")
    })
    .await;
    assert_eq!(feed.like_state(&post), Some(like(true, 4)));
    assert_eq!(feed.pending_likes(), 0);
    assert!(fetch_post(&env.store, &post).await.likes.contains("alice"));
}

#[tokio::test]
async fn toggling_twice_returns_to_the_start() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_liked_post(&env.store, &owner, "post", &["u1", "u2"]).await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    let first = feed.toggle_like(&post).unwrap();
    let second = feed.toggle_like(&post).unwrap();
    assert_eq!(first.value, like(true, 3));
    assert_eq!(second.value, like(false, 2));

    first.remote.outcome().await.unwrap();
    second.remote.outcome().await.unwrap();
    settle().await;
    assert_eq!(feed.like_state(&post), Some(like(false, 2)));
    assert!(!fetch_post(&env.store, &post).await.likes.contains("alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_toggles_stay_ordered_on_many_threads() {
    for round in 0..50 {
        let env = setup();
        let owner = create_user(&env.store, "owner", "Owner").await;
        let alice = create_user(&env.store, "alice", "Alice").await;
        let post = seed_post(&env.store, &owner, "post").await;

        let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
        eventually("feed loaded", || feed.view().items.len() == 1).await;

        let like_it = feed.toggle_like(&post).unwrap();
        let unlike_it = feed.toggle_like(&post).unwrap();
        assert_eq!(unlike_it.value, like(false, 0));
        like_it.remote.outcome().await.unwrap();
        unlike_it.remote.outcome().await.unwrap();

        let stored = fetch_post(&env.store, &post).await;
        assert!(!stored.likes.contains("alice"), "round {round}");
        eventually("settled unliked", || {
            feed.pending_likes() == 0 && feed.like_state(&post) == Some(like(false, 0))
        })
        .await;
    }
}

#[tokio::test]
async fn failed_like_restores_previous_state() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_liked_post(&env.store, &owner, "post", &["u1", "u2", "u3"]).await;

    let mut feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    let mut failures = feed.take_failures().unwrap();
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    env.store
        .fail_next_writes(1, SyncError::Transport("offline".into()));
    let applied = feed.toggle_like(&post).unwrap();
    assert_eq!(applied.value, like(true, 4));

    let err = applied.remote.outcome().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(feed.like_state(&post), Some(like(false, 3)));

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.operation, "toggle_like");
    assert_eq!(failure.target, post);

    // No automatic retry.
    settle().await;
    assert_eq!(fetch_post(&env.store, &post).await.like_count(), 3);
    assert_eq!(feed.like_state(&post), Some(like(false, 3)));
}

#[tokio::test]
async fn unlike_failure_restores_the_like() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_liked_post(&env.store, &owner, "post", &["alice", "u1"]).await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;
    assert_eq!(feed.like_state(&post), Some(like(true, 2)));

    env.store.fail_writes_under(
        paths::post(&post).to_string(),
        SyncError::PermissionDenied("read only".into()),
    );
    let applied = feed.toggle_like(&post).unwrap();
    assert_eq!(applied.value, like(false, 1));
    assert!(applied.remote.outcome().await.is_err());
    assert_eq!(feed.like_state(&post), Some(like(true, 2)));
}

#[tokio::test]
async fn like_on_vanished_post_rolls_back() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_post(&env.store, &owner, "post").await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    // The store answers as if the post was deleted before the write landed.
    env.store
        .fail_next_writes(1, SyncError::not_found(paths::post(&post)));
    let applied = feed.toggle_like(&post).unwrap();
    let err = applied.remote.outcome().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LogicalNoOp);
    assert_eq!(feed.like_state(&post), Some(like(false, 0)));

    // Posts the feed has never seen are refused without a write.
    let err = feed.toggle_like("missing").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::LogicalNoOp);
}

#[tokio::test]
async fn in_flight_like_survives_unrelated_snapshots() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_post(&env.store, &owner, "post").await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    let hold = env.store.hold_writes();
    let applied = feed.toggle_like(&post).unwrap();
    assert_eq!(applied.value, like(true, 1));

    // Force a fresh delivery of the unchanged remote state.
    env.store.reconnect();
    settle().await;
    assert_eq!(feed.like_state(&post), Some(like(true, 1)));
    assert_eq!(feed.pending_likes(), 1);

    drop(hold);
    applied.remote.outcome().await.unwrap();
    eventually("like stored", || feed.view().items[0].post.is_liked_by("alice")).await;
    assert_eq!(feed.like_state(&post), Some(like(true, 1)));
}

#[tokio::test]
async fn newer_snapshot_wins_over_confirmed_value() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_post(&env.store, &owner, "post").await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;
    feed.toggle_like(&post).unwrap().remote.outcome().await.unwrap();

    // Alice unlikes from another device.
    env.store
        .update(
            &paths::post(&post),
            vec![FieldOp::ArrayRemove(fields::LIKES.into(), vec![json!("alice")])],
        )
        .await
        .unwrap();
    eventually("remote unlike shows", || {
        feed.like_state(&post) == Some(like(false, 0))
    })
    .await;
}

#[tokio::test]
async fn concurrent_likes_from_many_users_converge() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let post = seed_post(&env.store, &owner, "post").await;

    let mut uids: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();
    let mut feeds = Vec::new();
    for uid in &uids {
        let session = create_user(&env.store, uid, uid).await;
        feeds.push(FeedAggregate::mount(&env.subs, session, &env.config));
    }
    for feed in &feeds {
        eventually("feed loaded", || feed.view().items.len() == 1).await;
    }

    let mut order: Vec<usize> = (0..feeds.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    let hold = env.store.hold_writes();
    let pending: Vec<_> = order
        .iter()
        .map(|&i| {
            let applied = feeds[i].toggle_like(&post).unwrap();
            assert!(applied.value.liked);
            applied.remote.outcome()
        })
        .collect();
    drop(hold);
    for result in join_all(pending).await {
        result.unwrap();
    }

    let stored = fetch_post(&env.store, &post).await;
    uids.sort();
    assert_eq!(stored.likes.iter().cloned().collect::<Vec<_>>(), uids);
    for feed in &feeds {
        eventually("all likes visible", || {
            feed.like_state(&post) == Some(like(true, 8))
        })
        .await;
    }
}

#[tokio::test]
async fn double_activation_only_likes() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_liked_post(&env.store, &owner, "post", &["u1"]).await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    let applied = feed.double_activate(&post).unwrap().expect("likes");
    assert_eq!(applied.value, like(true, 2));
    applied.remote.outcome().await.unwrap();
    eventually("like stored", || feed.view().items[0].post.is_liked_by("alice")).await;

    assert!(feed.double_activate(&post).unwrap().is_none());
    settle().await;
    assert_eq!(feed.like_state(&post), Some(like(true, 2)));
    assert_eq!(fetch_post(&env.store, &post).await.like_count(), 2);
}

#[tokio::test]
async fn taps_within_the_window_like_once() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_post(&env.store, &owner, "post").await;

    let feed = FeedAggregate::mount(&env.subs, alice, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 1).await;

    let t0 = Instant::now();
    assert!(feed.tap(&post, t0).unwrap().is_none());
    assert!(feed
        .tap(&post, t0 + Duration::from_millis(500))
        .unwrap()
        .is_none());

    let applied = feed
        .tap(&post, t0 + Duration::from_millis(650))
        .unwrap()
        .expect("double tap likes");
    assert_eq!(applied.value, like(true, 1));
    applied.remote.outcome().await.unwrap();

    // A second double tap on a liked post changes nothing.
    let t1 = t0 + Duration::from_secs(2);
    assert!(feed.tap(&post, t1).unwrap().is_none());
    assert!(feed
        .tap(&post, t1 + Duration::from_millis(100))
        .unwrap()
        .is_none());
    settle().await;
    assert_eq!(fetch_post(&env.store, &post).await.like_count(), 1);
}

#[tokio::test]
async fn scrolled_post_becomes_the_only_active_one() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let viewer = create_user(&env.store, "viewer", "Viewer").await;
    let mut ids = Vec::new();
    for title in ["p5", "p4", "p3", "p2", "p1"] {
        ids.push(seed_post(&env.store, &owner, title).await);
    }
    ids.reverse();

    let mut feed = FeedAggregate::mount(&env.subs, viewer, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 5).await;

    let commands = feed.set_layout(Layout::full_screen(800.0));
    assert_eq!(
        commands,
        vec![PlaybackCommand::Play {
            index: 0,
            id: ids[0].clone()
        }]
    );

    feed.scroll_to(1600.0);
    let view = feed.view();
    assert_eq!(view.active_index, Some(2));
    assert_eq!(view.items[2].post.title, "p3");
    let playing: Vec<usize> = view
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.playback.playing)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(playing, vec![2]);
    assert_eq!(view.items.iter().filter(|i| i.active).count(), 1);

    feed.unmount();
    assert!(!feed.is_mounted());
    assert_eq!(env.store.listener_count(), 0);
}

#[tokio::test]
async fn new_posts_rearm_the_tracker() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let viewer = create_user(&env.store, "viewer", "Viewer").await;
    seed_post(&env.store, &owner, "one").await;
    seed_post(&env.store, &owner, "two").await;

    let feed = FeedAggregate::mount(&env.subs, viewer, &env.config);
    eventually("feed loaded", || feed.view().items.len() == 2).await;
    feed.report_intersections(&[reel_sync::viewport::IntersectionEntry {
        target: feed.view().items[1].post.id.clone(),
        ratio: 1.0,
        is_intersecting: true,
    }]);
    assert_eq!(feed.view().active_index, Some(1));

    let newest = seed_post(&env.store, &owner, "three").await;
    eventually("new post", || feed.observed_count() == 3).await;
    let view = feed.view();
    assert_eq!(view.items[0].post.id, newest);
    // Still the same post playing, now one slot further down.
    assert_eq!(view.active_index, Some(2));
}

#[tokio::test]
async fn comments_count_and_stream() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;
    let alice = create_user(&env.store, "alice", "Alice").await;
    let post = seed_post(&env.store, &owner, "post").await;
    let other = seed_post(&env.store, &owner, "other").await;

    let mut thread = CommentThread::new(env.subs.clone());
    thread.open(&post);

    for text in ["first!", "nice", "  lovely  "] {
        add_comment(env.store.as_ref(), &alice, &post, text).await.unwrap();
    }
    eventually("comments delivered", || thread.comments().len() == 3).await;
    let texts: Vec<String> = thread.comments().into_iter().map(|c| c.text).collect();
    assert_eq!(texts, vec!["first!", "nice", "lovely"]);
    assert_eq!(thread.comments()[0].author.display_name, "Alice");
    assert_eq!(fetch_post(&env.store, &post).await.comment_count, 3);

    let err = add_comment(env.store.as_ref(), &alice, &post, "   ")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(fetch_post(&env.store, &post).await.comment_count, 3);

    thread.open(&other);
    assert_eq!(thread.post_id(), Some(other.as_str()));
    assert_eq!(env.store.listener_count(), 1);
    settle().await;
    assert!(thread.comments().is_empty());

    thread.close();
    assert_eq!(env.store.listener_count(), 0);
}

#[tokio::test]
async fn publishing_validates_input() {
    let env = setup();
    let owner = create_user(&env.store, "owner", "Owner").await;

    let bad_url = publish_post(
        env.store.as_ref(),
        &owner,
        NewPost {
            media_url: "not a url".into(),
            title: "Title".into(),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(bad_url, Err(SyncError::Validation(_))));

    let no_title = publish_post(
        env.store.as_ref(),
        &owner,
        NewPost {
            media_url: "https://media.example.com/a.mp4".into(),
            title: "  ".into(),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(no_title, Err(SyncError::Validation(_))));
    assert_eq!(env.store.document_count(&paths::posts()), 0);

    let id = publish_post(
        env.store.as_ref(),
        &owner,
        NewPost {
            media_url: "https://media.example.com/a.mp4".into(),
            title: " Pancakes ".into(),
            external_link: "https://recipes.example.com/pancakes".into(),
            tags: vec!["#Breakfast".into(), "breakfast".into(), "kids".into()],
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let post = fetch_post(&env.store, &id).await;
    assert_eq!(post.title, "Pancakes");
    assert_eq!(post.tags, vec!["breakfast", "kids"]);
    assert_eq!(post.owner_id, "owner");
    assert!(post.visible);
    assert!(post.likes.is_empty());
    assert_eq!(post.comment_count, 0);
    assert_eq!(post.author.unwrap().display_name, "Owner");
}
