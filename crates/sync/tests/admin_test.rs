mod common;

use common::{create_admin, create_user, eventually, fetch_post, seed_post, setup};
use reel_sync::admin::{delete_post, list_all_posts, set_post_visibility};
use reel_sync::feed::FeedAggregate;
use reel_sync::models::{paths, Role, UserProfile};
use reel_sync::store::DocumentStore;
use reel_sync::{sign_in, AuthIdentity, ErrorKind};

#[tokio::test]
async fn first_sign_in_creates_a_member_profile() {
    let env = setup();
    let session = sign_in(
        env.store.as_ref(),
        AuthIdentity {
            uid: "newbie".into(),
            email: Some("newbie@example.com".into()),
            display_name: None,
            photo_url: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(session.display_name, "Family Member");
    assert_eq!(session.role, Role::Member);
    assert!(!session.is_admin());

    let stored: UserProfile = env
        .store
        .get(&paths::user("newbie"))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(stored.email.as_deref(), Some("newbie@example.com"));
}

#[tokio::test]
async fn returning_user_keeps_stored_profile() {
    let env = setup();
    create_user(&env.store, "gran", "Grandma").await;

    let again = sign_in(
        env.store.as_ref(),
        AuthIdentity {
            uid: "gran".into(),
            display_name: Some("Renamed Upstream".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(again.display_name, "Grandma");
    assert_eq!(env.store.document_count(&paths::users()), 1);

    let invalid = sign_in(env.store.as_ref(), AuthIdentity::default()).await;
    assert_eq!(invalid.unwrap_err().kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn members_cannot_moderate() {
    let env = setup();
    let member = create_user(&env.store, "member", "Member").await;
    let post = seed_post(&env.store, &member, "mine").await;

    // Every write would fail, so a refusal proves the store was never asked.
    env.store
        .fail_next_writes(10, reel_sync::SyncError::Transport("unreachable".into()));
    for err in [
        list_all_posts(env.store.as_ref(), &member).await.unwrap_err(),
        delete_post(env.store.as_ref(), &member, &post).await.unwrap_err(),
        set_post_visibility(env.store.as_ref(), &member, &post, false)
            .await
            .unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Permission);
    }
    env.store.clear_faults();
    assert!(fetch_post(&env.store, &post).await.visible);
}

#[tokio::test]
async fn admin_hides_and_deletes_posts() {
    let env = setup();
    let admin = create_admin(&env.store, "boss", "Boss").await;
    assert!(admin.is_admin());
    let member = create_user(&env.store, "member", "Member").await;
    let keep = seed_post(&env.store, &member, "keep").await;
    let hide = seed_post(&env.store, &member, "hide").await;
    let remove = seed_post(&env.store, &member, "remove").await;

    let feed = FeedAggregate::mount(&env.subs, member.clone(), &env.config);
    eventually("feed loaded", || feed.view().items.len() == 3).await;

    set_post_visibility(env.store.as_ref(), &admin, &hide, false)
        .await
        .unwrap();
    delete_post(env.store.as_ref(), &admin, &remove).await.unwrap();
    eventually("feed updated", || feed.view().items.len() == 1).await;
    assert_eq!(feed.view().items[0].post.id, keep);

    let all = list_all_posts(env.store.as_ref(), &admin).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec![hide.as_str(), keep.as_str()]);
    assert!(!all[0].visible);

    set_post_visibility(env.store.as_ref(), &admin, &hide, true)
        .await
        .unwrap();
    eventually("post shown again", || feed.view().items.len() == 2).await;

    let err = set_post_visibility(env.store.as_ref(), &admin, &remove, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LogicalNoOp);
}
