use std::collections::BTreeSet;

use domains::{
    AppError, Collection, CommentId, CommentPatch, DocumentStore, PostId, PostStatus, Reaction,
};
use integration_tests::{ada, grace, memory_forum, reply, seeded_post};

fn ids(raw: &[u32]) -> Vec<CommentId> {
    raw.iter().filter_map(|&n| CommentId::new(n)).collect()
}

#[tokio::test]
async fn sequential_appends_are_numbered_from_two_without_gaps() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    let mut assigned = Vec::new();
    for n in 0..5 {
        assigned.push(
            forum
                .comments
                .append(&post, &grace(), reply(&format!("reply {n}")))
                .await
                .unwrap(),
        );
    }
    assert_eq!(assigned, ids(&[2, 3, 4, 5, 6]));

    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.ids().collect::<Vec<_>>(), ids(&[1, 2, 3, 4, 5, 6]));
    let entry = map.get(CommentId::FIRST_REPLY).unwrap();
    assert_eq!(entry.author, "Grace");
    assert_eq!(entry.plain_text, "reply 0");
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 6);
}

#[tokio::test]
async fn ids_follow_the_highest_reply_not_the_map_size() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    for text in ["a", "b", "c"] {
        forum.comments.append(&post, &grace(), reply(text)).await.unwrap();
    }

    let count = forum.comments.remove(&post, CommentId::FIRST_REPLY).await.unwrap();
    assert_eq!(count, 2);
    let next = forum.comments.append(&post, &grace(), reply("d")).await.unwrap();
    assert_eq!(next.get(), 5);
}

#[tokio::test]
async fn concurrent_appends_never_share_an_id() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let comments = forum.comments.clone();
            let post = post.clone();
            tokio::spawn(async move {
                comments.append(&post, &grace(), reply(&format!("racer {n}"))).await
            })
        })
        .collect();
    let mut assigned = BTreeSet::new();
    for task in tasks {
        assert!(assigned.insert(task.await.unwrap().unwrap()));
    }

    assert_eq!(assigned.len(), 16);
    assert_eq!(forum.comments.get(&post).await.unwrap().len(), 17);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_on_worker_threads_lose_nothing() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let comments = forum.comments.clone();
            let post = post.clone();
            tokio::spawn(async move {
                comments.append(&post, &ada(), reply(&format!("racer {n}"))).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.len(), 33);
    assert_eq!(map.next_reply_id().unwrap().get(), 34);
}

#[tokio::test]
async fn closed_posts_take_no_replies() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    forum.posts.set_status(&post, &ada(), PostStatus::Closed).await.unwrap();

    let err = forum.comments.append(&post, &grace(), reply("late")).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(forum.comments.get(&post).await.unwrap().len(), 1);
}

#[tokio::test]
async fn appending_needs_text_and_a_post() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    let err = forum.comments.append(&post, &grace(), reply("  ")).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let err = forum
        .comments
        .append(&PostId::new("ghost"), &grace(), reply("hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("post", _)));
}

#[tokio::test]
async fn a_lost_comment_map_is_rebuilt_from_the_post_on_append() {
    let (store, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    store.delete_document(Collection::Comments, post.as_str()).await.unwrap();

    let err = forum.comments.get(&post).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("comment map", _)));

    let id = forum.comments.append(&post, &grace(), reply("first!")).await.unwrap();
    assert_eq!(id, CommentId::FIRST_REPLY);
    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.body().unwrap().author, "Ada");
}

#[tokio::test]
async fn update_merges_onto_a_single_entry() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let id = forum.comments.append(&post, &grace(), reply("tpyo")).await.unwrap();
    let before = forum.comments.get(&post).await.unwrap().get(id).cloned().unwrap();

    let updated = forum
        .comments
        .update(
            &post,
            id,
            CommentPatch {
                plain_text: Some("typo".into()),
                ..CommentPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.plain_text, "typo");
    assert_eq!(updated.rich_text, before.rich_text);
    assert_eq!(updated.timestamp, before.timestamp);
    assert!(updated.last_edited() > before.last_edited());

    let missing = forum
        .comments
        .update(&post, CommentId::new(99).unwrap(), CommentPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound("comment", _)));
}

#[tokio::test]
async fn remove_reports_the_count_the_post_should_record() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let two = forum.comments.append(&post, &grace(), reply("a")).await.unwrap();
    forum.comments.append(&post, &grace(), reply("b")).await.unwrap();

    let count = forum.comments.remove(&post, two).await.unwrap();
    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.ids().collect::<Vec<_>>(), ids(&[1, 3]));
    assert_eq!(count as usize, map.len() - 1);

    // The map alone does not touch the post; the caller records the count.
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 3);
    let updated = forum
        .posts
        .update(&post, domains::PostPatch::comment_count(count))
        .await
        .unwrap();
    assert_eq!(updated.comment_count, 1);

    let err = forum.comments.remove(&post, two).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("comment", _)));
    let err = forum.comments.remove(&post, CommentId::BODY).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn reactions_accumulate_per_kind() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let id = forum.comments.append(&post, &grace(), reply("nice")).await.unwrap();

    assert_eq!(forum.comments.react(&post, id, Reaction::Like).await.unwrap(), 1);
    assert_eq!(forum.comments.react(&post, id, Reaction::Like).await.unwrap(), 2);
    assert_eq!(forum.comments.react(&post, id, Reaction::Laugh).await.unwrap(), 1);

    let entry = forum.comments.get(&post).await.unwrap().get(id).cloned().unwrap();
    assert_eq!(entry.reaction_count(Reaction::Like), 2);
    assert_eq!(entry.reaction_count(Reaction::Love), 0);
    assert_eq!(entry.reaction_count(Reaction::Laugh), 1);
}
