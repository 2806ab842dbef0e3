use domains::{AppError, Collection, CommentId, DocumentStore, PostBodyEdit, Reaction};
use integration_tests::{ada, grace, memory_forum, reply, seeded_post};

#[tokio::test]
async fn append_append_remove_recounts_to_one() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 1);

    let first = forum.comments.append(&post, &grace(), reply("one")).await.unwrap();
    assert_eq!(first.get(), 2);
    assert_eq!(forum.comments.get(&post).await.unwrap().len(), 2);
    let second = forum.comments.append(&post, &grace(), reply("two")).await.unwrap();
    assert_eq!(second.get(), 3);

    let count = forum.threads.remove_comment(&post, first).await.unwrap();
    assert_eq!(count, 1);

    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.ids().map(CommentId::get).collect::<Vec<_>>(), [1, 3]);
    let stored = forum.posts.get(&post).await.unwrap();
    assert_eq!(stored.comment_count, 1);
    assert_eq!(stored.reply_count(), 0);
}

#[tokio::test]
async fn removing_the_last_reply_keeps_the_count_at_one() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let only = forum.comments.append(&post, &grace(), reply("solo")).await.unwrap();

    assert_eq!(forum.threads.remove_comment(&post, only).await.unwrap(), 1);
    let err = forum.threads.remove_comment(&post, only).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("comment", _)));
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 1);
}

#[tokio::test]
async fn body_edits_reach_both_copies() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    forum.comments.react(&post, CommentId::BODY, Reaction::Like).await.unwrap();

    let edited = forum
        .threads
        .update_post_body(
            &post,
            &ada(),
            PostBodyEdit {
                title: None,
                plain_text: "Now hiring remote too".into(),
                rich_text: Some("<p>Now hiring <b>remote</b> too</p>".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.title, "Hiring in Berlin");

    let stored = forum.posts.get(&post).await.unwrap();
    let body = forum.comments.get(&post).await.unwrap().body().cloned().unwrap();
    assert_eq!(stored.plain_text, "Now hiring remote too");
    assert_eq!(body.plain_text, stored.plain_text);
    assert_eq!(body.rich_text, stored.rich_text);
    assert_eq!(body.last_edit, Some(stored.last_edit));
    assert!(stored.last_edit > stored.timestamp);
    assert_eq!(body.reaction_count(Reaction::Like), 1);
}

#[tokio::test]
async fn body_edits_are_author_only_and_validated() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    let edit = PostBodyEdit {
        title: None,
        plain_text: "hijacked".into(),
        rich_text: None,
    };
    let err = forum.threads.update_post_body(&post, &grace(), edit).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let untitled = PostBodyEdit {
        title: Some("".into()),
        plain_text: "still here".into(),
        rich_text: None,
    };
    let err = forum.threads.update_post_body(&post, &ada(), untitled).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(forum.posts.get(&post).await.unwrap().plain_text, "Hiring in Berlin body");
}

#[tokio::test]
async fn body_edits_recreate_a_lost_comment_map() {
    let (store, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    store.delete_document(Collection::Comments, post.as_str()).await.unwrap();

    let edit = PostBodyEdit {
        title: Some("Hiring in Hamburg".into()),
        plain_text: "moved".into(),
        rich_text: None,
    };
    forum.threads.update_post_body(&post, &ada(), edit).await.unwrap();

    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.body().unwrap().plain_text, "moved");
}

#[tokio::test]
async fn invalidated_comments_keep_their_slot() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let id = forum.comments.append(&post, &grace(), reply("regret")).await.unwrap();

    let err = forum.threads.invalidate_comment(&post, id, &ada()).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let entry = forum.threads.invalidate_comment(&post, id, &grace()).await.unwrap();
    assert_eq!(entry.author, "");
    assert_eq!(entry.plain_text, "Comment deleted");
    assert_eq!(entry.rich_text.as_deref(), Some("<blockquote>Comment deleted</blockquote>"));
    assert_eq!(entry.profile_pic_url, None);

    let map = forum.comments.get(&post).await.unwrap();
    assert_eq!(map.get(id), Some(&entry));
    assert_eq!(map.next_reply_id().unwrap().get(), 3);
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 2);
}

#[tokio::test]
async fn an_append_after_a_removal_records_the_new_id() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;
    let first = forum.comments.append(&post, &grace(), reply("one")).await.unwrap();
    forum.comments.append(&post, &grace(), reply("two")).await.unwrap();
    assert_eq!(forum.threads.remove_comment(&post, first).await.unwrap(), 1);

    let latest = forum.comments.append(&post, &grace(), reply("three")).await.unwrap();
    assert_eq!(latest.get(), 4);
    assert_eq!(forum.comments.get(&post).await.unwrap().len(), 3);
    assert_eq!(forum.posts.get(&post).await.unwrap().comment_count, 4);
}
