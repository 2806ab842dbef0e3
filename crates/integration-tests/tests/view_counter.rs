use domains::PostId;
use integration_tests::{memory_forum, seeded_post, shipped_forum};

#[tokio::test]
async fn each_increment_adds_one() {
    let (_, forum) = memory_forum();
    let post = seeded_post(&forum).await;

    assert_eq!(forum.views.increment(&post).await, Some(1));
    assert_eq!(forum.views.increment(&post).await, Some(2));
    assert_eq!(forum.posts.get(&post).await.unwrap().views, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_lose_no_updates() {
    const N: u64 = 128;
    let (_, forum) = shipped_forum();
    let post = seeded_post(&forum).await;
    forum.views.increment(&post).await;
    let start = forum.posts.get(&post).await.unwrap().views;

    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let views = forum.views.clone();
            let post = post.clone();
            tokio::spawn(async move { views.increment(&post).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_some());
    }

    assert_eq!(forum.posts.get(&post).await.unwrap().views, start + N);
}

#[tokio::test]
async fn a_missing_post_is_swallowed() {
    let (_, forum) = memory_forum();
    assert_eq!(forum.views.increment(&PostId::new("ghost")).await, None);
}
