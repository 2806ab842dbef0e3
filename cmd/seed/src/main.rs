//! # seed
//!
//! Opens the configured document store and writes a demonstration thread:
//! a post, a few replies, a like, a reaction and some views.

use std::sync::Arc;

use anyhow::Context;
use configs::{LogSettings, Settings, StoreBackend};
use domains::{Category, CommentId, DocumentStore, Identity, NewComment, NewPost, PostQuery, Reaction};
use secrecy::ExposeSecret;
use services::{Forum, TransactionPolicy};
use storage_adapters::{MemoryDocumentStore, SqliteDocumentStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    if log.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn DocumentStore>> {
    Ok(match settings.store.backend {
        StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
        StoreBackend::Sqlite => Arc::new(
            SqliteDocumentStore::connect(
                settings.store.database_url.expose_secret(),
                settings.store.max_connections,
            )
            .await
            .context("opening sqlite document store")?,
        ),
    })
}

fn comment(text: &str) -> NewComment {
    NewComment {
        plain_text: text.into(),
        rich_text: Some(format!("<p>{text}</p>")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.log);
    info!(backend = ?settings.store.backend, "seeding demo thread");

    let store = open_store(&settings).await?;
    let policy = TransactionPolicy {
        max_attempts: settings.transactions.max_attempts,
        initial_backoff: settings.transactions.initial_backoff(),
        max_backoff: settings.transactions.max_backoff(),
    };
    let forum = Forum::new(store, policy);

    let ada = Identity::new("seed-ada", "Ada").with_profile_pic("https://cdn.example.test/ada.png");
    let grace = Identity::new("seed-grace", "Grace");

    let post = forum
        .posts
        .create(
            &ada,
            NewPost {
                title: "Rust roles in Berlin?".into(),
                category: Category::Jobs,
                plain_text: "Anyone hiring Rust engineers in Berlin this quarter?".into(),
                rich_text: Some(
                    "<p>Anyone hiring <b>Rust</b> engineers in Berlin this quarter?</p>".into(),
                ),
            },
        )
        .await?;

    let first = forum
        .comments
        .append(&post, &grace, comment("We are, DM me for a referral."))
        .await?;
    forum
        .comments
        .append(&post, &ada, comment("Thanks, sent you a message!"))
        .await?;
    forum.comments.react(&post, first, Reaction::Love).await?;
    forum.comments.react(&post, CommentId::BODY, Reaction::Like).await?;
    forum.reactions.toggle(&post, &grace).await?;
    for _ in 0..3 {
        forum.views.increment(&post).await;
    }

    let seeded = forum.posts.get(&post).await?;
    info!(
        post_id = %post,
        comments = seeded.comment_count,
        likes = seeded.likes_count,
        views = seeded.views,
        "seeded thread"
    );

    let page = forum
        .posts
        .query(&PostQuery {
            page_size: settings.listing.page_size,
            ..PostQuery::default()
        })
        .await?;
    for listed in &page.items {
        info!(
            post_id = %listed.id,
            category = listed.category.label(),
            title = %listed.title,
            replies = listed.reply_count(),
            "listed"
        );
    }
    Ok(())
}
