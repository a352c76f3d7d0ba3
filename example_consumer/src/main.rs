//! Example consumer: boots relkit against PostgreSQL, saves an author with posts, edits the
//! posts, and reads the graph back as an output shape.
//!
//! Apply `config/schema.sql` first, then from the repo root: `cargo run -p example-consumer`

use relkit::{
    load_from_dir, resolve, ClassDef, FieldValue, Instance, MappingPairRegistry, MappingProfile, OrmContext,
    PgBackend, PropertyDef, Repository, Settings,
};
use serde_json::Value;
use std::sync::Arc;

const CLASSES: &[ClassDef] = &[
    ClassDef {
        name: "Author",
        identity: Some("id"),
        properties: &[
            PropertyDef::scalar("id", "uuid"),
            PropertyDef::scalar("name", "string"),
            PropertyDef::scalar("createdAt", "string"),
            PropertyDef::collection("posts", "Post"),
        ],
    },
    ClassDef {
        name: "Post",
        identity: Some("id"),
        properties: &[
            PropertyDef::scalar("id", "uuid"),
            PropertyDef::scalar("title", "string"),
            PropertyDef::scalar("status", "string"),
        ],
    },
    ClassDef {
        name: "PostSummary",
        identity: None,
        properties: &[PropertyDef::scalar("title", "string"), PropertyDef::scalar("status", "string")],
    },
    ClassDef {
        name: "AuthorProfile",
        identity: None,
        properties: &[
            PropertyDef::scalar("name", "string"),
            PropertyDef::scalar("postCount", "number"),
            PropertyDef::collection("posts", "PostSummary"),
        ],
    },
];

struct Profiles;

impl MappingProfile for Profiles {
    fn configure(&self, pairs: &mut MappingPairRegistry) {
        pairs.create_map("Post", "PostSummary");
        pairs.create_map("Author", "AuthorProfile").for_member("postCount", |author| {
            let n = author.collection("posts").map(|c| c.len()).unwrap_or(0);
            FieldValue::from(n as i64)
        });
    }
}

fn post(ctx: &OrmContext, title: &str) -> Result<Instance, Box<dyn std::error::Error>> {
    let mut post = ctx.metadata().instantiate("Post")?;
    post.set("title", title);
    Ok(post)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relkit=debug,example_consumer=info")),
        )
        .init();

    let config = load_from_dir(&settings.config_path).await?;
    let schema = Arc::new(resolve(&config)?);
    let ctx = Arc::new(OrmContext::from_parts(CLASSES, Some(&config), &[&Profiles])?);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    let mut repo = Repository::new(
        ctx.clone(),
        PgBackend::new(pool, schema.clone()),
        settings.repository.clone(),
    );
    repo.bind_schema(&schema)?;
    tracing::info!(models = schema.models.len(), "relkit ready");

    let mut author = ctx.metadata().instantiate("Author")?;
    author.set("name", "Ada");
    if let Some(posts) = author.collection_mut("posts") {
        posts.add(post(&ctx, "Notes on the engine")?);
        posts.add(post(&ctx, "Bernoulli numbers")?);
    }
    repo.save(&mut author).await?;
    let id = author.id().cloned().unwrap_or(Value::Null);
    tracing::info!(%id, "author created");

    let mut loaded = repo
        .find_by_id("Author", id.clone())
        .await?
        .ok_or("author vanished after create")?;
    if let Some(posts) = loaded.collection_mut("posts") {
        let first = posts.iter().next().cloned();
        if let Some(mut first) = first {
            first.set("status", "published");
            posts.add(first);
        }
        let last = posts.iter().last().cloned();
        if let Some(last) = last {
            posts.remove(&last);
        }
    }
    repo.save(&mut loaded).await?;

    let reread = repo.find_by_id("Author", id).await?.ok_or("author vanished after update")?;
    let profile = ctx.mapper().map(&reread, "Author", "AuthorProfile")?;
    tracing::info!(profile = %profile.to_json(), "author profile");
    Ok(())
}
