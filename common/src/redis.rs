use deadpool_redis::{Config, Pool, Runtime};
use owo_colors::OwoColorize;

use crate::args::RedisArgs;

pub fn init_redis(args: &RedisArgs) -> anyhow::Result<Pool> {
    println!(
        "{} {}",
        "🧠 Connecting to Redis at".magenta(),
        args.url_redacted().magenta()
    );
    let cfg = Config::from_url(args.url());
    let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
    Ok(pool)
}

pub async fn ping(pool: &Pool) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}
