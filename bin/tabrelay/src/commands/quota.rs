use tabrelay_storage::RateLimiter;

pub async fn run(identity: Option<String>) -> anyhow::Result<()> {
    let (_paths, config, db) = super::open_workspace()?;
    let identity = match identity {
        Some(id) => id,
        None => super::resolve_identity(&config, &db)?,
    };

    let limiter = RateLimiter::new(db, config.rate_limit.daily_limit);
    let used = limiter.today_count(&identity)?;
    let remaining = limiter.remaining(&identity)?;

    println!("Identity:  {}", identity);
    println!("Used:      {}/{}", used, limiter.daily_limit());
    println!("Remaining: {}", remaining);
    if !config.rate_limit.enabled {
        println!("(rate limiting is disabled in config)");
    }
    Ok(())
}
