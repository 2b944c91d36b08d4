use tabrelay_storage::RateLimiter;

pub async fn run() -> anyhow::Result<()> {
    let (paths, config, db) = super::open_workspace()?;

    println!("tabrelay status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (defaults)" }
    );
    println!("Database:  {}", db.path().display());
    println!();

    println!("Model:     {}", config.agents.defaults.model);
    println!(
        "Provider:  {}",
        config
            .agents
            .defaults
            .provider
            .as_deref()
            .or_else(|| config.get_api_key().map(|(name, _)| name))
            .unwrap_or("(none configured)")
    );
    println!();

    println!("Gateway:    http://{}:{}", config.gateway.host, config.gateway.port);
    println!("Controller: {}", config.connection.ws_url());
    println!(
        "Queue:      maxQueueSize={} requestTimeoutMs={}",
        config.controller.max_queue_size, config.controller.request_timeout_ms
    );
    println!();

    let identity = super::resolve_identity(&config, &db)?;
    println!("Identity:  {}", identity);
    if config.rate_limit.enabled {
        let limiter = RateLimiter::new(db, config.rate_limit.daily_limit);
        println!(
            "Quota:     {}/{} conversations today",
            limiter.today_count(&identity)?,
            limiter.daily_limit()
        );
    } else {
        println!("Quota:     disabled");
    }

    Ok(())
}
