use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use word_mines::config::StoreBackend;
use word_mines::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // 初始化日志
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("配置加载成功: {:?}", config);

    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::new(&config.store.redis_url).await?),
    };

    let lexicon: Arc<dyn Lexicon> = match &config.lexicon.path {
        Some(path) => {
            let words = WordList::load_from_file(path)?;
            tracing::info!("词表加载完成: {} 个单词", words.len());
            Arc::new(words)
        }
        None => {
            tracing::warn!("未配置词表，所有单词都会被判为无效");
            Arc::new(WordList::new())
        }
    };

    let matchmaker = Matchmaker::new(
        store.clone(),
        config.game.clone(),
        config.matchmaking.clone(),
        config.store.max_retries,
    );
    let service = Arc::new(SessionService::new(
        store,
        matchmaker,
        lexicon,
        config.store.max_retries,
    ));
    service.clone().spawn_sweeper(config.sweep_interval());

    let server = HttpServer::new(service, &config.server);
    server.serve(config.server_addr()?).await
}
