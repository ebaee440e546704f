use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use orchestrator::{
    ReducerControl, RemoteCombiner,
    configs::ReducerConfig,
    storage::{FsRepository, JsonStateStore},
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ReducerConfig::from_env()?;
    info!("starting reducer for session {}", config.session);

    let statestore = JsonStateStore::open(config.storage_dir.join("state.json")).await?;
    let repository = FsRepository::open(config.storage_dir.join("models")).await?;

    let reducer = ReducerControl::new(
        Arc::new(statestore),
        Arc::new(repository),
        config.model_kind.helper(),
    )
    .with_strategy(config.strategy.build())
    .with_session(&config.session, &config.model_name);

    for combiner in &config.combiners {
        let remote = RemoteCombiner::new(&combiner.name, &combiner.addr, config.request_timeout);
        reducer.add(Arc::new(remote))?;
    }

    match (&config.seed, reducer.latest_model().await?) {
        (Some(path), None) => {
            let blob = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading seed model {}", path.display()))?;
            let id = reducer.seed(&blob).await?;
            info!("seeded the model chain with {id}");
        }
        (Some(_), Some(latest)) => info!("model chain already at {latest}, not seeding"),
        (None, None) => warn!("no seed model configured and the model chain is empty"),
        (None, Some(_)) => {}
    }

    let run = reducer.instruct(&config.round);
    tokio::pin!(run);

    let committed = tokio::select! {
        committed = &mut run => committed?,
        _ = signal::ctrl_c() => {
            warn!("interrupted, stopping after the current round");
            reducer.shutdown();
            run.await?
        }
    };

    info!("run finished, {} models committed", committed.len());
    if let Some(latest) = reducer.latest_model().await? {
        info!("latest model: {latest}");
    }

    Ok(())
}
