use secrecy::ExposeSecret;

use crate::commands::CommandResult;
use renta_core::config::{AppConfig, LoadOptions};
use renta_retrieval::{
    artifact_path, build_or_load, ChunkSettings, EmbeddingConfig, OpenAiEmbeddingClient,
};

/// Builds (or refreshes) the catalog index ahead of a deploy so startup
/// can load the artifact instead of paying for embeddings. `--force`
/// discards the artifact first, re-embedding even when the fingerprint
/// still matches.
pub fn run(force: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "reindex",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let api_key = match config.llm.api_key.as_ref() {
        Some(secret) => secret.expose_secret().to_string(),
        None => {
            return CommandResult::failure(
                "reindex",
                "config_validation",
                "llm.api_key is required to compute embeddings",
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "reindex",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        if force {
            let artifact = artifact_path(&config.retrieval.index_dir);
            match tokio::fs::remove_file(&artifact).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err((
                        "artifact_cleanup",
                        format!("could not remove `{}`: {error}", artifact.display()),
                        4u8,
                    ));
                }
            }
        }

        let embedder = OpenAiEmbeddingClient::new(EmbeddingConfig {
            api_key,
            base_url: config.llm.base_url.clone(),
            model: config.llm.embedding_model.clone(),
            timeout_secs: config.llm.timeout_secs,
            max_retries: config.llm.max_retries,
            retry_delay_ms: config.llm.retry_delay_ms,
        })
        .map_err(|error| ("embedding_client", error.to_string(), 4u8))?;

        let index = build_or_load(
            &config.retrieval.source_path,
            &config.retrieval.index_dir,
            ChunkSettings {
                chunk_size: config.retrieval.chunk_size,
                chunk_overlap: config.retrieval.chunk_overlap,
            },
            &embedder,
        )
        .await
        .map_err(|error| ("index", error.to_string(), 5u8))?;

        Ok((index.len(), index.fingerprint().to_string()))
    });

    match result {
        Ok((chunks, fingerprint)) => CommandResult::success_with_details(
            "reindex",
            "catalog index ready",
            serde_json::json!({ "chunks": chunks, "fingerprint": fingerprint }),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("reindex", error_class, message, exit_code)
        }
    }
}
