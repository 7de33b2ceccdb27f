//! `ragdesk doctor`: diagnose configuration and connectivity.

use std::path::Path;

use ragdesk_agent::InstructionPolicy;
use ragdesk_config::AppConfig;
use ragdesk_core::knowledge::KnowledgeStore;
use ragdesk_retrieval::{Embedder, QdrantStore};

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("ragdesk doctor");
    println!("==============\n");

    let mut issues = 0;

    // Config
    if !config_path.exists() {
        println!("  ⚠️  No config file at {}, using defaults (`ragdesk init` writes one)", config_path.display());
    }
    let config = match AppConfig::load_with_env(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue found. Fix the config and run again.");
            return Ok(());
        }
    };

    // Prompt
    match InstructionPolicy::from_config(&config.prompt) {
        Ok(_) => println!("  ✅ Instruction policy loads"),
        Err(e) => {
            println!("  ❌ Instruction policy: {e}");
            issues += 1;
        }
    }

    // Providers
    let providers = match ragdesk_providers::build_from_config(&config) {
        Ok(providers) => {
            println!("  ✅ Completion provider configured ({})", providers.completion.name());
            Some(providers)
        }
        Err(e) => {
            println!("  ❌ Completion provider: {e}");
            issues += 1;
            None
        }
    };

    if let Some(providers) = &providers {
        match providers.completion.health_check().await {
            Ok(true) => println!("  ✅ Completion API reachable"),
            Ok(false) => {
                println!("  ⚠️  Completion API answered but reported unhealthy");
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Completion API unreachable: {e}");
                issues += 1;
            }
        }
    }

    // Vector store
    if let Some(providers) = providers {
        let embedder = Embedder::new(providers.embedding, config.embedding.model.clone());
        match QdrantStore::connect(&config.qdrant, embedder) {
            Ok(store) => {
                if store.health_check().await {
                    println!("  ✅ Qdrant reachable at {}", config.qdrant.url());
                    match store.count().await {
                        Ok(points) => println!("  ✅ Collection '{}' holds {points} points", store.collection()),
                        Err(e) => {
                            println!("  ⚠️  Collection '{}' not readable: {e} (run `ragdesk ingest`)", store.collection());
                            issues += 1;
                        }
                    }
                } else {
                    println!("  ❌ Qdrant unreachable at {}", config.qdrant.url());
                    issues += 1;
                }
            }
            Err(e) => {
                println!("  ❌ Qdrant client: {e}");
                issues += 1;
            }
        }
    }

    // Data directory
    if Path::new(&config.ingest.data_dir).is_dir() {
        println!("  ✅ Data directory {} exists", config.ingest.data_dir);
    } else {
        println!("  ⚠️  Data directory {} missing (needed by `ingest` and `--in-memory`)", config.ingest.data_dir);
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
