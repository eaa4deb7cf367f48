//! `discover` subcommand: enumerate accessible chat entities, optionally
//! diffing against the loaded config or writing a generated skeleton.
//! (spec §6 — shares only `ConfigLoader` with the core pipeline)

use std::path::Path;

use serde::Serialize;

use crate::config;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredEntity {
    pub id: String,
    pub display_name: String,
}

/// Out-of-core per spec §1: the actual chat-platform entity listing is a
/// library call. Behind a trait here so `discover` compiles and is
/// testable without a live session.
#[async_trait::async_trait]
pub trait EntityLister: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<DiscoveredEntity>>;
}

pub enum Mode {
    List,
    Diff,
    Generate,
}

pub async fn run(lister: &dyn EntityLister, config_path: &Path, mode: Mode) -> anyhow::Result<()> {
    let entities = lister.list().await?;
    match mode {
        Mode::List => {
            for e in &entities {
                println!("{}\t{}", e.id, e.display_name);
            }
        }
        Mode::Diff => {
            let table = config::load(config_path).ok();
            let known: std::collections::HashSet<String> = table
                .map(|t| t.channel_routes.keys().cloned().collect())
                .unwrap_or_default();
            for e in &entities {
                if !known.contains(&e.id) {
                    println!("+ {}\t{}", e.id, e.display_name);
                }
            }
        }
        Mode::Generate => {
            let skeleton = generate_skeleton(&entities);
            println!("{skeleton}");
        }
    }
    Ok(())
}

fn generate_skeleton(entities: &[DiscoveredEntity]) -> String {
    let channels: Vec<serde_json::Value> = entities
        .iter()
        .map(|e| serde_json::json!({ "id": e.id, "keywords": null, "restricted_mode": false, "ocr": false, "check_attachments": true, "parser": null }))
        .collect();
    let doc = serde_json::json!({
        "destinations": [{
            "name": "generated",
            "type": "chat",
            "env_key": "CHANGE_ME_ENV_KEY",
            "channels": channels,
        }]
    });
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLister(Vec<DiscoveredEntity>);

    #[async_trait::async_trait]
    impl EntityLister for FakeLister {
        async fn list(&self) -> anyhow::Result<Vec<DiscoveredEntity>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn skeleton_includes_one_channel_per_entity() {
        let entities = vec![
            DiscoveredEntity { id: "1".into(), display_name: "a".into() },
            DiscoveredEntity { id: "2".into(), display_name: "b".into() },
        ];
        let out = generate_skeleton(&entities);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["destinations"][0]["channels"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_mode_runs_without_config_file() {
        let lister = FakeLister(vec![DiscoveredEntity { id: "1".into(), display_name: "a".into() }]);
        let result = run(&lister, Path::new("/nonexistent/config.json"), Mode::List).await;
        assert!(result.is_ok());
    }
}
