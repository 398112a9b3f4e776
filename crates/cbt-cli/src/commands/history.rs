//! The `cbt history` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use cbt_providers::config::load_config_from;
use cbt_store::FileStore;

pub async fn execute(user: String, store: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let store_dir = match store {
        Some(dir) => dir,
        None => load_config_from(config.as_deref())?.store_dir,
    };
    let store = FileStore::open(&store_dir).await?;

    let results = store.results_for(&user).await?;
    if results.is_empty() {
        println!("No results for {user}.");
    } else {
        let mut table = Table::new();
        table.set_header(vec!["Date", "Mode", "Level", "Questions", "Score"]);
        for result in &results {
            table.add_row(vec![
                Cell::new(result.timestamp.format("%Y-%m-%d %H:%M")),
                Cell::new(result.mode),
                Cell::new(result.level),
                Cell::new(result.total_questions),
                Cell::new(format!("{}%", result.score)),
            ]);
        }
        println!("{table}");

        let average =
            results.iter().map(|r| u32::from(r.score)).sum::<u32>() as f64 / results.len() as f64;
        println!("{} exam(s), average score {average:.1}%", results.len());
    }

    match store.profile(&user).await? {
        Some(profile) => {
            let badges = if profile.badges.is_empty() {
                "none".to_string()
            } else {
                profile.badges.iter().cloned().collect::<Vec<_>>().join(", ")
            };
            println!("Points: {}  Badges: {badges}", profile.points);

            let board = store.leaderboard(usize::MAX).await?;
            if let Some(rank) = board.iter().position(|p| p.user_id == user) {
                println!("Leaderboard rank: {} of {}", rank + 1, board.len());
            }
        }
        None => println!("Points: 0  Badges: none"),
    }

    Ok(())
}
